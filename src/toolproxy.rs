//! C7: loopback tool-proxy.
//!
//! Grounded on `original_source/mfsclient/masterproxy.c`: a localhost TCP
//! listener that launders administrative commands (snapshot, etc.) through
//! this mount's already-authenticated master session, so a tool never needs
//! its own credentials. Two threads cooperate per connection sharing one
//! `ConnData`: a server thread that forwards commands and a keep-alive
//! thread that writes no-op frames during a long-running command, the two
//! coordinating through the `sendnops` state so a keep-alive frame can never
//! land in the middle of a reply (P10).

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::inode::Inode;
use crate::master::{MasterClient, ToolProxyCommandCodes};
use crate::negentry::NegEntryCache;

const TOOL_TIMEOUT_PART: Duration = Duration::from_secs(10);
const TOOL_TIMEOUT_ALL: Duration = Duration::from_secs(30);
const TOOL_NOP_PERIOD: Duration = Duration::from_secs(5);
const KEEPALIVE_POLL: Duration = Duration::from_millis(100);
const BUSY_WAIT_POLL: Duration = Duration::from_millis(10);

const REGISTER_PAYLOAD_SIZE: usize = 73;
const ACL_BLOB_SIZE: usize = 64;
const REGISTER_TOOLS: u8 = 1;
const STATUS_OK: u8 = 0;

const SENDNOPS_IDLE: u8 = 0;
const SENDNOPS_IN_PROGRESS: u8 = 1;
const SENDNOPS_WRITING_KEEPALIVE: u8 = 2;
const SENDNOPS_TERMINATED: u8 = 255;

/// Invoked when a snapshot command completes, to invalidate the kernel's
/// cached dentry for the destination name (ยง4.7). Kept as a trait so the
/// tool proxy doesn't need a concrete handle to the dispatcher.
pub trait DentryInvalidator: Send + Sync + 'static {
    fn invalidate(&self, parent: Inode, name: &[u8]);
}

struct ConnData {
    stream: TcpStream,
    sendnops: AtomicU8,
}

fn read_frame(stream: &mut TcpStream) -> std::io::Result<(u32, Vec<u8>)> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header)?;
    let cmd = u32::from_be_bytes(header[0..4].try_into().unwrap());
    let size = u32::from_be_bytes(header[4..8].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; size];
    stream.read_exact(&mut payload)?;
    Ok((cmd, payload))
}

fn write_frame(stream: &mut TcpStream, cmd: u32, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(&cmd.to_be_bytes())?;
    stream.write_all(&(payload.len() as u32).to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()
}

fn validate_register(payload: &[u8]) -> bool {
    payload.len() == REGISTER_PAYLOAD_SIZE && payload[ACL_BLOB_SIZE] == REGISTER_TOOLS
}

fn parse_snapshot_target(payload: &[u8]) -> Option<(Inode, Vec<u8>)> {
    // payload here is everything after the 4-byte msgid: [inode_dst:u32 BE][name_len:u16 BE][name]
    if payload.len() < 6 {
        return None;
    }
    let inode = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let name_len = u16::from_be_bytes(payload[4..6].try_into().unwrap()) as usize;
    let name = payload.get(6..6 + name_len)?.to_vec();
    Some((Inode(inode), name))
}

/// C7. Owns the listener and termination flag; connection threads are
/// fire-and-forget once spawned, matching the original's detached-thread
/// model.
pub struct ToolProxy {
    listener: TcpListener,
    terminate: Arc<AtomicBool>,
    master: Arc<dyn MasterClient>,
    negentry: Arc<NegEntryCache>,
    dentry: Arc<dyn DentryInvalidator>,
}

impl ToolProxy {
    pub fn bind(
        addr: &str,
        master: Arc<dyn MasterClient>,
        negentry: Arc<NegEntryCache>,
        dentry: Arc<dyn DentryInvalidator>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(ToolProxy {
            listener,
            terminate: Arc::new(AtomicBool::new(false)),
            master,
            negentry,
            dentry,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the non-blocking accept loop until [`terminate`](Self::terminate)
    /// is set. Intended to run on its own thread owned by the embedding host.
    pub fn accept_loop(&self) {
        loop {
            if self.terminate.load(Ordering::SeqCst) {
                return;
            }
            match self.listener.accept() {
                Ok((stream, _addr)) => self.spawn_connection(stream),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!("tool-proxy accept error: {e}");
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    fn spawn_connection(&self, stream: TcpStream) {
        let _ = stream.set_read_timeout(Some(TOOL_TIMEOUT_PART));
        let conn = Arc::new(ConnData {
            stream,
            sendnops: AtomicU8::new(SENDNOPS_IDLE),
        });
        let commands = self.master.tool_proxy_commands();

        let keepalive_conn = conn.clone();
        let keepalive_terminate = self.terminate.clone();
        std::thread::spawn(move || keepalive_loop(keepalive_conn, keepalive_terminate, commands));

        let server_conn = conn;
        let master = self.master.clone();
        let negentry = self.negentry.clone();
        let dentry = self.dentry.clone();
        std::thread::spawn(move || server_loop(server_conn, master, negentry, dentry, commands));
    }
}

fn keepalive_loop(conn: Arc<ConnData>, terminate: Arc<AtomicBool>, commands: ToolProxyCommandCodes) {
    let mut nop_accum = Duration::ZERO;
    loop {
        std::thread::sleep(KEEPALIVE_POLL);
        if terminate.load(Ordering::SeqCst) {
            conn.sendnops.store(SENDNOPS_TERMINATED, Ordering::SeqCst);
        }
        let state = conn.sendnops.load(Ordering::SeqCst);
        if state == SENDNOPS_TERMINATED {
            return;
        }
        if state != SENDNOPS_IN_PROGRESS {
            nop_accum = Duration::ZERO;
            continue;
        }
        nop_accum += KEEPALIVE_POLL;
        if nop_accum < TOOL_NOP_PERIOD {
            continue;
        }
        nop_accum = Duration::ZERO;
        conn.sendnops.store(SENDNOPS_WRITING_KEEPALIVE, Ordering::SeqCst);
        let mut stream = conn.stream.try_clone().expect("tool-proxy socket clone");
        let _ = write_frame(&mut stream, commands.nop, &[]);
        // only step back to in-progress if the server thread hasn't already
        // moved on (e.g. finished and gone idle, or terminated).
        let _ = conn.sendnops.compare_exchange(
            SENDNOPS_WRITING_KEEPALIVE,
            SENDNOPS_IN_PROGRESS,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

fn server_loop(
    conn: Arc<ConnData>,
    master: Arc<dyn MasterClient>,
    negentry: Arc<NegEntryCache>,
    dentry: Arc<dyn DentryInvalidator>,
    commands: ToolProxyCommandCodes,
) {
    let mut stream = conn.stream.try_clone().expect("tool-proxy socket clone");

    let (cmd, payload) = match read_frame(&mut stream) {
        Ok(v) => v,
        Err(e) => {
            debug!("tool-proxy register read failed: {e}");
            conn.sendnops.store(SENDNOPS_TERMINATED, Ordering::SeqCst);
            return;
        }
    };

    if cmd != commands.register || !validate_register(&payload) {
        warn!("tool-proxy: first frame was not a valid REGISTER");
        conn.sendnops.store(SENDNOPS_TERMINATED, Ordering::SeqCst);
        return;
    }
    if write_frame(&mut stream, commands.register_reply, &[STATUS_OK]).is_err() {
        conn.sendnops.store(SENDNOPS_TERMINATED, Ordering::SeqCst);
        return;
    }

    let _ = stream.set_read_timeout(Some(TOOL_TIMEOUT_ALL));
    loop {
        let (cmd, payload) = match read_frame(&mut stream) {
            Ok(v) => v,
            Err(_) => break,
        };
        if payload.len() < 4 {
            break;
        }
        conn.sendnops.store(SENDNOPS_IN_PROGRESS, Ordering::SeqCst);

        let msgid = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        let body = &payload[4..];

        let snapshot_target = if cmd == commands.snapshot {
            parse_snapshot_target(body)
        } else {
            None
        };

        let (acmd, areply) = master.custom(cmd, body);

        if cmd == commands.snapshot && acmd == commands.snapshot_reply {
            if let Some((inode_dst, name_dst)) = snapshot_target {
                negentry.clear();
                dentry.invalidate(inode_dst, &name_dst);
            }
        }

        // never interleave a reply with a keep-alive frame in flight.
        while conn.sendnops.load(Ordering::SeqCst) == SENDNOPS_WRITING_KEEPALIVE {
            std::thread::sleep(BUSY_WAIT_POLL);
        }

        let mut out = Vec::with_capacity(4 + areply.len());
        out.extend_from_slice(&msgid.to_be_bytes());
        out.extend_from_slice(&areply);
        if write_frame(&mut stream, acmd, &out).is_err() {
            break;
        }
        conn.sendnops.store(SENDNOPS_IDLE, Ordering::SeqCst);
    }

    conn.sendnops.store(SENDNOPS_TERMINATED, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_register_requires_exact_size_and_discriminant() {
        let mut payload = vec![0u8; REGISTER_PAYLOAD_SIZE];
        payload[ACL_BLOB_SIZE] = REGISTER_TOOLS;
        assert!(validate_register(&payload));

        payload[ACL_BLOB_SIZE] = 0;
        assert!(!validate_register(&payload));

        let short = vec![0u8; REGISTER_PAYLOAD_SIZE - 1];
        assert!(!validate_register(&short));
    }

    #[test]
    fn parse_snapshot_target_reads_inode_and_name() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&42u32.to_be_bytes());
        payload.extend_from_slice(&4u16.to_be_bytes());
        payload.extend_from_slice(b"snap");
        let (inode, name) = parse_snapshot_target(&payload).unwrap();
        assert_eq!(inode, Inode(42));
        assert_eq!(name, b"snap");
    }

    #[test]
    fn parse_snapshot_target_rejects_truncated_payload() {
        assert!(parse_snapshot_target(&[0, 0]).is_none());
    }

    #[test]
    fn frame_round_trips_over_a_loopback_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || {
            let mut s = TcpStream::connect(addr).unwrap();
            write_frame(&mut s, 7, b"hello").unwrap();
        });
        let (mut server_stream, _) = listener.accept().unwrap();
        let (cmd, payload) = read_frame(&mut server_stream).unwrap();
        assert_eq!(cmd, 7);
        assert_eq!(payload, b"hello");
        client.join().unwrap();
    }
}

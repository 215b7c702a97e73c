//! The operation-log ring (ยง4.8's `oplog`/`ophistory` special files).
//!
//! This subsystem itself is an external collaborator per ยง1 ("the op-log
//! ring" is listed among the out-of-scope pieces this crate only consumes),
//! but the special files that expose it need *some* ring buffer to read
//! from, so ยง C of SPEC_FULL.md supplements it: a fixed-capacity circular
//! byte buffer of formatted lines, with per-subscriber read cursors, grounded
//! on `original_source/mfsclient/oplog.c`. `oplog` subscribers start reading
//! from "now" (tail -f semantics); `ophistory` subscribers start from as far
//! back as the buffer retains (replay-from-start, capped by history size).

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub const DEFAULT_CAPACITY: usize = 0x0100_0000; // 16 MiB, matches OPBUFFSIZE
pub const DEFAULT_MAX_HISTORY: u64 = 0x00F0_0000; // matches MAXHISTORYSIZE
const MAX_LINE_LEN: usize = 1000;
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(1);
const HEARTBEAT: &[u8] = b"#\n";

struct Subscriber {
    read_pos: u64,
}

struct Inner {
    buffer: Vec<u8>,
    write_pos: u64,
    subscribers: HashMap<u64, Subscriber>,
    next_handle: u64,
}

/// An opaque per-open subscription handle for `oplog`/`ophistory`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OpLogHandle(u64);

/// The ring buffer backing `oplog`/`ophistory`.
pub struct OpLog {
    capacity: usize,
    max_history: u64,
    inner: Mutex<Inner>,
    nodata: Condvar,
}

impl OpLog {
    #[must_use]
    pub fn new(capacity: usize, max_history: u64) -> Self {
        OpLog {
            capacity,
            max_history,
            inner: Mutex::new(Inner {
                buffer: vec![0u8; capacity],
                write_pos: 0,
                subscribers: HashMap::new(),
                next_handle: 1,
            }),
            nodata: Condvar::new(),
        }
    }

    /// Appends one already-formatted line (a trailing `\n` is added if
    /// missing; overlong lines are truncated to `MAX_LINE_LEN`), matching
    /// `oplog_printf`/`oplog_msg`'s fixed-size line buffer.
    pub fn write_line(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        if bytes.len() > MAX_LINE_LEN - 1 {
            bytes.truncate(MAX_LINE_LEN - 1);
        }
        if bytes.last() != Some(&b'\n') {
            bytes.push(b'\n');
        }
        self.put(&bytes);
    }

    fn put(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        let leng = data.len().min(self.capacity);
        let data = &data[data.len() - leng..];
        let bpos = (inner.write_pos as usize) % self.capacity;
        inner.write_pos += leng as u64;
        if bpos + leng > self.capacity {
            let first = self.capacity - bpos;
            inner.buffer[bpos..].copy_from_slice(&data[..first]);
            inner.buffer[..leng - first].copy_from_slice(&data[first..]);
        } else {
            inner.buffer[bpos..bpos + leng].copy_from_slice(data);
        }
        self.nodata.notify_all();
    }

    /// Opens a subscription. `history == true` replays as much of the
    /// retained buffer as `max_history` allows (aligned forward to the next
    /// line boundary); otherwise the subscription starts at the current
    /// write position.
    pub fn new_handle(&self, history: bool) -> OpLogHandle {
        let mut inner = self.inner.lock();
        let handle = inner.next_handle;
        inner.next_handle += 1;

        let read_pos = if history {
            if inner.write_pos < self.max_history {
                0
            } else {
                let mut pos = inner.write_pos - self.max_history;
                let mut bpos = (pos as usize) % self.capacity;
                while pos < inner.write_pos && inner.buffer[bpos] != b'\n' {
                    bpos = (bpos + 1) % self.capacity;
                    pos += 1;
                }
                if pos < inner.write_pos {
                    pos += 1;
                }
                pos
            }
        } else {
            inner.write_pos
        };

        inner.subscribers.insert(handle, Subscriber { read_pos });
        OpLogHandle(handle)
    }

    pub fn release_handle(&self, handle: OpLogHandle) {
        self.inner.lock().subscribers.remove(&handle.0);
    }

    /// Returns up to `max_len` bytes of new data for `handle`, blocking up
    /// to one second if none is available yet and returning a `"#\n"`
    /// heartbeat on timeout so a `tail -f` reader sees liveness. Returns
    /// `None` if the handle is unknown (already released).
    pub fn get_data(&self, handle: OpLogHandle, max_len: usize) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        loop {
            let write_pos = inner.write_pos;
            let sub = inner.subscribers.get(&handle.0)?;
            if sub.read_pos < write_pos {
                break;
            }
            let timed_out = self.nodata.wait_for(&mut inner, HEARTBEAT_TIMEOUT).timed_out();
            if timed_out {
                return Some(HEARTBEAT.to_vec());
            }
        }

        let write_pos = inner.write_pos;
        let sub = inner.subscribers.get_mut(&handle.0)?;
        let bpos = (sub.read_pos as usize) % self.capacity;
        let mut leng = (write_pos - sub.read_pos) as usize;
        leng = leng.min(self.capacity - bpos).min(max_len);
        let out = inner.buffer[bpos..bpos + leng].to_vec();
        inner.subscribers.get_mut(&handle.0).unwrap().read_pos += leng as u64;
        Some(out)
    }
}

impl Default for OpLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_MAX_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_handle_only_sees_lines_written_after_open() {
        let log = OpLog::new(1024, 512);
        log.write_line("before");
        let h = log.new_handle(false);
        log.write_line("after");
        let data = log.get_data(h, 1024).unwrap();
        assert_eq!(String::from_utf8_lossy(&data), "after\n");
    }

    #[test]
    fn history_handle_replays_retained_lines() {
        let log = OpLog::new(1024, 512);
        log.write_line("one");
        log.write_line("two");
        let h = log.new_handle(true);
        let data = log.get_data(h, 1024).unwrap();
        assert_eq!(String::from_utf8_lossy(&data), "one\ntwo\n");
    }

    #[test]
    fn unknown_handle_returns_none() {
        let log = OpLog::new(1024, 512);
        let h = log.new_handle(false);
        log.release_handle(h);
        assert!(log.get_data(h, 1024).is_none());
    }

    #[test]
    fn empty_ring_times_out_into_heartbeat() {
        let log = OpLog::new(1024, 512);
        let h = log.new_handle(false);
        let data = log.get_data(h, 1024).unwrap();
        assert_eq!(data, HEARTBEAT);
    }
}

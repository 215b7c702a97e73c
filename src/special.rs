//! Synthesized content for the seven special inodes (ยง4.8, ยง6).

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use crate::master::MasterInfo;

/// Minimum master version at which discovery tools know to read a
/// substituted tool-proxy address out of `masterinfo` instead of the real
/// master address (`masterproxy_getlocation`'s `0x00010618`, i.e. 1.6.24).
pub const PROXY_SUBSTITUTION_MIN_VERSION: u32 = 0x0001_0618;

/// `masterinfo`: `[ip:4][port:2][version:4]?` big-endian, per ยง6 — 10 bytes
/// without the trailing version field, 14 with it; reads are bounded to
/// `[0, 14)` by the caller regardless.
///
/// When `proxy_addr` is present and the master's version meets
/// [`PROXY_SUBSTITUTION_MIN_VERSION`], the proxy's host:port is substituted
/// for the master's own, so local tools that read this file discover the
/// proxy instead of dialing the master directly (ยง4.7, ยง4.8).
#[must_use]
pub fn masterinfo_blob(info: MasterInfo, with_version: bool, proxy_addr: Option<(Ipv4Addr, u16)>) -> Vec<u8> {
    let mut out = Vec::with_capacity(if with_version { 14 } else { 10 });
    match proxy_addr {
        Some((ip, port)) if info.version >= PROXY_SUBSTITUTION_MIN_VERSION => {
            out.extend_from_slice(&ip.octets());
            out.extend_from_slice(&port.to_be_bytes());
        }
        _ => {
            out.extend_from_slice(&info.ip);
            out.extend_from_slice(&info.port.to_be_bytes());
        }
    }
    if with_version {
        out.extend_from_slice(&info.version.to_be_bytes());
    }
    out
}

const MOOSE_BODY: &str = r"
         ,.---""'                  `""---.,
      ,;'           ,;             `;,
     ;'                                `;
     ;                                   ;
     ;              mooseart             ;
      `;,                             ,;'
         `"---.,_____________,.---""'
";

/// `mooseart`: a constant ASCII moose whose eyes animate from a 5-second
/// monotonic clock bucket (ยง4.8, ยง C of SPEC_FULL.md — implemented rather
/// than stubbed since the content is part of the observable protocol).
#[must_use]
pub fn mooseart() -> String {
    let bucket = (monotonic_seconds() / 5) % 2;
    let eyes = if bucket == 0 { "o o" } else { "- -" };
    MOOSE_BODY.replacen("mooseart", eyes, 1)
}

/// Process-start baseline so the animation advances off [`Instant`] (actually
/// monotonic) rather than wall-clock time, which a clock step could move
/// backward.
fn start_instant() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

fn monotonic_seconds() -> u64 {
    start_instant().elapsed().as_secs()
}

/// `random`: a Marsaglia KISS pseudo-random byte stream. Not cryptographic;
/// implemented per the original rather than substituted with a crate RNG,
/// since only "a deterministic-enough stream" is part of the contract, not
/// the specific algorithm.
pub struct KissRng {
    x: AtomicU32,
    y: AtomicU32,
    z: AtomicU32,
    w: AtomicU32,
}

impl Default for KissRng {
    fn default() -> Self {
        Self::new(123_456_789, 362_436_069, 521_288_629, 88_675_123)
    }
}

impl KissRng {
    #[must_use]
    pub fn new(x: u32, y: u32, z: u32, w: u32) -> Self {
        KissRng {
            x: AtomicU32::new(x),
            y: AtomicU32::new(y),
            z: AtomicU32::new(z),
            w: AtomicU32::new(w),
        }
    }

    /// Produces the next 32-bit value. Single-threaded use assumed per
    /// caller (an open handle owns its own generator state); the atomics
    /// exist only so the struct can be shared behind a `&self` reference
    /// without an extra lock.
    pub fn next_u32(&self) -> u32 {
        let mut x = self.x.load(Ordering::Relaxed);
        let mut y = self.y.load(Ordering::Relaxed);
        let mut z = self.z.load(Ordering::Relaxed);
        let mut w = self.w.load(Ordering::Relaxed);

        x ^= x << 16;
        x ^= x >> 5;
        x ^= x << 1;

        let t = x;
        x = y;
        y = z;
        z = t ^ x ^ y;

        w = w.wrapping_mul(69_069).wrapping_add(1);

        self.x.store(x, Ordering::Relaxed);
        self.y.store(y, Ordering::Relaxed);
        self.z.store(z, Ordering::Relaxed);
        self.w.store(w, Ordering::Relaxed);

        z.wrapping_add(w)
    }

    pub fn fill(&self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(4) {
            let v = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&v[..chunk.len()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masterinfo_blob_packs_ip_port_version() {
        let info = MasterInfo { ip: [10, 0, 0, 1], port: 9421, version: 0x0001_0618 };
        let blob = masterinfo_blob(info, true, None);
        assert_eq!(blob.len(), 14);
        assert_eq!(&blob[0..4], &[10, 0, 0, 1]);
        assert_eq!(u16::from_be_bytes([blob[4], blob[5]]), 9421);
        assert_eq!(u32::from_be_bytes([blob[6], blob[7], blob[8], blob[9]]), 0x0001_0618);
    }

    #[test]
    fn masterinfo_blob_without_version_is_ten_bytes() {
        let info = MasterInfo { ip: [0, 0, 0, 0], port: 0, version: 0 };
        assert_eq!(masterinfo_blob(info, false, None).len(), 10);
    }

    #[test]
    fn masterinfo_blob_substitutes_proxy_address_above_threshold() {
        let info = MasterInfo { ip: [10, 0, 0, 1], port: 9421, version: PROXY_SUBSTITUTION_MIN_VERSION };
        let blob = masterinfo_blob(info, true, Some((Ipv4Addr::new(127, 0, 0, 1), 12345)));
        assert_eq!(&blob[0..4], &[127, 0, 0, 1]);
        assert_eq!(u16::from_be_bytes([blob[4], blob[5]]), 12345);
        // the version field itself always reports the real master's version.
        assert_eq!(u32::from_be_bytes([blob[6], blob[7], blob[8], blob[9]]), PROXY_SUBSTITUTION_MIN_VERSION);
    }

    #[test]
    fn masterinfo_blob_keeps_master_address_below_threshold() {
        let info = MasterInfo { ip: [10, 0, 0, 1], port: 9421, version: PROXY_SUBSTITUTION_MIN_VERSION - 1 };
        let blob = masterinfo_blob(info, true, Some((Ipv4Addr::new(127, 0, 0, 1), 12345)));
        assert_eq!(&blob[0..4], &[10, 0, 0, 1]);
        assert_eq!(u16::from_be_bytes([blob[4], blob[5]]), 9421);
    }

    #[test]
    fn kiss_rng_is_deterministic_for_a_fixed_seed() {
        let a = KissRng::new(1, 2, 3, 4);
        let b = KissRng::new(1, 2, 3, 4);
        assert_eq!(a.next_u32(), b.next_u32());
        assert_eq!(a.next_u32(), b.next_u32());
    }

    #[test]
    fn kiss_rng_fill_handles_non_multiple_of_four_lengths() {
        let rng = KissRng::default();
        let mut buf = [0u8; 13];
        rng.fill(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn mooseart_contains_the_body_art() {
        let art = mooseart();
        assert!(art.contains("---"));
    }
}

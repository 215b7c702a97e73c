//! Runtime parameters / mount options (ambient; SPEC_FULL.md ยงB).
//!
//! Modeled the way the teacher models its mount-option struct: a plain
//! `Default`-able config, constructed from mount options plus the tunables
//! `original_source/mfsmount/main.c` exposes. Surfaced back out through the
//! `params` special file as newline text (ยง4.8).

use std::fmt::Write as _;
use std::time::Duration;

use crate::openfile::OpenFileConfig;

/// Runtime-configurable parameters for one mount.
#[derive(Clone, Debug)]
pub struct Config {
    pub entry_cache_timeout: Duration,
    pub attr_cache_timeout: Duration,
    pub direntry_cache_timeout: Duration,
    pub groups_cache_timeout: Duration,
    pub fdcache_timeout: Duration,
    pub fsync_before_close_min_time: Duration,
    pub tool_proxy_bind_addr: String,
    /// Full-permission mode (ยง4.8): when on, every RPC consults the groups
    /// cache for the caller's supplementary groups; when off, a
    /// single-element array of just the primary gid is used.
    pub full_permissions: bool,
    pub open_file: OpenFileConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            entry_cache_timeout: Duration::from_secs(1),
            attr_cache_timeout: Duration::from_secs(1),
            direntry_cache_timeout: Duration::from_secs(1),
            groups_cache_timeout: Duration::from_secs(300),
            fdcache_timeout: crate::fdcache::DEFAULT_TIMEOUT,
            fsync_before_close_min_time: Duration::from_millis(0),
            tool_proxy_bind_addr: "127.0.0.1:0".to_string(),
            full_permissions: false,
            open_file: OpenFileConfig::default(),
        }
    }
}

impl Config {
    /// Renders the `params` special file's text dump (root-only per ยง4.8).
    #[must_use]
    pub fn render_params(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "entry_cache_timeout: {:.3}", self.entry_cache_timeout.as_secs_f64());
        let _ = writeln!(out, "attr_cache_timeout: {:.3}", self.attr_cache_timeout.as_secs_f64());
        let _ = writeln!(
            out,
            "direntry_cache_timeout: {:.3}",
            self.direntry_cache_timeout.as_secs_f64()
        );
        let _ = writeln!(out, "groups_cache_timeout: {:.3}", self.groups_cache_timeout.as_secs_f64());
        let _ = writeln!(out, "fdcache_timeout: {:.3}", self.fdcache_timeout.as_secs_f64());
        let _ = writeln!(
            out,
            "fsync_before_close_min_time: {:.3}",
            self.fsync_before_close_min_time.as_secs_f64()
        );
        let _ = writeln!(out, "tool_proxy_bind_addr: {}", self.tool_proxy_bind_addr);
        let _ = writeln!(out, "full_permissions: {}", self.full_permissions);
        let _ = writeln!(out, "delayed_release: {}", self.open_file.delayed_release);
        let _ = writeln!(out, "extra_pid_locks: {}", self.open_file.extra_pid_locks);
        out
    }
}

//! Log channel selection.
//!
//! The `--log` flag takes a string of channel letters; each toggles one
//! channel starting from the default of console-only. The mask is mapped
//! onto a `tracing` filter: the wire and packet channels live on the
//! dedicated `net` and `packet` targets, user-facing output on `console`.

use bitflags::bitflags;
use tracing::warn;
use tracing_subscriber::EnvFilter;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LogMask: u8 {
        const DEBUG   = 1 << 0;
        const NETWORK = 1 << 1;
        const INFO    = 1 << 2;
        const WARNING = 1 << 3;
        const CONSOLE = 1 << 4;
        const PACKET  = 1 << 5;
    }
}

impl Default for LogMask {
    fn default() -> Self {
        Self::CONSOLE
    }
}

impl LogMask {
    /// Flips one channel per letter: `d`, `n`, `i`, `w`, `c`, `p`; `a`
    /// selects everything and `0` nothing.
    pub fn toggle(mut self, letters: &str) -> Self {
        for letter in letters.chars() {
            match letter {
                'd' => self ^= Self::DEBUG,
                'n' => self ^= Self::NETWORK,
                'i' => self ^= Self::INFO,
                'w' => self ^= Self::WARNING,
                'c' => self ^= Self::CONSOLE,
                'p' => self ^= Self::PACKET,
                'a' => self = Self::all(),
                '0' => self = Self::empty(),
                other => warn!("unknown log channel '{other}'"),
            }
        }
        self
    }

    /// Filter directives for the subscriber. Errors always pass.
    pub fn directives(self) -> String {
        let base = if self.contains(Self::DEBUG) {
            "debug"
        } else if self.contains(Self::INFO) {
            "info"
        } else if self.contains(Self::WARNING) {
            "warn"
        } else {
            "error"
        };
        let mut directives = base.to_string();
        if self.contains(Self::NETWORK) {
            directives.push_str(",net=trace");
        }
        if self.contains(Self::PACKET) {
            directives.push_str(",packet=trace");
        }
        if self.contains(Self::CONSOLE) {
            directives.push_str(",console=info");
        }
        directives
    }
}

/// Installs the process-wide subscriber; call once at binary startup.
pub fn init(mask: LogMask) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(mask.directives()))
        .with_target(false)
        .init();
}

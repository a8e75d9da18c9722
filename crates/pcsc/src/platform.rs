//! Platform probe and capability quirks
//!
//! The platform-specific behaviors of the reader stack are expressed as
//! capabilities carried by a value probed once at plugin build time, rather
//! than through per-OS subtypes.

use std::time::Duration;

/// Host platform as seen by the native smart-card stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Windows (Plug-and-Play smart-card service)
    Windows,
    /// macOS (CryptoTokenKit-backed PC/SC shim)
    MacOs,
    /// Linux and other pcsc-lite platforms
    Unix,
}

impl Platform {
    /// Interval between presence polls when insertion detection is
    /// non-blocking.
    pub(crate) const INSERTION_POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Probes the compilation target.
    pub const fn probe() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Unix
        }
    }

    /// Computes the native control code for a reader escape command.
    pub const fn control_code(self, command_id: u32) -> u32 {
        match self {
            Self::Windows => 0x0031_0000 | (command_id << 2),
            Self::MacOs | Self::Unix => 0x4200_0000 | command_id,
        }
    }

    /// The well-known CCID escape command identifier.
    pub const fn ioctl_ccid_escape_command_id(self) -> u32 {
        match self {
            Self::Windows => 3500,
            Self::MacOs | Self::Unix => 1,
        }
    }

    /// Whether blocking insertion detection is unreliable and must be
    /// replaced by non-blocking presence polling.
    pub(crate) const fn polls_for_insertion(self) -> bool {
        matches!(self, Self::MacOs)
    }

    /// Whether the native context must be recycled before each terminal
    /// enumeration.
    ///
    /// The Windows smart-card service stops when the last reader is
    /// unplugged, invalidating outstanding handles; a fresh context is the
    /// only way to see newly attached readers again.
    pub(crate) const fn recycles_context_on_enumeration(self) -> bool {
        matches!(self, Self::Windows)
    }
}

//! Reader-level configuration options

use cardmux_core::{Disposition, ProtocolFilter};

/// Sharing mode applied when a physical channel is opened.
///
/// Corresponds to the connection mode defined by PC/SC and used by the
/// `SCardConnect` function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharingMode {
    /// Allows simultaneous access to the card
    Shared,
    /// Requests exclusive access to the card (default)
    #[default]
    Exclusive,
}

/// Transmission protocol selector used when connecting to the card, as
/// defined by the PC/SC standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsoProtocol {
    /// Connect using any available protocol (default)
    #[default]
    Any,
    /// Connect using the T=0 protocol
    T0,
    /// Connect using the T=1 protocol
    T1,
    /// Connect using the T=CL protocol
    TCl,
}

impl IsoProtocol {
    /// The protocol string as defined by the PC/SC standard.
    pub const fn value(self) -> &'static str {
        match self {
            Self::Any => "*",
            Self::T0 => "T=0",
            Self::T1 => "T=1",
            Self::TCl => "T=CL",
        }
    }
}

impl From<IsoProtocol> for ProtocolFilter {
    fn from(protocol: IsoProtocol) -> Self {
        match protocol {
            IsoProtocol::Any => Self::Any,
            IsoProtocol::T0 => Self::T0,
            // contactless cards talk ISO 14443-4, negotiated as T=1 by the
            // native layer
            IsoProtocol::T1 | IsoProtocol::TCl => Self::T1,
        }
    }
}

/// Action to be taken on the card after the channel is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectionMode {
    /// Resets the card (default)
    ///
    /// Corresponds to PC/SC `SCARD_RESET_CARD`.
    #[default]
    Reset,

    /// Leaves the card powered in its current state
    ///
    /// Corresponds to PC/SC `SCARD_LEAVE_CARD`.
    Leave,

    /// Completely powers off the card
    ///
    /// Corresponds to PC/SC `SCARD_UNPOWER_CARD`. Only honored by providers
    /// reporting extended disposition support; closing the channel fails at
    /// runtime otherwise.
    Unpower,

    /// Ejects the card if supported by the reader
    ///
    /// Corresponds to PC/SC `SCARD_EJECT_CARD`. Only honored by providers
    /// reporting extended disposition support; closing the channel fails at
    /// runtime otherwise.
    Eject,
}

impl From<DisconnectionMode> for Disposition {
    fn from(mode: DisconnectionMode) -> Self {
        match mode {
            DisconnectionMode::Reset => Self::Reset,
            DisconnectionMode::Leave => Self::Leave,
            DisconnectionMode::Unpower => Self::Unpower,
            DisconnectionMode::Eject => Self::Eject,
        }
    }
}

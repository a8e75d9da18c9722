//! Terminal access traits
//!
//! The plugin talks to the platform's smart-card stack exclusively through
//! these traits. They mirror the synchronous surface of a PC/SC resource
//! manager: terminal enumeration, card connection, APDU transmission,
//! control commands and bounded presence waits.

use std::time::Duration;

use crate::error::ServiceError;

/// Protocol negotiation filter passed to [`Terminal::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFilter {
    /// Negotiate any available protocol
    Any,
    /// Restrict negotiation to T=0
    T0,
    /// Restrict negotiation to T=1
    T1,
}

/// Action applied to the card when a handle is disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reset the card
    Reset,
    /// Leave the card powered in its current state
    Leave,
    /// Fully power the card down
    Unpower,
    /// Eject the card if the reader supports it
    Eject,
}

/// Entry point to a native smart-card service.
pub trait CardService {
    /// Terminal type produced by this service
    type Terminal: Terminal;

    /// Lists the terminals currently known to the service.
    fn terminals(&self) -> Result<Vec<Self::Terminal>, ServiceError>;

    /// Opens a terminal handle backed by an independent native context,
    /// dedicated to blocking monitoring calls.
    ///
    /// Some native stacks do not isolate a blocking presence wait from a
    /// concurrent transmit issued on the same context. Callers fall back to
    /// sharing the command terminal when no second context can be obtained.
    fn monitoring_terminal(&self, name: &str) -> Result<Self::Terminal, ServiceError>;

    /// Drops any cached native context so the next call re-acquires it.
    ///
    /// Required after the native service has been stopped or restarted
    /// out-of-band, which invalidates outstanding handles.
    fn invalidate(&self);

    /// Whether [`Disposition::Unpower`] and [`Disposition::Eject`] are
    /// honored by this provider.
    fn supports_extended_dispositions(&self) -> bool;
}

/// One physical terminal as seen by the native service.
///
/// Cloning yields another handle onto the same terminal and native context.
pub trait Terminal: Clone {
    /// Card handle type produced by [`Terminal::connect`]
    type Card: CardHandle;

    /// The terminal name as reported by the native service.
    fn name(&self) -> &str;

    /// Connects to the inserted card.
    fn connect(&self, protocol: ProtocolFilter) -> Result<Self::Card, ServiceError>;

    /// Connects directly to the reader without requiring a card.
    ///
    /// Used for control (escape) commands only; no protocol is negotiated.
    fn connect_direct(&self) -> Result<Self::Card, ServiceError>;

    /// Tells whether a card is currently present.
    fn is_card_present(&self) -> Result<bool, ServiceError>;

    /// Blocks until a card is present or the timeout elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_for_card_present(&self, timeout: Duration) -> Result<bool, ServiceError>;

    /// Blocks until no card is present or the timeout elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_for_card_absent(&self, timeout: Duration) -> Result<bool, ServiceError>;
}

/// A live connection to a card (or, for direct connections, to the reader).
pub trait CardHandle {
    /// The answer-to-reset returned by the card at power-up.
    fn atr(&self) -> Result<Vec<u8>, ServiceError>;

    /// Transmits an APDU and returns the raw response bytes.
    fn transmit(&self, command: &[u8]) -> Result<Vec<u8>, ServiceError>;

    /// Sends a control (escape) command to the reader.
    fn control(&self, code: u32, command: &[u8]) -> Result<Vec<u8>, ServiceError>;

    /// Requests exclusive access to the card.
    fn begin_exclusive(&mut self) -> Result<(), ServiceError>;

    /// Releases exclusive access to the card.
    fn end_exclusive(&mut self) -> Result<(), ServiceError>;

    /// Disconnects, applying the provided disposition.
    fn disconnect(self, disposition: Disposition) -> Result<(), ServiceError>;
}

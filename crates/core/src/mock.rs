//! In-memory service implementation for tests
//!
//! Scriptable doubles for the service traits: presence toggling, injectable
//! faults, canned APDU responses and call counters. Used by the
//! `cardmux-pcsc` test suites; not intended for production use.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::ServiceError;
use crate::terminal::{CardHandle, CardService, Disposition, ProtocolFilter, Terminal};

/// Scriptable [`CardService`] double.
#[derive(Debug, Clone, Default)]
pub struct MockService {
    inner: Arc<ServiceState>,
}

#[derive(Debug, Default)]
struct ServiceState {
    terminals: Mutex<Vec<MockTerminal>>,
    terminals_error: Mutex<Option<ServiceError>>,
    monitoring_unavailable: AtomicBool,
    extended_dispositions_unsupported: AtomicBool,
    invalidations: AtomicUsize,
}

impl MockService {
    /// Creates a service with no terminals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service exposing the provided terminal.
    pub fn with_terminal(terminal: MockTerminal) -> Self {
        let service = Self::new();
        service.add_terminal(terminal);
        service
    }

    /// Attaches a terminal to the service.
    pub fn add_terminal(&self, terminal: MockTerminal) {
        self.inner.terminals.lock().push(terminal);
    }

    /// Makes the next [`CardService::terminals`] call fail with the fault.
    pub fn fail_next_enumeration(&self, error: ServiceError) {
        *self.inner.terminals_error.lock() = Some(error);
    }

    /// Makes [`CardService::monitoring_terminal`] fail, forcing callers to
    /// fall back to the shared command context.
    pub fn set_monitoring_unavailable(&self, unavailable: bool) {
        self.inner
            .monitoring_unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    /// Changes whether unpower/eject dispositions are reported as honored.
    pub fn set_extended_dispositions(&self, supported: bool) {
        self.inner
            .extended_dispositions_unsupported
            .store(!supported, Ordering::SeqCst);
    }

    /// Number of times [`CardService::invalidate`] was called.
    pub fn invalidations(&self) -> usize {
        self.inner.invalidations.load(Ordering::SeqCst)
    }
}

impl CardService for MockService {
    type Terminal = MockTerminal;

    fn terminals(&self) -> Result<Vec<MockTerminal>, ServiceError> {
        if let Some(error) = self.inner.terminals_error.lock().take() {
            return Err(error);
        }
        Ok(self.inner.terminals.lock().clone())
    }

    fn monitoring_terminal(&self, name: &str) -> Result<MockTerminal, ServiceError> {
        if self.inner.monitoring_unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::NoService);
        }
        self.inner
            .terminals
            .lock()
            .iter()
            .find(|terminal| terminal.name() == name)
            .cloned()
            .ok_or(ServiceError::NoReadersAvailable)
    }

    fn invalidate(&self) {
        self.inner.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn supports_extended_dispositions(&self) -> bool {
        !self
            .inner
            .extended_dispositions_unsupported
            .load(Ordering::SeqCst)
    }
}

/// Scriptable [`Terminal`] double.
#[derive(Debug, Clone)]
pub struct MockTerminal {
    inner: Arc<TerminalState>,
}

#[derive(Debug)]
struct TerminalState {
    name: String,
    card_present: AtomicBool,
    atr: Mutex<Vec<u8>>,
    connects: AtomicUsize,
    direct_connects: AtomicUsize,
    connect_error: Mutex<Option<ServiceError>>,
    transmit_error: Mutex<Option<ServiceError>>,
    transmit_response: Mutex<Vec<u8>>,
    transmits: AtomicUsize,
    disconnect_error: Mutex<Option<ServiceError>>,
    dispositions: Mutex<Vec<Disposition>>,
    exclusive: AtomicBool,
    exclusive_error: Mutex<Option<ServiceError>>,
    presence_error: Mutex<Option<ServiceError>>,
    control_codes: Mutex<Vec<u32>>,
}

impl MockTerminal {
    /// Sample MIFARE Ultralight answer-to-reset used as the default ATR.
    pub const DEFAULT_ATR: [u8; 20] = [
        0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x03,
        0x00, 0x00, 0x00, 0x00, 0x68,
    ];

    /// Creates a terminal with the provided name and no card present.
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(TerminalState {
                name: name.to_owned(),
                card_present: AtomicBool::new(false),
                atr: Mutex::new(Self::DEFAULT_ATR.to_vec()),
                connects: AtomicUsize::new(0),
                direct_connects: AtomicUsize::new(0),
                connect_error: Mutex::new(None),
                transmit_error: Mutex::new(None),
                transmit_response: Mutex::new(vec![0x90, 0x00]),
                transmits: AtomicUsize::new(0),
                disconnect_error: Mutex::new(None),
                dispositions: Mutex::new(Vec::new()),
                exclusive: AtomicBool::new(false),
                exclusive_error: Mutex::new(None),
                presence_error: Mutex::new(None),
                control_codes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Simulates a card insertion.
    pub fn insert_card(&self) {
        self.inner.card_present.store(true, Ordering::SeqCst);
    }

    /// Simulates a card removal.
    pub fn remove_card(&self) {
        self.inner.card_present.store(false, Ordering::SeqCst);
    }

    /// Replaces the answer-to-reset returned by connected cards.
    pub fn set_atr(&self, atr: Vec<u8>) {
        *self.inner.atr.lock() = atr;
    }

    /// Makes the next connect attempt fail with the fault.
    pub fn fail_next_connect(&self, error: ServiceError) {
        *self.inner.connect_error.lock() = Some(error);
    }

    /// Makes every transmission fail with the fault until cleared.
    pub fn set_transmit_error(&self, error: Option<ServiceError>) {
        *self.inner.transmit_error.lock() = error;
    }

    /// Replaces the canned transmission response.
    pub fn set_transmit_response(&self, response: Vec<u8>) {
        *self.inner.transmit_response.lock() = response;
    }

    /// Makes the next disconnect fail with the fault.
    pub fn fail_next_disconnect(&self, error: ServiceError) {
        *self.inner.disconnect_error.lock() = Some(error);
    }

    /// Makes the next exclusivity toggle fail with the fault.
    pub fn fail_next_exclusive(&self, error: ServiceError) {
        *self.inner.exclusive_error.lock() = Some(error);
    }

    /// Makes the next presence query or wait fail with the fault.
    pub fn fail_next_presence(&self, error: ServiceError) {
        *self.inner.presence_error.lock() = Some(error);
    }

    /// Number of card connections opened so far.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of direct (card-less) connections opened so far.
    pub fn direct_connect_count(&self) -> usize {
        self.inner.direct_connects.load(Ordering::SeqCst)
    }

    /// Number of transmissions attempted so far.
    pub fn transmit_count(&self) -> usize {
        self.inner.transmits.load(Ordering::SeqCst)
    }

    /// Dispositions applied by disconnects, in order.
    pub fn dispositions(&self) -> Vec<Disposition> {
        self.inner.dispositions.lock().clone()
    }

    /// Control codes received, in order.
    pub fn control_codes(&self) -> Vec<u32> {
        self.inner.control_codes.lock().clone()
    }

    /// Whether the card is currently held exclusively.
    pub fn is_exclusive(&self) -> bool {
        self.inner.exclusive.load(Ordering::SeqCst)
    }
}

impl Terminal for MockTerminal {
    type Card = MockCard;

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn connect(&self, _protocol: ProtocolFilter) -> Result<MockCard, ServiceError> {
        if let Some(error) = self.inner.connect_error.lock().take() {
            return Err(error);
        }
        if !self.inner.card_present.load(Ordering::SeqCst) {
            return Err(ServiceError::NoSmartcard);
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockCard {
            terminal: Arc::clone(&self.inner),
        })
    }

    fn connect_direct(&self) -> Result<MockCard, ServiceError> {
        if let Some(error) = self.inner.connect_error.lock().take() {
            return Err(error);
        }
        self.inner.direct_connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockCard {
            terminal: Arc::clone(&self.inner),
        })
    }

    fn is_card_present(&self) -> Result<bool, ServiceError> {
        if let Some(error) = self.inner.presence_error.lock().take() {
            return Err(error);
        }
        Ok(self.inner.card_present.load(Ordering::SeqCst))
    }

    fn wait_for_card_present(&self, timeout: Duration) -> Result<bool, ServiceError> {
        if let Some(error) = self.inner.presence_error.lock().take() {
            return Err(error);
        }
        if !self.inner.card_present.load(Ordering::SeqCst) {
            thread::sleep(timeout);
        }
        Ok(self.inner.card_present.load(Ordering::SeqCst))
    }

    fn wait_for_card_absent(&self, timeout: Duration) -> Result<bool, ServiceError> {
        if let Some(error) = self.inner.presence_error.lock().take() {
            return Err(error);
        }
        if self.inner.card_present.load(Ordering::SeqCst) {
            thread::sleep(timeout);
        }
        Ok(!self.inner.card_present.load(Ordering::SeqCst))
    }
}

/// [`CardHandle`] double produced by [`MockTerminal`].
#[derive(Debug)]
pub struct MockCard {
    terminal: Arc<TerminalState>,
}

impl CardHandle for MockCard {
    fn atr(&self) -> Result<Vec<u8>, ServiceError> {
        Ok(self.terminal.atr.lock().clone())
    }

    fn transmit(&self, _command: &[u8]) -> Result<Vec<u8>, ServiceError> {
        self.terminal.transmits.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.terminal.transmit_error.lock().clone() {
            return Err(error);
        }
        Ok(self.terminal.transmit_response.lock().clone())
    }

    fn control(&self, code: u32, command: &[u8]) -> Result<Vec<u8>, ServiceError> {
        self.terminal.control_codes.lock().push(code);
        Ok(command.to_vec())
    }

    fn begin_exclusive(&mut self) -> Result<(), ServiceError> {
        if let Some(error) = self.terminal.exclusive_error.lock().take() {
            return Err(error);
        }
        self.terminal.exclusive.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn end_exclusive(&mut self) -> Result<(), ServiceError> {
        if let Some(error) = self.terminal.exclusive_error.lock().take() {
            return Err(error);
        }
        self.terminal.exclusive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(self, disposition: Disposition) -> Result<(), ServiceError> {
        self.terminal.dispositions.lock().push(disposition);
        self.terminal.exclusive.store(false, Ordering::SeqCst);
        if let Some(error) = self.terminal.disconnect_error.lock().take() {
            return Err(error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_requires_a_card() {
        let terminal = MockTerminal::new("Test Reader 0");
        assert_eq!(
            terminal.connect(ProtocolFilter::Any).unwrap_err(),
            ServiceError::NoSmartcard
        );
        terminal.insert_card();
        assert!(terminal.connect(ProtocolFilter::Any).is_ok());
        assert_eq!(terminal.connect_count(), 1);
    }

    #[test]
    fn service_lists_attached_terminals() {
        let service = MockService::with_terminal(MockTerminal::new("Test Reader 0"));
        service.add_terminal(MockTerminal::new("Test Reader 1"));
        let names: Vec<_> = service
            .terminals()
            .unwrap()
            .iter()
            .map(|terminal| terminal.name().to_owned())
            .collect();
        assert_eq!(names, ["Test Reader 0", "Test Reader 1"]);
    }

    #[test]
    fn enumeration_fault_is_one_shot() {
        let service = MockService::new();
        service.fail_next_enumeration(ServiceError::CommError);
        assert_eq!(service.terminals().unwrap_err(), ServiceError::CommError);
        assert!(service.terminals().is_ok());
    }
}

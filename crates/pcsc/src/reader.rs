//! Reader session state machine

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use cardmux_core::{CardHandle, Disposition, ProtocolFilter, ServiceError, Terminal};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::{DisconnectionMode, IsoProtocol, SharingMode};
use crate::error::Error;
use crate::filter::ContactlessFilter;
use crate::platform::Platform;
use crate::registry::ProtocolRegistry;
use crate::timestamps::{ActivityLog, DETECTION_START, SESSION_END};

/// Harmless status-query APDU (GET RESPONSE) used to probe card presence by
/// transmission.
const PING_APDU: [u8; 5] = [0x00, 0xC0, 0x00, 0x00, 0x00];

/// Interval between transmission probes when waiting for removal after an
/// unpowering disconnect.
const REMOVAL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One live session with a connected card: the native handle plus the
/// power-on data captured at connect time.
struct CardConnection<C> {
    handle: C,
    atr: Vec<u8>,
}

/// A reader session over one physical terminal.
///
/// The session owns two handles onto the same terminal: one for
/// connect/transmit operations and one, backed by an independent native
/// context when the provider can supply it, for blocking monitoring calls.
/// Some native stacks do not isolate a blocking wait from a concurrent
/// transmit on a single context; the second handle is a resilience measure,
/// and monitoring and transmission must still not be interleaved by the
/// caller.
///
/// All operations take `&self`, so one session can be shared (behind an
/// `Arc`, typically) between an application thread driving the channel and
/// a monitoring thread blocked in one of the wait loops. Cancellation is
/// cooperative: the wait loops re-poll on a bounded cycle and recheck a
/// flag between iterations, so stopping a wait takes effect within one
/// cycle at worst.
pub struct PcscReader<T: Terminal> {
    name: String,
    terminal: T,
    monitoring_terminal: T,
    registry: Arc<ProtocolRegistry>,
    filter: Arc<ContactlessFilter>,
    activity: ActivityLog,
    platform: Platform,
    extended_dispositions: bool,
    monitoring_cycle: Duration,
    connection: Mutex<Option<CardConnection<T::Card>>>,
    contactless: Mutex<Option<bool>>,
    protocol: Mutex<IsoProtocol>,
    mode_exclusive: AtomicBool,
    disconnection_mode: Mutex<DisconnectionMode>,
    insertion_loop: AtomicBool,
    removal_loop: AtomicBool,
}

impl<T: Terminal> fmt::Debug for PcscReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscReader")
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("monitoring_cycle", &self.monitoring_cycle)
            .finish_non_exhaustive()
    }
}

impl<T: Terminal> PcscReader<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        terminal: T,
        monitoring_terminal: T,
        registry: Arc<ProtocolRegistry>,
        filter: Arc<ContactlessFilter>,
        activity: ActivityLog,
        platform: Platform,
        extended_dispositions: bool,
        monitoring_cycle: Duration,
    ) -> Self {
        let name = terminal.name().to_owned();
        Self {
            name,
            terminal,
            monitoring_terminal,
            registry,
            filter,
            activity,
            platform,
            extended_dispositions,
            monitoring_cycle,
            connection: Mutex::new(None),
            contactless: Mutex::new(None),
            protocol: Mutex::new(IsoProtocol::default()),
            mode_exclusive: AtomicBool::new(true),
            disconnection_mode: Mutex::new(DisconnectionMode::default()),
            insertion_loop: AtomicBool::new(false),
            removal_loop: AtomicBool::new(false),
        }
    }

    /// The reader name as reported by the native service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tells whether the reader is contactless.
    ///
    /// Resolved at most once from the name filter, unless the transmission
    /// class was fixed explicitly with [`set_contactless`](Self::set_contactless).
    pub fn is_contactless(&self) -> bool {
        let mut contactless = self.contactless.lock();
        *contactless.get_or_insert_with(|| self.filter.is_contactless(&self.name))
    }

    /// Overrides the transmission class determined from the reader name.
    pub fn set_contactless(&self, contactless: bool) -> &Self {
        info!(reader = %self.name, contactless, "set contactless type");
        *self.contactless.lock() = Some(contactless);
        self
    }

    /// Changes the sharing mode used when opening the physical channel.
    ///
    /// Switching to [`SharingMode::Shared`] with a card connected drops
    /// exclusive access immediately; a failure to do so is a reader I/O
    /// failure.
    pub fn set_sharing_mode(&self, sharing_mode: SharingMode) -> Result<&Self, Error> {
        info!(reader = %self.name, ?sharing_mode, "set sharing mode");
        match sharing_mode {
            SharingMode::Shared => {
                if let Some(connection) = self.connection.lock().as_mut() {
                    connection.handle.end_exclusive().map_err(|error| {
                        Error::reader_io(&self.name, "could not disable exclusive mode", error)
                    })?;
                }
                self.mode_exclusive.store(false, Ordering::SeqCst);
            }
            SharingMode::Exclusive => self.mode_exclusive.store(true, Ordering::SeqCst),
        }
        Ok(self)
    }

    /// Changes the protocol used when connecting to the card.
    pub fn set_iso_protocol(&self, iso_protocol: IsoProtocol) -> &Self {
        info!(reader = %self.name, ?iso_protocol, value = iso_protocol.value(), "set ISO protocol");
        *self.protocol.lock() = iso_protocol;
        self
    }

    /// Changes the action taken on the card at disconnection time.
    pub fn set_disconnection_mode(&self, disconnection_mode: DisconnectionMode) -> &Self {
        info!(reader = %self.name, ?disconnection_mode, "set disconnection mode");
        *self.disconnection_mode.lock() = disconnection_mode;
        self
    }

    /// Tells whether a rule is registered and active for the protocol.
    pub fn is_protocol_supported(&self, reader_protocol: &str) -> bool {
        self.registry.is_supported(reader_protocol)
    }

    /// Acknowledges protocol activation; takes no action.
    pub fn activate_protocol(&self, reader_protocol: &str) {
        trace!(reader = %self.name, protocol = reader_protocol, "activating protocol takes no action");
    }

    /// Acknowledges protocol de-activation; takes no action.
    pub fn deactivate_protocol(&self, reader_protocol: &str) {
        trace!(reader = %self.name, protocol = reader_protocol, "de-activating protocol takes no action");
    }

    /// Tells whether the connected card's power-on data matches the rule
    /// registered for the protocol.
    ///
    /// The test is a full-string match of the rule against the uppercase
    /// hex encoding of the ATR; a missing or disabled rule never matches.
    /// Several rules may match the same ATR, in which case precedence is
    /// the caller's concern.
    pub fn is_current_protocol(&self, reader_protocol: &str) -> Result<bool, Error> {
        let Some(rule) = self.registry.rule(reader_protocol) else {
            return Ok(false);
        };
        let connection = self.connection.lock();
        let connection = connection
            .as_ref()
            .ok_or_else(|| Error::IllegalState(format!("{}: no card connected", self.name)))?;
        Ok(rule.is_match(&hex::encode_upper(&connection.atr)))
    }

    /// Opens the physical channel with the configured protocol and sharing
    /// mode.
    ///
    /// No-op if a card is already connected: repeated calls leave exactly
    /// one open channel and issue exactly one underlying connect.
    pub fn open_physical_channel(&self) -> Result<(), Error> {
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Ok(());
        }
        let protocol = *self.protocol.lock();
        debug!(reader = %self.name, protocol = protocol.value(), "open card physical channel");
        let mut handle = self.terminal.connect(protocol.into()).map_err(|error| {
            if matches!(error, ServiceError::NoSmartcard | ServiceError::RemovedCard) {
                Error::card_io(&self.name, "card removed", error)
            } else {
                Error::reader_io(&self.name, "error while opening physical channel", error)
            }
        })?;
        if self.mode_exclusive.load(Ordering::SeqCst) {
            handle.begin_exclusive().map_err(|error| {
                Error::reader_io(&self.name, "error while opening physical channel", error)
            })?;
            debug!(reader = %self.name, "card physical channel open in exclusive mode");
        } else {
            debug!(reader = %self.name, "card physical channel open in shared mode");
        }
        let atr = handle
            .atr()
            .map_err(|error| Error::card_io(&self.name, "could not read power-on data", error))?;
        self.activity.add_entry(DETECTION_START);
        *connection = Some(CardConnection { handle, atr });
        Ok(())
    }

    /// Closes the physical channel, applying the configured disconnection
    /// mode.
    ///
    /// The connection is cleared even when the underlying disconnect fails,
    /// so a subsequent [`is_physical_channel_open`](Self::is_physical_channel_open)
    /// always reports false. No-op if no card is connected.
    pub fn close_physical_channel(&self) -> Result<(), Error> {
        self.disconnect()
    }

    /// Tells whether the physical channel is open.
    pub fn is_physical_channel_open(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Queries card presence from the native service.
    ///
    /// Any open channel is closed (best effort) as a side effect, so that a
    /// freshly reinserted card is redetected through a clean channel on the
    /// next open instead of being masked by a stale one.
    pub fn check_card_presence(&self) -> Result<bool, Error> {
        let present = self.terminal.is_card_present().map_err(|error| {
            Error::reader_io(&self.name, "error while checking card presence", error)
        })?;
        self.close_physical_channel_safely();
        Ok(present)
    }

    /// Hex-encodes the power-on data (ATR) of the connected card.
    pub fn power_on_data(&self) -> Result<String, Error> {
        let connection = self.connection.lock();
        let connection = connection
            .as_ref()
            .ok_or_else(|| Error::IllegalState(format!("{}: no card connected", self.name)))?;
        Ok(hex::encode_upper(&connection.atr))
    }

    /// Transmits an APDU over the open channel and returns the raw response
    /// bytes unmodified.
    ///
    /// Failures are classified: faults attributable to the card (removed,
    /// transaction not completed, unusable ATR, handle invalidated
    /// mid-transmission) are card I/O failures, everything else is a reader
    /// I/O failure. Calling with no open channel is a card I/O failure
    /// carrying a "null channel" signal, since it usually means the card
    /// went away.
    pub fn transmit_apdu(&self, apdu_command: &[u8]) -> Result<Vec<u8>, Error> {
        if apdu_command.len() < 4 {
            return Err(Error::InvalidArgument(
                "APDU command must be at least 4 bytes long".to_owned(),
            ));
        }
        let connection = self.connection.lock();
        let Some(connection) = connection.as_ref() else {
            return Err(Error::card_io_bare(&self.name, "null channel"));
        };
        self.activity.add_entry(apdu_command[1]);
        let response = connection.handle.transmit(apdu_command).map_err(|error| {
            let message = error.to_string();
            if error.is_card_fault() {
                Error::card_io(&self.name, message, error)
            } else {
                Error::reader_io(&self.name, message, error)
            }
        })?;
        self.activity.add_entry(apdu_command[1]);
        Ok(response)
    }

    /// Sends a control (escape) command to the reader and returns the raw
    /// response.
    ///
    /// Reuses the live card connection when one exists; otherwise a
    /// transient direct (card-less) connection is opened for the command
    /// and released right after.
    pub fn transmit_control_command(
        &self,
        command_id: u32,
        command: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let control_code = self.platform.control_code(command_id);
        let connection = self.connection.lock();
        match connection.as_ref() {
            Some(connection) => connection
                .handle
                .control(control_code, command)
                .map_err(|error| Error::reader_io(&self.name, "reader failure", error)),
            None => {
                let direct = self
                    .terminal
                    .connect_direct()
                    .map_err(|error| Error::reader_io(&self.name, "reader failure", error))?;
                let response = direct
                    .control(control_code, command)
                    .map_err(|error| Error::reader_io(&self.name, "reader failure", error))?;
                direct
                    .disconnect(Disposition::Leave)
                    .map_err(|error| Error::reader_io(&self.name, "reader failure", error))?;
                Ok(response)
            }
        }
    }

    /// The platform's well-known CCID escape command identifier.
    pub const fn ioctl_ccid_escape_command_id(&self) -> u32 {
        self.platform.ioctl_ccid_escape_command_id()
    }

    /// Blocks until a card is inserted.
    ///
    /// The wait re-polls on the configured monitoring cycle so that
    /// [`stop_wait_for_card_insertion`](Self::stop_wait_for_card_insertion)
    /// is observed within one cycle; a stopped wait returns a cancellation,
    /// and a native failure during the wait is a reader I/O failure.
    pub fn wait_for_card_insertion(&self) -> Result<(), Error> {
        trace!(
            reader = %self.name,
            cycle_ms = self.monitoring_cycle.as_millis() as u64,
            "start waiting card insertion"
        );
        self.insertion_loop.store(true, Ordering::SeqCst);
        if self.platform.polls_for_insertion() {
            self.wait_for_card_insertion_by_polling()
        } else {
            self.wait_for_card_insertion_blocking()
        }
    }

    /// Stops an ongoing insertion wait; effective within one cycle.
    pub fn stop_wait_for_card_insertion(&self) {
        self.insertion_loop.store(false, Ordering::SeqCst);
    }

    /// Blocks until the card is removed.
    ///
    /// When the disconnection mode is [`DisconnectionMode::Unpower`] the
    /// native absence wait is unreliable after the power-down, so removal
    /// is detected by probing the card with a harmless status query at a
    /// short fixed interval and treating the first transmission failure as
    /// proof of removal. The physical channel is closed (best effort) on
    /// every exit path; a stopped wait returns a cancellation after that
    /// cleanup.
    pub fn wait_for_card_removal(&self) -> Result<(), Error> {
        trace!(reader = %self.name, "start waiting card removal");
        self.removal_loop.store(true, Ordering::SeqCst);
        let result = if *self.disconnection_mode.lock() == DisconnectionMode::Unpower {
            self.wait_for_card_removal_by_polling();
            Ok(())
        } else {
            self.wait_for_card_removal_blocking()
        };
        self.close_physical_channel_safely();
        result?;
        if self.removal_loop.load(Ordering::SeqCst) {
            trace!(reader = %self.name, "card removed");
            Ok(())
        } else {
            trace!(reader = %self.name, "waiting card removal stopped");
            Err(Error::cancelled(
                &self.name,
                "the wait for the card removal task has been cancelled",
            ))
        }
    }

    /// Stops an ongoing removal wait; effective within one cycle.
    pub fn stop_wait_for_card_removal(&self) {
        self.removal_loop.store(false, Ordering::SeqCst);
    }

    /// Monitors card presence while upper layers process card data.
    pub fn monitor_card_presence_during_processing(&self) -> Result<(), Error> {
        self.wait_for_card_removal()
    }

    /// Stops the processing-time presence monitoring.
    pub fn stop_card_presence_monitoring_during_processing(&self) {
        self.stop_wait_for_card_removal();
    }

    fn wait_for_card_insertion_blocking(&self) -> Result<(), Error> {
        while self.insertion_loop.load(Ordering::SeqCst) {
            let inserted = self
                .monitoring_terminal
                .wait_for_card_present(self.monitoring_cycle)
                .map_err(|error| {
                    Error::reader_io(
                        &self.name,
                        "an error occurred while waiting for a card insertion",
                        error,
                    )
                })?;
            if inserted {
                trace!(reader = %self.name, "card inserted");
                return Ok(());
            }
        }
        trace!(reader = %self.name, "waiting card insertion stopped");
        Err(Error::cancelled(
            &self.name,
            "the wait for a card insertion task has been cancelled",
        ))
    }

    /// Insertion detection for platforms whose blocking wait is unreliable:
    /// a non-blocking presence test at a short fixed interval.
    fn wait_for_card_insertion_by_polling(&self) -> Result<(), Error> {
        while self.insertion_loop.load(Ordering::SeqCst) {
            let present = self.terminal.is_card_present().map_err(|error| {
                Error::reader_io(
                    &self.name,
                    "an error occurred while waiting for a card insertion",
                    error,
                )
            })?;
            if present {
                trace!(reader = %self.name, "card inserted");
                return Ok(());
            }
            thread::sleep(Platform::INSERTION_POLL_INTERVAL);
        }
        trace!(reader = %self.name, "waiting card insertion stopped");
        Err(Error::cancelled(
            &self.name,
            "the wait for a card insertion task has been cancelled",
        ))
    }

    fn wait_for_card_removal_by_polling(&self) {
        while self.removal_loop.load(Ordering::SeqCst) {
            if let Err(error) = self.transmit_apdu(&PING_APDU) {
                trace!(reader = %self.name, %error, "expected I/O failure while waiting for card removal");
                return;
            }
            thread::sleep(REMOVAL_POLL_INTERVAL);
        }
    }

    fn wait_for_card_removal_blocking(&self) -> Result<(), Error> {
        while self.removal_loop.load(Ordering::SeqCst) {
            let removed = self
                .monitoring_terminal
                .wait_for_card_absent(self.monitoring_cycle)
                .map_err(|error| {
                    Error::reader_io(
                        &self.name,
                        "an error occurred while waiting for the card removal",
                        error,
                    )
                })?;
            if removed {
                return Ok(());
            }
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<(), Error> {
        let Some(connection) = self.connection.lock().take() else {
            debug!(reader = %self.name, "no card connected when closing physical channel");
            return Ok(());
        };
        let disconnection_mode = *self.disconnection_mode.lock();
        let result = self.apply_disposition(connection.handle, disconnection_mode);
        self.activity.add_entry(SESSION_END);
        result
    }

    fn apply_disposition(
        &self,
        handle: T::Card,
        disconnection_mode: DisconnectionMode,
    ) -> Result<(), Error> {
        if matches!(
            disconnection_mode,
            DisconnectionMode::Unpower | DisconnectionMode::Eject
        ) && !self.extended_dispositions
        {
            return Err(Error::reader_io_bare(
                &self.name,
                format!("disposition {disconnection_mode:?} is not supported by the provider"),
            ));
        }
        handle
            .disconnect(disconnection_mode.into())
            .map_err(|error| {
                Error::reader_io(&self.name, "error while closing physical channel", error)
            })?;
        if disconnection_mode == DisconnectionMode::Unpower {
            self.reset_reader_state();
        }
        Ok(())
    }

    /// Reconnects and immediately releases the card after an unpowering
    /// disconnect; some stacks otherwise misreport presence on the next
    /// detection cycle.
    fn reset_reader_state(&self) {
        if let Ok(handle) = self.terminal.connect(ProtocolFilter::Any) {
            let _ = handle.disconnect(Disposition::Leave);
        }
    }

    fn close_physical_channel_safely(&self) {
        if let Err(error) = self.disconnect() {
            warn!(reader = %self.name, %error, "error while disconnecting card");
        }
    }
}

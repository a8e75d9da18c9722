//! Default service provider backed by the platform PC/SC stack

use std::ffi::CString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cardmux_core::{CardHandle, CardService, Disposition, ProtocolFilter, ServiceError, Terminal};
use parking_lot::Mutex;
use pcsc::{Attribute, Card, Context, Protocols, ReaderState, Scope, ShareMode, State};

/// Card service provider backed by the `pcsc` crate.
///
/// The native context is established lazily and cached;
/// [`CardService::invalidate`] drops it so that the next call re-acquires a
/// fresh one, which is required after the resource manager has been stopped
/// or restarted out-of-band.
#[derive(Default)]
pub struct PcscService {
    context: Mutex<Option<Arc<Context>>>,
}

impl fmt::Debug for PcscService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscService").finish_non_exhaustive()
    }
}

impl PcscService {
    /// Creates a provider with no native context established yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn context(&self) -> Result<Arc<Context>, ServiceError> {
        let mut context = self.context.lock();
        if let Some(context) = context.as_ref() {
            return Ok(Arc::clone(context));
        }
        let established = Arc::new(Context::establish(Scope::User).map_err(map_error)?);
        *context = Some(Arc::clone(&established));
        Ok(established)
    }
}

impl CardService for PcscService {
    type Terminal = PcscTerminal;

    fn terminals(&self) -> Result<Vec<PcscTerminal>, ServiceError> {
        let context = self.context()?;
        let mut buffer = vec![0u8; context.list_readers_len().map_err(map_error)?];
        let names: Vec<CString> = context
            .list_readers(&mut buffer)
            .map_err(map_error)?
            .map(CString::from)
            .collect();
        Ok(names
            .into_iter()
            .map(|name| PcscTerminal::new(Arc::clone(&context), name))
            .collect())
    }

    fn monitoring_terminal(&self, name: &str) -> Result<PcscTerminal, ServiceError> {
        // a dedicated context keeps blocking status waits from contending
        // with transmissions issued on the command context
        let context = Arc::new(Context::establish(Scope::User).map_err(map_error)?);
        let name = CString::new(name)
            .map_err(|_| ServiceError::Other("reader name contains a NUL byte".to_owned()))?;
        Ok(PcscTerminal::new(context, name))
    }

    fn invalidate(&self) {
        *self.context.lock() = None;
    }

    fn supports_extended_dispositions(&self) -> bool {
        true
    }
}

/// One PC/SC reader as listed by the resource manager.
#[derive(Clone)]
pub struct PcscTerminal {
    context: Arc<Context>,
    name: CString,
    display_name: String,
}

impl fmt::Debug for PcscTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTerminal")
            .field("name", &self.display_name)
            .finish_non_exhaustive()
    }
}

impl PcscTerminal {
    fn new(context: Arc<Context>, name: CString) -> Self {
        let display_name = name.to_string_lossy().into_owned();
        Self {
            context,
            name,
            display_name,
        }
    }

    /// Blocks until the reader reaches the wanted presence state or the
    /// timeout elapses; a timeout is a normal "not yet" result.
    fn await_presence(&self, timeout: Duration, wanted_present: bool) -> Result<bool, ServiceError> {
        let mut states = [ReaderState::new(self.name.clone(), State::UNAWARE)];
        self.context
            .get_status_change(Duration::ZERO, &mut states)
            .map_err(map_error)?;
        if states[0].event_state().contains(State::PRESENT) == wanted_present {
            return Ok(true);
        }
        states[0].sync_current_state();
        match self.context.get_status_change(timeout, &mut states) {
            Ok(()) => Ok(states[0].event_state().contains(State::PRESENT) == wanted_present),
            Err(pcsc::Error::Timeout) => Ok(false),
            Err(error) => Err(map_error(error)),
        }
    }
}

impl Terminal for PcscTerminal {
    type Card = PcscCard;

    fn name(&self) -> &str {
        &self.display_name
    }

    fn connect(&self, protocol: ProtocolFilter) -> Result<PcscCard, ServiceError> {
        let protocols = protocols(protocol);
        let card = self
            .context
            .connect(&self.name, ShareMode::Shared, protocols)
            .map_err(map_error)?;
        Ok(PcscCard { card, protocols })
    }

    fn connect_direct(&self) -> Result<PcscCard, ServiceError> {
        let card = self
            .context
            .connect(&self.name, ShareMode::Direct, Protocols::empty())
            .map_err(map_error)?;
        Ok(PcscCard {
            card,
            protocols: Protocols::empty(),
        })
    }

    fn is_card_present(&self) -> Result<bool, ServiceError> {
        let mut states = [ReaderState::new(self.name.clone(), State::UNAWARE)];
        self.context
            .get_status_change(Duration::ZERO, &mut states)
            .map_err(map_error)?;
        Ok(states[0].event_state().contains(State::PRESENT))
    }

    fn wait_for_card_present(&self, timeout: Duration) -> Result<bool, ServiceError> {
        self.await_presence(timeout, true)
    }

    fn wait_for_card_absent(&self, timeout: Duration) -> Result<bool, ServiceError> {
        self.await_presence(timeout, false)
    }
}

/// A live PC/SC card (or direct reader) connection.
pub struct PcscCard {
    card: Card,
    protocols: Protocols,
}

impl fmt::Debug for PcscCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscCard").finish_non_exhaustive()
    }
}

impl CardHandle for PcscCard {
    fn atr(&self) -> Result<Vec<u8>, ServiceError> {
        let mut buffer = [0u8; pcsc::MAX_ATR_SIZE];
        let atr = self
            .card
            .get_attribute(Attribute::AtrString, &mut buffer)
            .map_err(map_error)?;
        Ok(atr.to_vec())
    }

    fn transmit(&self, command: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let mut buffer = vec![0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];
        let response = self
            .card
            .transmit(command, &mut buffer)
            .map_err(map_error)?;
        Ok(response.to_vec())
    }

    fn control(&self, code: u32, command: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let mut buffer = vec![0u8; pcsc::MAX_BUFFER_SIZE];
        let response = self
            .card
            .control(code.into(), command, &mut buffer)
            .map_err(map_error)?;
        Ok(response.to_vec())
    }

    fn begin_exclusive(&mut self) -> Result<(), ServiceError> {
        self.card
            .reconnect(ShareMode::Exclusive, self.protocols, pcsc::Disposition::LeaveCard)
            .map_err(map_error)
    }

    fn end_exclusive(&mut self) -> Result<(), ServiceError> {
        self.card
            .reconnect(ShareMode::Shared, self.protocols, pcsc::Disposition::LeaveCard)
            .map_err(map_error)
    }

    fn disconnect(self, disposition: Disposition) -> Result<(), ServiceError> {
        self.card
            .disconnect(dispose(disposition))
            .map_err(|(_, error)| map_error(error))
    }
}

const fn protocols(protocol: ProtocolFilter) -> Protocols {
    match protocol {
        ProtocolFilter::Any => Protocols::ANY,
        ProtocolFilter::T0 => Protocols::T0,
        ProtocolFilter::T1 => Protocols::T1,
    }
}

const fn dispose(disposition: Disposition) -> pcsc::Disposition {
    match disposition {
        Disposition::Reset => pcsc::Disposition::ResetCard,
        Disposition::Leave => pcsc::Disposition::LeaveCard,
        Disposition::Unpower => pcsc::Disposition::UnpowerCard,
        Disposition::Eject => pcsc::Disposition::EjectCard,
    }
}

/// Maps a native PC/SC fault onto the structured vocabulary.
///
/// Codes without a dedicated variant keep their native description so that
/// the message-based fallback triage still sees the original wording.
fn map_error(error: pcsc::Error) -> ServiceError {
    match error {
        pcsc::Error::NoReadersAvailable | pcsc::Error::UnknownReader => {
            ServiceError::NoReadersAvailable
        }
        pcsc::Error::NoService => ServiceError::NoService,
        pcsc::Error::ServiceStopped => ServiceError::ServiceStopped,
        pcsc::Error::CommError => ServiceError::CommError,
        pcsc::Error::RemovedCard => ServiceError::RemovedCard,
        pcsc::Error::NoSmartcard => ServiceError::NoSmartcard,
        pcsc::Error::ResetCard => ServiceError::ResetCard,
        pcsc::Error::InvalidAtr => ServiceError::InvalidAtr,
        pcsc::Error::NotTransacted => ServiceError::NotTransacted,
        pcsc::Error::SharingViolation => ServiceError::SharingViolation,
        pcsc::Error::InvalidHandle | pcsc::Error::InvalidValue | pcsc::Error::InvalidParameter => {
            ServiceError::InvalidState
        }
        pcsc::Error::Timeout => ServiceError::Timeout,
        pcsc::Error::UnsupportedFeature => ServiceError::Unsupported("native feature"),
        other => ServiceError::Other(other.to_string()),
    }
}

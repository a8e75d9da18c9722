//! Plugin core and terminal enumeration

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cardmux_core::{CardService, ServiceError, Terminal};
use tracing::{debug, error, info, trace, warn};

use crate::error::Error;
use crate::filter::ContactlessFilter;
use crate::platform::Platform;
use crate::reader::PcscReader;
use crate::registry::ProtocolRegistry;
use crate::timestamps::ActivityLog;

/// Cycle at which the host framework is expected to poll reader
/// attachment.
const READER_MONITORING_CYCLE: Duration = Duration::from_secs(1);

/// The PC/SC plugin: enumerates terminals and builds reader sessions.
///
/// Built once by [`crate::PcscPluginBuilder`] and owned by the application;
/// every reader session it produces shares the plugin's protocol rule
/// registry, contactless name filter and activity log.
pub struct PcscPlugin<S: CardService> {
    name: String,
    service: S,
    registry: Arc<ProtocolRegistry>,
    filter: Arc<ContactlessFilter>,
    activity: ActivityLog,
    platform: Platform,
    monitoring_cycle: Duration,
}

impl<S: CardService> fmt::Debug for PcscPlugin<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscPlugin")
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("monitoring_cycle", &self.monitoring_cycle)
            .finish_non_exhaustive()
    }
}

impl<S: CardService> PcscPlugin<S> {
    pub(crate) fn new(
        name: String,
        service: S,
        registry: Arc<ProtocolRegistry>,
        filter: Arc<ContactlessFilter>,
        activity: ActivityLog,
        platform: Platform,
        monitoring_cycle: Duration,
    ) -> Self {
        Self {
            name,
            service,
            registry,
            filter,
            activity,
            platform,
            monitoring_cycle,
        }
    }

    /// The plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The protocol rule registry shared with every reader session.
    ///
    /// Rules may be merged while sessions are active.
    pub fn protocol_registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// The activity timestamp log fed by every reader session.
    pub fn activity_log(&self) -> &ActivityLog {
        &self.activity
    }

    /// Cycle at which the host framework should re-enumerate readers.
    pub const fn reader_monitoring_cycle(&self) -> Duration {
        READER_MONITORING_CYCLE
    }

    /// Lists the names of the available readers.
    pub fn reader_names(&self) -> Result<HashSet<String>, Error> {
        trace!(plugin = %self.name, "search available reader names");
        let names: HashSet<String> = self
            .terminal_list()?
            .iter()
            .map(|terminal| terminal.name().to_owned())
            .collect();
        trace!(plugin = %self.name, ?names, "readers found");
        Ok(names)
    }

    /// Builds a reader session for every available terminal.
    pub fn readers(&self) -> Result<Vec<PcscReader<S::Terminal>>, Error> {
        info!(plugin = %self.name, "search available readers");
        let readers: Vec<_> = self
            .terminal_list()?
            .into_iter()
            .map(|terminal| self.create_reader(terminal))
            .collect();
        for reader in &readers {
            info!(plugin = %self.name, reader = reader.name(), "reader found");
        }
        Ok(readers)
    }

    /// Builds a reader session for the named terminal, if attached.
    pub fn find_reader(&self, reader_name: &str) -> Result<Option<PcscReader<S::Terminal>>, Error> {
        trace!(plugin = %self.name, reader = reader_name, "search reader");
        let reader = self
            .terminal_list()?
            .into_iter()
            .find(|terminal| terminal.name() == reader_name)
            .map(|terminal| self.create_reader(terminal));
        if reader.is_none() {
            trace!(plugin = %self.name, reader = reader_name, "reader not found");
        }
        Ok(reader)
    }

    fn create_reader(&self, terminal: S::Terminal) -> PcscReader<S::Terminal> {
        // a dedicated monitoring context keeps blocking presence waits off
        // the command path; not every provider can supply one
        let monitoring_terminal = match self.service.monitoring_terminal(terminal.name()) {
            Ok(monitoring_terminal) => {
                debug!(reader = terminal.name(), "separate monitoring context created");
                monitoring_terminal
            }
            Err(fault) => {
                warn!(
                    reader = terminal.name(),
                    %fault,
                    "could not create separate monitoring context, sharing the command context"
                );
                terminal.clone()
            }
        };
        PcscReader::new(
            terminal,
            monitoring_terminal,
            Arc::clone(&self.registry),
            Arc::clone(&self.filter),
            self.activity.clone(),
            self.platform,
            self.service.supports_extended_dispositions(),
            self.monitoring_cycle,
        )
    }

    /// Queries the native terminal list, absorbing the recoverable fault
    /// categories.
    ///
    /// The native service can be stopped and restarted out-of-band,
    /// typically when the last reader is unplugged, and callers must keep
    /// polling without crashing: no readers attached, service unavailable
    /// (the cached context is invalidated so the next call re-acquires it)
    /// and reader communication errors all yield an empty list. Anything
    /// else escalates as a fatal enumeration error.
    fn terminal_list(&self) -> Result<Vec<S::Terminal>, Error> {
        if self.platform.recycles_context_on_enumeration() {
            self.service.invalidate();
        }
        match self.service.terminals() {
            Ok(terminals) => Ok(terminals),
            Err(ServiceError::NoReadersAvailable) => {
                error!(plugin = %self.name, "no reader available");
                Ok(Vec::new())
            }
            Err(fault @ (ServiceError::NoService | ServiceError::ServiceStopped)) => {
                error!(plugin = %self.name, %fault, "no smart card service");
                self.service.invalidate();
                Ok(Vec::new())
            }
            Err(ServiceError::CommError) => {
                error!(plugin = %self.name, "reader communication error");
                Ok(Vec::new())
            }
            Err(fault) => Err(Error::Enumeration {
                message: "could not access terminal list".to_owned(),
                source: Some(fault),
            }),
        }
    }
}

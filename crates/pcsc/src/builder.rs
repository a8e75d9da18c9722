//! Plugin construction

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cardmux_core::CardService;
use tracing::info;

use crate::error::Error;
use crate::filter::ContactlessFilter;
use crate::platform::Platform;
use crate::plugin::PcscPlugin;
use crate::registry::{self, ProtocolRegistry};
use crate::service::PcscService;
use crate::timestamps::ActivityLog;

/// Default duration of one card monitoring cycle.
pub const DEFAULT_MONITORING_CYCLE: Duration = Duration::from_millis(500);

const PLUGIN_NAME: &str = "cardmux-pcsc";

/// Builds [`PcscPlugin`] instances from values configured by the setters.
///
/// All setters are optional and validate their input immediately, so an
/// invalid expression or cycle duration is rejected at configuration time
/// rather than surfacing during reader operation. A set of default protocol
/// identification rules is always seeded; the reader transmission class can
/// also be fixed later, per reader, with
/// [`crate::PcscReader::set_contactless`].
#[derive(Debug)]
pub struct PcscPluginBuilder {
    filter: ContactlessFilter,
    protocol_rules: HashMap<String, Option<String>>,
    monitoring_cycle: Duration,
}

impl Default for PcscPluginBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PcscPluginBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            filter: ContactlessFilter::default(),
            protocol_rules: HashMap::new(),
            monitoring_cycle: DEFAULT_MONITORING_CYCLE,
        }
    }

    /// Overwrites the default contactless reader identification filter.
    ///
    /// Readers whose names match the expression are considered contactless;
    /// all others are contact type. The default is
    /// [`crate::DEFAULT_CONTACTLESS_READER_FILTER`].
    pub fn with_contactless_reader_filter(mut self, filter: &str) -> Result<Self, Error> {
        self.filter = ContactlessFilter::new(filter)?;
        Ok(self)
    }

    /// Updates a protocol identification rule.
    ///
    /// An existing rule for the identifier is replaced, a new identifier is
    /// added, and a `None` rule disables the protocol.
    pub fn update_protocol_rule(
        mut self,
        protocol: impl Into<String>,
        rule: Option<&str>,
    ) -> Result<Self, Error> {
        let protocol = protocol.into();
        if protocol.is_empty() {
            return Err(Error::InvalidArgument(
                "protocol identifier must not be empty".to_owned(),
            ));
        }
        if let Some(rule) = rule {
            registry::validate_rule(rule)?;
        }
        self.protocol_rules.insert(protocol, rule.map(str::to_owned));
        Ok(self)
    }

    /// Sets the cycle duration for card insertion/removal monitoring.
    ///
    /// Lowering the 500 ms default reduces detection latency on native
    /// stacks that serialize access to the reader, at the price of a higher
    /// CPU load; the cycle must be at least one millisecond.
    pub fn with_monitoring_cycle(mut self, cycle: Duration) -> Result<Self, Error> {
        if cycle < Duration::from_millis(1) {
            return Err(Error::InvalidArgument(
                "monitoring cycle must be at least 1 ms".to_owned(),
            ));
        }
        self.monitoring_cycle = cycle;
        Ok(self)
    }

    /// Builds a plugin backed by the default PC/SC service provider.
    pub fn build(self) -> Result<PcscPlugin<PcscService>, Error> {
        self.build_with_service(PcscService::new())
    }

    /// Builds a plugin backed by the provided service.
    ///
    /// This is the seam used to substitute another provider, or a test
    /// double, for the platform's PC/SC stack.
    pub fn build_with_service<S: CardService>(self, service: S) -> Result<PcscPlugin<S>, Error> {
        let registry = ProtocolRegistry::with_defaults();
        if self.protocol_rules.is_empty() {
            info!(plugin = PLUGIN_NAME, "use default protocol identification rules");
        } else {
            info!(
                plugin = PLUGIN_NAME,
                rules = ?self.protocol_rules,
                "add protocol identification rules"
            );
            registry.merge(self.protocol_rules)?;
        }
        Ok(PcscPlugin::new(
            PLUGIN_NAME.to_owned(),
            service,
            Arc::new(registry),
            Arc::new(self.filter),
            ActivityLog::new(),
            Platform::probe(),
            self.monitoring_cycle,
        ))
    }
}

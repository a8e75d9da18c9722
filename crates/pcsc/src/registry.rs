//! Shared protocol rule registry

use std::collections::HashMap;

use parking_lot::RwLock;
use regex::Regex;

use crate::error::Error;
use crate::protocol::CardCommunicationProtocol;

/// Registry mapping protocol identifiers to compiled ATR-matching rules.
///
/// The registry is seeded with the built-in defaults at creation and shared
/// by every reader session of a plugin; [`merge`](Self::merge) may be
/// called while sessions are actively reading. There is no removal
/// operation: a protocol is disabled by replacing its rule with one that
/// matches nothing.
#[derive(Debug)]
pub struct ProtocolRegistry {
    rules: RwLock<HashMap<String, Option<Regex>>>,
}

impl ProtocolRegistry {
    /// Creates a registry seeded with the built-in identification rules.
    pub(crate) fn with_defaults() -> Self {
        let mut rules = HashMap::new();
        for protocol in CardCommunicationProtocol::ALL {
            let rule = compile_rule(protocol.default_rule())
                .expect("built-in protocol rules are valid expressions");
            rules.insert(protocol.identifier().to_owned(), rule);
        }
        Self {
            rules: RwLock::new(rules),
        }
    }

    /// Merges a set of rules into the registry.
    ///
    /// Existing identifiers are overridden, new identifiers are added, and
    /// a `None` rule disables the protocol: its pattern no longer matches
    /// any ATR and the protocol reports as unsupported. Patterns are
    /// validated before anything is applied, so a bad expression leaves the
    /// registry untouched.
    pub fn merge<I, S>(&self, rules: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (S, Option<String>)>,
        S: Into<String>,
    {
        let mut compiled = Vec::new();
        for (identifier, rule) in rules {
            let identifier = identifier.into();
            if identifier.is_empty() {
                return Err(Error::InvalidArgument(
                    "protocol identifier must not be empty".to_owned(),
                ));
            }
            let rule = match rule {
                Some(pattern) => compile_rule(&pattern)?,
                None => None,
            };
            compiled.push((identifier, rule));
        }
        let mut map = self.rules.write();
        for (identifier, rule) in compiled {
            map.insert(identifier, rule);
        }
        Ok(())
    }

    /// Gets the compiled rule registered for a protocol identifier.
    ///
    /// Returns `None` when no rule is registered or the protocol has been
    /// disabled.
    pub fn rule(&self, identifier: &str) -> Option<Regex> {
        self.rules.read().get(identifier).and_then(Clone::clone)
    }

    /// Tells whether the identifier has an active (non-disabled) rule.
    pub fn is_supported(&self, identifier: &str) -> bool {
        matches!(self.rules.read().get(identifier), Some(Some(_)))
    }
}

/// Compiles a rule into a full-match expression.
///
/// An empty pattern disables the protocol, like the `None` sentinel.
fn compile_rule(pattern: &str) -> Result<Option<Regex>, Error> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!("^(?:{pattern})$"))
        .map(Some)
        .map_err(|error| Error::InvalidArgument(format!("bad protocol rule: {error}")))
}

pub(crate) fn validate_rule(pattern: &str) -> Result<(), Error> {
    compile_rule(pattern).map(|_| ())
}

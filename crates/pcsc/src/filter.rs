//! Contactless reader identification by name
//!
//! There is no generic way to ask a PC/SC reader whether it is contact or
//! contactless; the determination is made from the reader name with a
//! configurable regular expression. Names are not always explicit, so it is
//! sometimes better to match on brand and model fragments.

use regex::Regex;

use crate::error::Error;

/// Default expression matching common contactless reader names.
pub const DEFAULT_CONTACTLESS_READER_FILTER: &str = "(?i).*(contactless|ask logo|acs acr122).*";

/// Determines a reader's transmission class from its name.
#[derive(Debug, Clone)]
pub struct ContactlessFilter {
    pattern: Regex,
}

impl ContactlessFilter {
    /// Compiles a filter from a regular expression.
    ///
    /// The expression is validated here, at configuration time, never at
    /// classification time. Matching is a full-string test against the
    /// reader name.
    pub fn new(pattern: &str) -> Result<Self, Error> {
        if pattern.is_empty() {
            return Err(Error::InvalidArgument(
                "contactless reader filter must not be empty".to_owned(),
            ));
        }
        let pattern = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|error| Error::InvalidArgument(format!("bad contactless reader filter: {error}")))?;
        Ok(Self { pattern })
    }

    /// Tells whether the reader whose name is provided is contactless.
    pub fn is_contactless(&self, reader_name: &str) -> bool {
        self.pattern.is_match(reader_name)
    }
}

impl Default for ContactlessFilter {
    fn default() -> Self {
        Self::new(DEFAULT_CONTACTLESS_READER_FILTER)
            .expect("default contactless reader filter is a valid expression")
    }
}

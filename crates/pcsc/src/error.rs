//! Error taxonomy for plugin and reader operations

use cardmux_core::ServiceError;

/// Result type for plugin and reader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the plugin and its reader sessions.
///
/// The taxonomy drives caller recovery: [`Error::CardIo`] means "redo card
/// positioning", [`Error::ReaderIo`] means "check or reset the reader",
/// [`Error::Cancelled`] means a monitoring wait was deliberately abandoned
/// (no card arrived, nothing is wrong with the hardware), and
/// [`Error::InvalidArgument`] / [`Error::IllegalState`] are caller bugs to
/// fix before retrying.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The reader or service is at fault but presumed still usable
    #[error("reader [{reader}]: {message}")]
    ReaderIo {
        /// Name of the reader the failure occurred on
        reader: String,
        /// Description of the failure
        message: String,
        /// Underlying native fault, when one was surfaced
        #[source]
        source: Option<ServiceError>,
    },

    /// The currently inserted card is at fault
    #[error("reader [{reader}]: {message}")]
    CardIo {
        /// Name of the reader the failure occurred on
        reader: String,
        /// Description of the failure
        message: String,
        /// Underlying native fault, when one was surfaced
        #[source]
        source: Option<ServiceError>,
    },

    /// A monitoring wait was stopped before the awaited event occurred
    #[error("reader [{reader}]: {message}")]
    Cancelled {
        /// Name of the reader the wait ran on
        reader: String,
        /// Description of the abandoned wait
        message: String,
    },

    /// An argument failed validation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was invoked in a state that does not allow it
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Reader enumeration failed in a non-recoverable way
    #[error("{message}")]
    Enumeration {
        /// Description of the failure
        message: String,
        /// Underlying native fault
        #[source]
        source: Option<ServiceError>,
    },
}

impl Error {
    pub(crate) fn reader_io(
        reader: &str,
        message: impl Into<String>,
        source: ServiceError,
    ) -> Self {
        Self::ReaderIo {
            reader: reader.to_owned(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn reader_io_bare(reader: &str, message: impl Into<String>) -> Self {
        Self::ReaderIo {
            reader: reader.to_owned(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn card_io(reader: &str, message: impl Into<String>, source: ServiceError) -> Self {
        Self::CardIo {
            reader: reader.to_owned(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn card_io_bare(reader: &str, message: impl Into<String>) -> Self {
        Self::CardIo {
            reader: reader.to_owned(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn cancelled(reader: &str, message: impl Into<String>) -> Self {
        Self::Cancelled {
            reader: reader.to_owned(),
            message: message.into(),
        }
    }
}

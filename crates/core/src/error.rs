//! Structured fault vocabulary for native card services
//!
//! Providers map their platform error codes onto [`ServiceError`] variants
//! so that the layers above can triage faults without depending on message
//! text. [`ServiceError::Other`] remains for faults with no structured
//! code; triage falls back to message inspection for those only.

/// Faults surfaced by a native card-service provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// No reader is attached to the system
    #[error("no reader available")]
    NoReadersAvailable,

    /// The smart-card service is not running
    #[error("smart card service unavailable")]
    NoService,

    /// The smart-card service stopped while a context was held
    #[error("smart card service stopped")]
    ServiceStopped,

    /// Low-level communication failure with the reader
    #[error("reader communication error")]
    CommError,

    /// The card was removed
    #[error("card removed")]
    RemovedCard,

    /// No card is present in the reader
    #[error("no card present")]
    NoSmartcard,

    /// The card was reset by another session
    #[error("card was reset")]
    ResetCard,

    /// The answer-to-reset is unusable
    #[error("invalid ATR")]
    InvalidAtr,

    /// The transaction did not complete
    #[error("transaction not completed")]
    NotTransacted,

    /// Another session holds a conflicting lock on the card
    #[error("sharing violation")]
    SharingViolation,

    /// A handle or argument was no longer valid for the native call
    #[error("invalid handle or state")]
    InvalidState,

    /// A bounded native wait elapsed
    #[error("timeout")]
    Timeout,

    /// The provider does not implement the requested feature
    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),

    /// A fault with no structured code, described by its message
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// Tells whether the fault is attributable to the card rather than to
    /// the reader or the service.
    ///
    /// A card fault during transmission means "redo card positioning";
    /// anything else points at the reader. Faults without a structured code
    /// are classified by the known native message vocabulary.
    pub fn is_card_fault(&self) -> bool {
        match self {
            Self::RemovedCard
            | Self::NoSmartcard
            | Self::ResetCard
            | Self::InvalidAtr
            | Self::NotTransacted
            | Self::InvalidState => true,
            Self::Other(message) => {
                message.contains("CARD")
                    || message.contains("NOT_TRANSACTED")
                    || message.contains("INVALID_ATR")
            }
            _ => false,
        }
    }
}

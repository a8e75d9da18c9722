//! Core traits and types for smart-card reader service providers
//!
//! This crate defines the seam between a reader plugin and the platform's
//! native smart-card service: a synchronous enumerate / connect / transmit /
//! disconnect / wait-for-presence surface with bounded timeouts, plus a
//! structured fault vocabulary that lets callers triage faults without
//! inspecting native message text.
//!
//! The default PC/SC-backed implementation lives in `cardmux-pcsc`; an
//! in-memory, scriptable implementation for tests lives in [`mock`].
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod mock;
pub mod terminal;

pub use error::ServiceError;
pub use terminal::{CardHandle, CardService, Disposition, ProtocolFilter, Terminal};

//! PC/SC reader plugin
//!
//! This crate exposes physical smart-card readers through a uniform
//! reader/plugin abstraction built on the platform's PC/SC stack:
//!
//! - [`PcscPlugin`] enumerates the attached terminals and builds one
//!   [`PcscReader`] session per terminal, absorbing the transient faults a
//!   restarting native service produces.
//! - [`PcscReader`] manages the card session itself: presence detection
//!   with cancellable waits, the physical channel lifecycle, protocol
//!   identification from the power-on data, and APDU exchange with a
//!   consistent reader/card fault classification.
//! - [`ProtocolRegistry`] maps protocol identifiers to ATR-matching rules,
//!   seeded with PC/SC Part 3 defaults and open to overrides.
//! - [`ActivityLog`] records coarse operation timestamps for diagnostics.
//!
//! The native stack is reached through the `cardmux-core` service traits;
//! [`PcscService`] is the default provider backed by the `pcsc` crate, and
//! any other implementation can be substituted at build time.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod builder;
pub mod config;
pub mod error;
pub mod filter;
pub mod platform;
pub mod plugin;
pub mod protocol;
pub mod reader;
pub mod registry;
pub mod service;
pub mod timestamps;

pub use builder::{DEFAULT_MONITORING_CYCLE, PcscPluginBuilder};
pub use config::{DisconnectionMode, IsoProtocol, SharingMode};
pub use error::{Error, Result};
pub use filter::{ContactlessFilter, DEFAULT_CONTACTLESS_READER_FILTER};
pub use platform::Platform;
pub use plugin::PcscPlugin;
pub use protocol::CardCommunicationProtocol;
pub use reader::PcscReader;
pub use registry::ProtocolRegistry;
pub use service::{PcscCard, PcscService, PcscTerminal};
pub use timestamps::{ActivityLog, DETECTION_START, SESSION_END};

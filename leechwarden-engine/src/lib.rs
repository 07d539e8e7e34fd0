//! # leechwarden Engine
//!
//! Drives detection and enforcement: polls the download client, feeds the
//! behavior analyzer, blocks offenders and keeps the statistics store tidy.

pub mod admin;
pub mod error;
pub mod monitor;
pub mod runtime;
pub mod source;

pub use error::EngineError;
pub use monitor::{CycleReport, Monitor, SharedFirewall};
pub use runtime::{Control, Runtime};
pub use source::PeerSource;

//! # leechwarden-core
//!
//! Foundation layer shared by the detection, prevention and engine crates.
//!
//! ### Key Submodules:
//! - `time`: `Clock` abstraction with a system clock and a manually driven clock
//! - `sample`: direction-mapped per-peer traffic samples
//! - `error`: errors shared across crates

pub mod error;
pub mod sample;
pub mod time;

pub mod prelude {
    pub use crate::error::*;
    pub use crate::sample::*;
    pub use crate::time::*;
}

pub use error::CoreError;
pub use sample::TrafficSample;
pub use time::{Clock, ManualClock, SystemClock};

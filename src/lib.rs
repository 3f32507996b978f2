//! Static hand gesture recognition.
//!
//! A camera frame is searched for hands, each hand is cropped and classified by a CNN, and the
//! first gesture recognized with enough confidence is mapped to a display string (Sinhala, by
//! default). See [`pipeline`] for the individual stages.
//!
//! # Environment Variables
//!
//! The `mudra` binary is configured through `MUDRA_*` environment variables, see [`config`].
//! Logging can be adjusted with `RUST_LOG`.

use log::LevelFilter;

pub mod classifier;
pub mod config;
pub mod dataset;
pub mod detection;
pub mod detector;
pub mod error;
pub mod gate;
pub mod hand;
pub mod image;
pub mod landmark;
pub mod nn;
pub mod normalize;
pub mod pipeline;
pub mod region;
pub mod resolution;
pub mod server;
pub mod timer;
pub mod video;
pub mod vocab;
pub mod worker;

pub use error::{Error, Result};

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("tract_core"), LevelFilter::Warn)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and mudra will log at *trace* level.
/// Otherwise, they will log at *debug* level. `RUST_LOG` overrides both.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}

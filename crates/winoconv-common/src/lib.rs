//! Common types for the Winograd convolution engine
//!
//! This crate provides the foundational types shared by the probe and kernel
//! crates: tensor and kernel shapes, the error taxonomy, configuration loading
//! and the working-space arena layout.

pub mod arena;
pub mod config;
pub mod error;
pub mod math;
pub mod shape;

pub use arena::{ArenaLayout, ArenaRegion, ArenaRequest, ArenaViews, try_alloc_zeroed};
pub use config::{ConfigError, TileAddressing, WinogradConfig};
pub use error::{Result, WinogradError, ensure_len};
pub use math::{ceil_div, round_up};
pub use shape::*;

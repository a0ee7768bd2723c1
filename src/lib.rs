//! # packbms_lib
//!
//! Supervisory core for battery packs built around a monitoring AFE
//! (analog front-end): safety state machine, error flag aggregation,
//! state-of-charge estimation and passive cell balancing.
//!
//! The hardware access is abstracted behind the [`afe::AfeDriver`] trait.
//! An in-memory implementation, [`emulated::EmulatedAfe`], is included for
//! tests and simulation.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling
//!   the `packbms` command-line tool.

/// Error types for the library.
mod error;
/// Interpolation and formatting helpers.
pub mod helper;

/// Error, switch and selection bitmask types.
pub mod flags;

/// Configuration values and cell chemistry presets.
pub mod config;

/// AFE driver contract and measurement snapshot.
pub mod afe;

/// Emulated AFE for tests and simulation.
pub mod emulated;

/// State-of-charge estimation.
pub mod soc;

/// Balancing cell selection.
pub mod balancing;

/// BMS context and state machine.
pub mod bms;

pub use bms::{Bms, BmsState};
pub use error::{Error, Result};

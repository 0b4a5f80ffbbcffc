//! Common utilities and types shared across the Pearl core crates.
//!
//! This module provides the error taxonomy, the validated drive key and
//! drive path types, and the bounded-wait combinator used at every network
//! boundary.

pub mod deadline;
pub mod error;
pub mod timeouts;
pub mod types;

pub use deadline::{with_deadline, Deadline};
pub use error::{Error, Result};
pub use timeouts::Timeouts;
pub use types::{DriveKey, DrivePath, DRIVE_KEY_HEX_LEN};

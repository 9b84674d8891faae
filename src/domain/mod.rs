//! Domain types for metering
//!
//! This module contains the records the proxy produces and the parts of the
//! upstream wire format it inspects to produce them.

pub mod metering;
pub mod openai;

pub use metering::*;
pub use openai::*;

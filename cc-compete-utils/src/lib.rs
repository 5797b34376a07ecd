//! Utility library for the cc-compete project

pub mod other;
pub mod serde;

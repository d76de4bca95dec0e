//! Ssiflow Core Library
//!
//! This crate provides the building blocks shared by the ssiflow filter:
//! the chunked byte-stream model, the request environment and variable
//! interpolation, entity decoding and escaping, configuration, and the
//! resolver interface used for subrequest dispatch.

pub mod brigade;
pub mod config;
pub mod env;
pub mod error;
pub mod resolve;
pub mod text;
pub mod time;

pub use error::{Error, Result};

/// Ssiflow version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound for interpolated strings, directive values, and
/// expression operands. Longer data is silently truncated.
pub const MAX_STRING_LEN: usize = 8192;

//! Ssiflow Filter
//!
//! The streaming SSI filter proper: a per-request driver that scans
//! incoming byte chunks for `<!--#directive ...-->` spans, executes the
//! directives, and forwards the transformed stream with bounded
//! buffering. Directives may straddle chunk boundaries; unchanged bytes
//! are passed through verbatim and in order.

pub mod driver;
pub mod handlers;
pub mod scanner;
pub mod tagparse;

pub use driver::IncludesFilter;
pub use scanner::{ParseState, FLUSH_THRESHOLD};

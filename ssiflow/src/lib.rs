//! Ssiflow - streaming Server-Side Includes renderer
//!
//! Library surface behind the `ssiflow` binary: the filesystem
//! resolver and the document rendering pipeline.

pub mod render;
pub mod resolver;

pub use render::{render_document, RenderOutcome};
pub use resolver::FsResolver;

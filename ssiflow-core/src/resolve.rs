//! Document model and the subrequest interface.
//!
//! The filter itself never touches the filesystem or the network: the
//! `include`, `fsize`, and `flastmod` directives go through a
//! [`Resolver`], which turns a `file=` path or `virtual=` URI into a
//! [`Subrequest`] (status, identity, metadata) and can read its body.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::SystemTime;

/// Identity and timing of the document a filter instance is processing.
#[derive(Debug, Clone)]
pub struct DocumentRequest {
    pub uri: String,
    pub filename: String,
    pub path_info: String,
    pub query_string: Option<String>,
    pub user_name: Option<String>,
    pub request_time: SystemTime,
    pub mtime: Option<SystemTime>,
    pub content_type: Option<String>,
    /// Permission bits of the underlying file, when the platform has
    /// them; consulted by the x-bit policy.
    pub mode: Option<u32>,
}

impl DocumentRequest {
    /// Final path segment of the resolved filename, or the URI when the
    /// filename has no separator.
    pub fn document_name(&self) -> &str {
        match self.filename.rsplit_once('/') {
            Some((_, name)) if !name.is_empty() => name,
            _ => &self.uri,
        }
    }

    pub fn frame(&self) -> RequestFrame {
        RequestFrame {
            filename: self.filename.clone(),
            uri: self.uri.clone(),
        }
    }
}

impl Default for DocumentRequest {
    fn default() -> Self {
        Self {
            uri: String::new(),
            filename: String::new(),
            path_info: String::new(),
            query_string: None,
            user_name: None,
            request_time: SystemTime::now(),
            mtime: None,
            content_type: None,
            mode: None,
        }
    }
}

/// One step of the request ancestry (subrequest parents and their
/// internal-redirect predecessors), used to refuse recursive includes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub filename: String,
    pub uri: String,
}

/// File metadata obtained through the resolver's stat interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMetadata {
    /// Size in bytes; `None` when the size could not be determined.
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
    /// Unix permission bits, when the platform has them.
    pub mode: Option<u32>,
}

/// Result of resolving a `file=` or `virtual=` target.
#[derive(Debug, Clone)]
pub struct Subrequest {
    pub status: u16,
    pub uri: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub meta: FileMetadata,
    /// Whether the body should itself be rendered through a nested
    /// filter before splicing.
    pub parsed: bool,
}

/// Target of a subrequest lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTarget<'a> {
    /// `file=`: a relative, dotdot-free path.
    File(&'a str),
    /// `virtual=`: a URI resolved by the host.
    Virtual(&'a str),
}

impl LookupTarget<'_> {
    pub fn value(&self) -> &str {
        match self {
            LookupTarget::File(v) | LookupTarget::Virtual(v) => v,
        }
    }
}

/// Subrequest dispatch, supplied by the hosting layer.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve a target relative to `base` without producing its body.
    async fn lookup(&self, target: LookupTarget<'_>, base: &DocumentRequest)
        -> Result<Subrequest>;

    /// Produce the raw body of a previously looked-up subrequest.
    async fn read(&self, sub: &Subrequest) -> Result<Bytes>;
}

/// Platform policy for the group-execute bit consulted under
/// `XBitHack full`.
pub trait XBitPolicy: Send + Sync {
    fn has_group_exec(&self, meta: &FileMetadata) -> bool;
}

/// Policy that never reports the bit (platforms without group
/// protections).
#[derive(Debug, Default)]
pub struct NoXBit;

impl XBitPolicy for NoXBit {
    fn has_group_exec(&self, _meta: &FileMetadata) -> bool {
        false
    }
}

/// Unix mode-bit policy.
#[derive(Debug, Default)]
pub struct UnixXBit;

impl XBitPolicy for UnixXBit {
    fn has_group_exec(&self, meta: &FileMetadata) -> bool {
        meta.mode.is_some_and(|m| m & 0o010 != 0)
    }
}

/// Accept only relative paths with no `..` segment (and no drive letter
/// where those exist), so `file=` cannot escape the document tree.
pub fn is_only_below(path: &str) -> bool {
    #[cfg(windows)]
    if path.as_bytes().get(1) == Some(&b':') {
        return false;
    }
    if path.starts_with('/') {
        return false;
    }
    path.split('/').all(|seg| seg != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_accepted() {
        assert!(is_only_below("footer.html"));
        assert!(is_only_below("sub/dir/footer.html"));
        assert!(is_only_below("dots.in.name"));
        assert!(is_only_below("..."));
    }

    #[test]
    fn absolute_and_parent_paths_rejected() {
        assert!(!is_only_below("/etc/passwd"));
        assert!(!is_only_below("../etc/passwd"));
        assert!(!is_only_below("a/../b"));
        assert!(!is_only_below("a/b/.."));
    }

    #[test]
    fn document_name_from_filename() {
        let req = DocumentRequest {
            uri: "/docs/".to_string(),
            filename: "/srv/www/docs/index.shtml".to_string(),
            ..Default::default()
        };
        assert_eq!(req.document_name(), "index.shtml");

        let bare = DocumentRequest {
            uri: "/x".to_string(),
            filename: "noslash".to_string(),
            ..Default::default()
        };
        assert_eq!(bare.document_name(), "/x");
    }

    #[test]
    fn unix_xbit_policy() {
        let policy = UnixXBit;
        assert!(policy.has_group_exec(&FileMetadata {
            mode: Some(0o754),
            ..Default::default()
        }));
        assert!(!policy.has_group_exec(&FileMetadata {
            mode: Some(0o744),
            ..Default::default()
        }));
        assert!(!policy.has_group_exec(&FileMetadata::default()));
    }
}

//! Filesystem resolver: maps `file=` and `virtual=` targets onto a
//! document root.

use async_trait::async_trait;
use bytes::Bytes;
use ssiflow_core::resolve::{DocumentRequest, FileMetadata, LookupTarget, Resolver, Subrequest};
use ssiflow_core::{Error, Result};
use std::path::{Path, PathBuf};

/// Extensions whose bodies are themselves rendered through a nested
/// filter when included.
const PARSED_EXTENSIONS: &[&str] = &["shtml", "html", "htm"];

/// Resolver over a document root directory.
pub struct FsResolver {
    root: PathBuf,
}

impl FsResolver {
    /// Create a resolver confined to `root`. The root must exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = std::fs::canonicalize(root.into())
            .map_err(|e| Error::Config(format!("document root: {}", e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn not_found(uri: String, path: &Path) -> Subrequest {
        Subrequest {
            status: 404,
            uri,
            filename: path.display().to_string(),
            content_type: None,
            meta: FileMetadata::default(),
            parsed: false,
        }
    }
}

#[async_trait]
impl Resolver for FsResolver {
    async fn lookup(
        &self,
        target: LookupTarget<'_>,
        base: &DocumentRequest,
    ) -> Result<Subrequest> {
        let (path, uri) = match target {
            // file paths are relative to the including document
            LookupTarget::File(rel) => {
                let base_dir = Path::new(&base.filename)
                    .parent()
                    .unwrap_or_else(|| Path::new("."));
                (base_dir.join(rel), String::new())
            }
            // virtual URIs resolve against the root, or against the
            // including document's URI when relative
            LookupTarget::Virtual(v) => {
                let uri = if v.starts_with('/') {
                    v.to_string()
                } else {
                    match base.uri.rsplit_once('/') {
                        Some((dir, _)) => format!("{}/{}", dir, v),
                        None => format!("/{}", v),
                    }
                };
                let path = self.root.join(uri.trim_start_matches('/'));
                (path, uri)
            }
        };

        let canonical = match tokio::fs::canonicalize(&path).await {
            Ok(c) => c,
            Err(_) => return Ok(Self::not_found(uri, &path)),
        };
        if !canonical.starts_with(&self.root) {
            tracing::warn!("lookup escaped the document root: {:?}", path);
            return Ok(Self::not_found(uri, &path));
        }
        let meta = match tokio::fs::metadata(&canonical).await {
            Ok(m) if m.is_file() => m,
            _ => return Ok(Self::not_found(uri, &canonical)),
        };

        let filename = canonical.display().to_string();
        let uri = if uri.is_empty() { filename.clone() } else { uri };
        let ext = canonical
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(meta.permissions().mode())
        };
        #[cfg(not(unix))]
        let mode = None;

        Ok(Subrequest {
            status: 200,
            uri,
            filename,
            content_type: mime_guess::from_path(&canonical)
                .first()
                .map(|m| m.essence_str().to_string()),
            meta: FileMetadata {
                size: Some(meta.len()),
                mtime: meta.modified().ok(),
                mode,
            },
            parsed: PARSED_EXTENSIONS.contains(&ext.as_str()),
        })
    }

    async fn read(&self, sub: &Subrequest) -> Result<Bytes> {
        let body = tokio::fs::read(&sub.filename).await?;
        Ok(Bytes::from(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(filename: &Path, uri: &str) -> DocumentRequest {
        DocumentRequest {
            uri: uri.to_string(),
            filename: filename.display().to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn file_target_resolves_relative_to_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/footer.html"), "foot").unwrap();
        std::fs::write(dir.path().join("sub/page.shtml"), "page").unwrap();

        let resolver = FsResolver::new(dir.path()).unwrap();
        let base = base_request(
            &dir.path().join("sub/page.shtml").canonicalize().unwrap(),
            "/sub/page.shtml",
        );
        let sub = resolver
            .lookup(LookupTarget::File("footer.html"), &base)
            .await
            .unwrap();
        assert_eq!(sub.status, 200);
        assert!(sub.parsed);
        assert_eq!(sub.meta.size, Some(4));
        assert_eq!(sub.content_type.as_deref(), Some("text/html"));
        assert_eq!(resolver.read(&sub).await.unwrap(), Bytes::from_static(b"foot"));
    }

    #[tokio::test]
    async fn virtual_target_resolves_against_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "1234567").unwrap();

        let resolver = FsResolver::new(dir.path()).unwrap();
        let base = base_request(&dir.path().join("index.shtml"), "/index.shtml");
        let sub = resolver
            .lookup(LookupTarget::Virtual("/data.txt"), &base)
            .await
            .unwrap();
        assert_eq!(sub.status, 200);
        assert_eq!(sub.uri, "/data.txt");
        assert!(!sub.parsed);
        assert_eq!(sub.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn relative_virtual_resolves_against_base_uri() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), "a").unwrap();

        let resolver = FsResolver::new(dir.path()).unwrap();
        let base = base_request(&dir.path().join("docs/index.shtml"), "/docs/index.shtml");
        let sub = resolver
            .lookup(LookupTarget::Virtual("a.txt"), &base)
            .await
            .unwrap();
        assert_eq!(sub.status, 200);
        assert_eq!(sub.uri, "/docs/a.txt");
    }

    #[tokio::test]
    async fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FsResolver::new(dir.path()).unwrap();
        let base = base_request(&dir.path().join("index.shtml"), "/index.shtml");
        let sub = resolver
            .lookup(LookupTarget::Virtual("/nope.html"), &base)
            .await
            .unwrap();
        assert_eq!(sub.status, 404);
    }

    #[tokio::test]
    async fn escape_from_root_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("webroot");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "s").unwrap();

        let resolver = FsResolver::new(&inner).unwrap();
        let base = base_request(&inner.join("index.shtml"), "/index.shtml");
        let sub = resolver
            .lookup(LookupTarget::Virtual("/../secret.txt"), &base)
            .await
            .unwrap();
        assert_eq!(sub.status, 404);
    }
}

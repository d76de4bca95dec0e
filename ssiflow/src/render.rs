//! Document rendering pipeline: file in, filtered bytes out.

use crate::resolver::FsResolver;
use bytes::Bytes;
use ssiflow_core::config::SsiConfig;
use ssiflow_core::env::Environment;
use ssiflow_core::resolve::{DocumentRequest, UnixXBit};
use ssiflow_core::{Error, Result};
use ssiflow_filter::IncludesFilter;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncReadExt;

/// Result of rendering one document.
pub struct RenderOutcome {
    pub body: Vec<u8>,
    pub had_errors: bool,
    pub directives_processed: bool,
    /// Response headers the filter would apply when serving this
    /// document over HTTP.
    pub headers: http::HeaderMap,
}

/// Render `file` through the SSI filter, reading it in `chunk_size`
/// slices. `vars` seeds the request environment before the standard
/// variables are published.
pub async fn render_document(
    file: &Path,
    config: SsiConfig,
    vars: Environment,
    chunk_size: usize,
) -> Result<RenderOutcome> {
    let resolver = Arc::new(FsResolver::new(&config.root)?);
    let filename = std::fs::canonicalize(file)
        .map_err(|e| Error::Config(format!("{}: {}", file.display(), e)))?;
    let meta = std::fs::metadata(&filename)?;

    let uri = match filename.strip_prefix(resolver.root()) {
        Ok(rel) => format!("/{}", rel.display()),
        Err(_) => format!("/{}", filename.file_name().unwrap_or_default().to_string_lossy()),
    };

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        Some(meta.permissions().mode())
    };
    #[cfg(not(unix))]
    let mode = None;

    let request = DocumentRequest {
        uri,
        filename: filename.display().to_string(),
        path_info: String::new(),
        query_string: None,
        user_name: std::env::var("USER").ok(),
        request_time: SystemTime::now(),
        mtime: meta.modified().ok(),
        content_type: mime_guess::from_path(&filename)
            .first()
            .map(|m| m.essence_str().to_string()),
        mode,
    };

    let mut filter = IncludesFilter::new(request, config, resolver, vars)
        .with_xbit_policy(Arc::new(UnixXBit));

    let mut body = Vec::new();
    let mut source = tokio::fs::File::open(&filename).await?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        for part in filter.feed(Bytes::copy_from_slice(&buf[..n])).await? {
            body.extend_from_slice(&part);
        }
    }

    let had_errors = filter.had_errors();
    let directives_processed = filter.directives_processed();
    let mut headers = http::HeaderMap::new();
    filter.apply_response_headers(&mut headers);
    for part in filter.finish()? {
        body.extend_from_slice(&part);
    }

    Ok(RenderOutcome {
        body,
        had_errors,
        directives_processed,
        headers,
    })
}

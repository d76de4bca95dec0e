//! Per-request filter driver.
//!
//! One [`IncludesFilter`] is owned by exactly one request. Chunks are
//! pushed in with [`feed`](IncludesFilter::feed); transformed segments
//! come back in input order. Between calls the brigade holds only the
//! set-aside bytes of a directive in progress (the tag carry); the
//! scanned prefix is always handed back before `feed` returns.

use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;
use ssiflow_core::brigade::{Brigade, Span};
use ssiflow_core::config::{SsiConfig, XBitHack};
use ssiflow_core::env::Environment;
use ssiflow_core::resolve::{
    DocumentRequest, FileMetadata, NoXBit, RequestFrame, Resolver, Subrequest, XBitPolicy,
};
use ssiflow_core::text::{escape_shell, unescape_url};
use ssiflow_core::time::format_timestamp;
use ssiflow_core::Result;
use std::sync::Arc;

use crate::scanner::{ParseState, ScanContext, ScanEvent};

/// Streaming SSI filter for one request.
pub struct IncludesFilter {
    pub(crate) ctx: ScanContext,
    brigade: Brigade,
    pos: Span,
    pub(crate) env: Arc<Mutex<Environment>>,
    pub(crate) request: DocumentRequest,
    pub(crate) chain: Vec<RequestFrame>,
    pub(crate) resolver: Arc<dyn Resolver>,
    config: SsiConfig,
    xbit: Arc<dyn XBitPolicy>,
    directives_seen: bool,
    pub(crate) errors_seen: bool,
    aborted: bool,
}

impl IncludesFilter {
    /// Create the filter for a root request. `vars` carries the
    /// host-populated (CGI-style) variables; the filter publishes its
    /// own standard set on top of them.
    pub fn new(
        request: DocumentRequest,
        config: SsiConfig,
        resolver: Arc<dyn Resolver>,
        vars: Environment,
    ) -> Self {
        let filter = Self {
            ctx: ScanContext::new(&config),
            brigade: Brigade::new(),
            pos: Span::new(0, 0),
            env: Arc::new(Mutex::new(vars)),
            request,
            chain: Vec::new(),
            resolver,
            config,
            xbit: Arc::new(NoXBit),
            directives_seen: false,
            errors_seen: false,
            aborted: false,
        };
        filter.publish_request_vars();
        filter
    }

    /// Install the platform's x-bit policy.
    pub fn with_xbit_policy(mut self, policy: Arc<dyn XBitPolicy>) -> Self {
        self.xbit = policy;
        self
    }

    /// Create the filter for a nested include. The environment is the
    /// parent's (writes made here stay visible to the parent), the
    /// mtime is inherited, and the standard variables are not
    /// re-published.
    pub(crate) fn nested(&self, sub: &Subrequest) -> Self {
        let request = DocumentRequest {
            uri: sub.uri.clone(),
            filename: sub.filename.clone(),
            path_info: String::new(),
            query_string: None,
            user_name: self.request.user_name.clone(),
            request_time: self.request.request_time,
            mtime: self.request.mtime,
            content_type: sub.content_type.clone(),
            mode: sub.meta.mode,
        };
        let mut chain = self.chain.clone();
        chain.push(self.request.frame());
        Self {
            ctx: ScanContext::new(&self.config),
            brigade: Brigade::new(),
            pos: Span::new(0, 0),
            env: self.env.clone(),
            request,
            chain,
            resolver: self.resolver.clone(),
            config: self.config.clone(),
            xbit: self.xbit.clone(),
            directives_seen: false,
            errors_seen: false,
            aborted: false,
        }
    }

    /// Shared handle to the request environment.
    pub fn env_handle(&self) -> Arc<Mutex<Environment>> {
        self.env.clone()
    }

    /// True once at least one directive has been dispatched.
    pub fn directives_processed(&self) -> bool {
        self.directives_seen
    }

    /// True if any directive reported a user-visible error.
    pub fn had_errors(&self) -> bool {
        self.errors_seen
    }

    /// Publish the filter's standard variables. The host's variables
    /// were seeded first, so these take precedence, as always.
    fn publish_request_vars(&self) {
        let mut env = self.env.lock();
        let fmt = &self.ctx.time_format;
        let now = self.request.request_time;
        env.set("DATE_LOCAL", format_timestamp(now, fmt, false));
        env.set("DATE_GMT", format_timestamp(now, fmt, true));
        let mtime = self.request.mtime.unwrap_or(now);
        env.set("LAST_MODIFIED", format_timestamp(mtime, fmt, false));
        env.set("DOCUMENT_URI", self.request.uri.clone());
        env.set("DOCUMENT_PATH_INFO", self.request.path_info.clone());
        env.set(
            "USER_NAME",
            self.request
                .user_name
                .clone()
                .unwrap_or_else(|| "<unknown>".to_string()),
        );
        env.set("DOCUMENT_NAME", self.request.document_name().to_string());
        if let Some(q) = &self.request.query_string {
            env.set("QUERY_STRING", q.clone());
            let unescaped = unescape_url(q);
            env.set("QUERY_STRING_UNESCAPED", escape_shell(&unescaped));
        }
    }

    /// Process one upstream chunk and return the segments ready for
    /// the downstream consumer, in input order.
    pub async fn feed(&mut self, chunk: Bytes) -> Result<Vec<Bytes>> {
        if self.aborted {
            return Ok(Vec::new());
        }
        self.ctx.bytes_parsed = 0;
        self.brigade.push(chunk);
        let mut out = Vec::new();
        self.run(&mut out).await?;
        Ok(out)
    }

    /// End of stream. A directive left incomplete never becomes one: a
    /// partial start delimiter is ordinary text, anything after a full
    /// `<!--#` is discarded.
    pub fn finish(mut self) -> Result<Vec<Bytes>> {
        if self.aborted {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        if matches!(self.ctx.state, ParseState::PreHead | ParseState::ParseHead) {
            let rest = self.brigade.take();
            if self.ctx.flags.printing {
                out.extend(rest.into_segments());
            }
        }
        Ok(out)
    }

    /// Drop all buffered state; further `feed` calls produce nothing.
    pub fn abort(&mut self) {
        self.aborted = true;
        self.brigade.take();
        self.ctx.reset_directive();
    }

    /// Response-header side channel: the content length is unknowable
    /// once a directive was substituted, and `XBitHack full` exposes
    /// the document mtime for group-executable files.
    pub fn apply_response_headers(&self, headers: &mut HeaderMap) {
        if self.directives_seen {
            headers.remove(http::header::CONTENT_LENGTH);
        }
        if self.config.xbit_hack == XBitHack::Full {
            let meta = FileMetadata {
                size: None,
                mtime: self.request.mtime,
                mode: self.request.mode,
            };
            if self.xbit.has_group_exec(&meta) {
                if let Some(mtime) = self.request.mtime {
                    if let Ok(value) = http::HeaderValue::from_str(&httpdate::fmt_http_date(mtime))
                    {
                        headers.insert(http::header::LAST_MODIFIED, value);
                    }
                }
            }
        }
    }

    async fn run(&mut self, out: &mut Vec<Bytes>) -> Result<()> {
        loop {
            if self.ctx.state == ParseState::Parsed {
                self.dispatch_directive(out).await?;
                continue;
            }
            match self.ctx.scan(&self.brigade, &mut self.pos) {
                ScanEvent::Flush { at } => self.flush_prefix(at, out),
                ScanEvent::Directive => continue,
                ScanEvent::NeedMore => break,
            }
        }

        // End of this chunk: emit (or drop) the scanned text. A
        // directive in progress stays behind as the carry.
        match self.ctx.state {
            ParseState::PreHead => {
                let rest = self.brigade.take();
                if self.ctx.flags.printing {
                    out.extend(rest.into_segments());
                }
                self.pos = Span::new(0, 0);
                self.ctx.bytes_parsed = 0;
            }
            _ => {
                let head = self.ctx.head_start.expect("mid-directive carry");
                self.flush_prefix(head, out);
            }
        }
        Ok(())
    }

    /// Hand everything before `at` downstream (or drop it inside a
    /// false conditional branch) and rewrite the retained positions.
    fn flush_prefix(&mut self, at: Span, out: &mut Vec<Bytes>) {
        let at = self.brigade.normalize(at);
        let prefix = self.brigade.split_to(at);
        self.ctx.rebase(at);
        self.pos.rebase(at);
        self.pos = self.brigade.normalize(self.pos);
        self.ctx.bytes_parsed = 0;
        if self.ctx.flags.printing {
            out.extend(prefix.into_segments());
        }
    }

    /// A complete directive sits in the brigade. Assemble its body,
    /// dispatch the handler, and splice the replacement in.
    async fn dispatch_directive(&mut self, out: &mut Vec<Bytes>) -> Result<()> {
        // the prefix was scanned under the current printing flag; move
        // it out before the handler can change the flag
        let head = self.ctx.head_start.expect("parsed directive");
        self.flush_prefix(head, out);

        let tag_start = self.ctx.tag_start.expect("parsed directive");
        let tail_start = self.ctx.tail_start.expect("parsed directive");
        let tail_end = self.ctx.tail_end.expect("parsed directive");

        let raw = self.brigade.copy_range(tag_start, tail_start);
        let name_len = self.ctx.directive_length.min(raw.len());
        let name = String::from_utf8_lossy(&raw[..name_len]).to_lowercase();
        let args_from = (name_len + 1).min(raw.len());
        let args = String::from_utf8_lossy(&raw[args_from..]).into_owned();

        self.directives_seen = true;

        let mut content: Vec<Bytes> = Vec::new();
        self.run_directive(&name, &args, &mut content).await;

        // the directive span is deleted; replacement bytes take its
        // place and are not re-scanned
        let resume = self
            .brigade
            .replace_range(Span::new(0, 0), tail_end, content);
        self.pos = resume;
        self.ctx.reset_directive();
        Ok(())
    }
}

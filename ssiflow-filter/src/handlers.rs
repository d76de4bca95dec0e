//! Directive handlers.
//!
//! A fixed name-to-handler mapping: eleven directives, dispatched by
//! lowercased name. Every user-visible error substitutes the configured
//! error template and scanning continues at the next directive.

use async_recursion::async_recursion;
use bytes::Bytes;
use ssiflow_core::env::interpolate;
use ssiflow_core::resolve::{is_only_below, FileMetadata, LookupTarget, RequestFrame};
use ssiflow_core::text::{decode_entities, escape_html, escape_uri};
use ssiflow_core::time::format_timestamp;
use ssiflow_core::MAX_STRING_LEN;

use crate::driver::IncludesFilter;
use crate::tagparse::TagParser;

/// The complete directive set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Include,
    Echo,
    Config,
    Set,
    Printenv,
    Fsize,
    Flastmod,
    If,
    Elif,
    Else,
    Endif,
}

impl Directive {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "include" => Directive::Include,
            "echo" => Directive::Echo,
            "config" => Directive::Config,
            "set" => Directive::Set,
            "printenv" => Directive::Printenv,
            "fsize" => Directive::Fsize,
            "flastmod" => Directive::Flastmod,
            "if" => Directive::If,
            "elif" => Directive::Elif,
            "else" => Directive::Else,
            "endif" => Directive::Endif,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    None,
    Url,
    Entity,
}

impl IncludesFilter {
    /// Dispatch one assembled directive body.
    #[async_recursion]
    pub(crate) async fn run_directive(&mut self, name: &str, args: &str, content: &mut Vec<Bytes>) {
        match Directive::from_name(name) {
            Some(Directive::Include) => self.handle_include(args, content).await,
            Some(Directive::Echo) => self.handle_echo(args, content),
            Some(Directive::Config) => self.handle_config(args, content),
            Some(Directive::Set) => self.handle_set(args, content),
            Some(Directive::Printenv) => self.handle_printenv(args, content),
            Some(Directive::Fsize) => self.handle_fsize(args, content).await,
            Some(Directive::Flastmod) => self.handle_flastmod(args, content).await,
            Some(Directive::If) => self.handle_if(args, content),
            Some(Directive::Elif) => self.handle_elif(args, content),
            Some(Directive::Else) => self.handle_else(args, content),
            Some(Directive::Endif) => self.handle_endif(args, content),
            None => {
                tracing::error!(
                    file = %self.request.filename,
                    "unknown directive \"{}\" in parsed doc",
                    name
                );
                self.emit_error(content);
            }
        }
    }

    /// Substitute the current error template at the directive's
    /// position.
    fn emit_error(&mut self, content: &mut Vec<Bytes>) {
        self.errors_seen = true;
        if self.ctx.flags.printing {
            content.push(Bytes::from(self.ctx.error_template.clone()));
        }
    }

    fn interp(&self, s: &str) -> String {
        interpolate(&self.env.lock(), s, MAX_STRING_LEN - 1, false)
    }

    fn missing_value(&mut self, directive: &str, tag: &str, content: &mut Vec<Bytes>) {
        tracing::error!(
            file = %self.request.filename,
            "missing value for parameter \"{}\" to tag {}",
            tag,
            directive
        );
        self.emit_error(content);
    }

    // ---------------------------------------------------------------
    // include
    // ---------------------------------------------------------------

    async fn handle_include(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if !self.ctx.flags.printing {
            return;
        }
        let mut parser = TagParser::new(args);
        loop {
            match parser.next_pair(true) {
                None => return,
                Some((tag, None)) => {
                    self.missing_value("include", &tag, content);
                    return;
                }
                Some((tag, Some(value))) if tag == "file" || tag == "virtual" => {
                    let parsed = self.interp(&value);
                    match self.render_include(tag == "file", &parsed).await {
                        Ok(parts) => content.extend(parts),
                        Err(reason) => {
                            tracing::error!(
                                file = %self.request.filename,
                                "{} \"{}\" in parsed file",
                                reason,
                                parsed
                            );
                            self.emit_error(content);
                        }
                    }
                }
                Some((tag, Some(_))) => {
                    tracing::error!(
                        file = %self.request.filename,
                        "unknown parameter \"{}\" to tag include",
                        tag
                    );
                    self.emit_error(content);
                }
            }
        }
    }

    /// Resolve and render one include target. The returned error text
    /// is the log prefix; the caller substitutes the error template.
    #[async_recursion]
    async fn render_include(&mut self, is_file: bool, path: &str) -> std::result::Result<Vec<Bytes>, String> {
        let target = if is_file {
            // only files in this directory or below
            if !is_only_below(path) {
                return Err("unable to include file".to_string());
            }
            LookupTarget::File(path)
        } else {
            LookupTarget::Virtual(path)
        };

        let sub = self
            .resolver
            .lookup(target, &self.request)
            .await
            .map_err(|_| "unable to include".to_string())?;
        if sub.status != 200 {
            return Err("unable to include".to_string());
        }
        if self.ctx.flags.no_exec {
            if let Some(ct) = &sub.content_type {
                if !ct.starts_with("text/") {
                    return Err("unable to include potential exec".to_string());
                }
            }
        }

        // refuse recursion: compare the candidate against this request
        // and its whole ancestry, by filename and by URI
        let candidate = RequestFrame {
            filename: sub.filename.clone(),
            uri: sub.uri.clone(),
        };
        let recursive = std::iter::once(&self.request.frame())
            .chain(self.chain.iter())
            .any(|f| f.filename == candidate.filename || f.uri == candidate.uri);
        if recursive {
            return Err("Recursive include of".to_string());
        }

        let body = self
            .resolver
            .read(&sub)
            .await
            .map_err(|_| "unable to include".to_string())?;

        if sub.parsed {
            let mut nested = self.nested(&sub);
            let mut parts = nested
                .feed(body)
                .await
                .map_err(|_| "unable to include".to_string())?;
            parts.extend(
                nested
                    .finish()
                    .map_err(|_| "unable to include".to_string())?,
            );
            Ok(parts)
        } else {
            Ok(vec![body])
        }
    }

    // ---------------------------------------------------------------
    // echo
    // ---------------------------------------------------------------

    fn handle_echo(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if !self.ctx.flags.printing {
            return;
        }
        let mut encoding = Encoding::Entity;
        let mut parser = TagParser::new(args);
        loop {
            match parser.next_pair(true) {
                None => return,
                Some((tag, None)) => {
                    self.missing_value("echo", &tag, content);
                    return;
                }
                Some((tag, Some(value))) => match tag.as_str() {
                    "var" => {
                        let text = {
                            let env = self.env.lock();
                            env.get(&value).map(|v| match encoding {
                                Encoding::None => v.to_string(),
                                Encoding::Url => escape_uri(v),
                                Encoding::Entity => escape_html(v),
                            })
                        };
                        match text {
                            Some(t) => content.push(Bytes::from(t)),
                            None => content.push(Bytes::from_static(b"(none)")),
                        }
                    }
                    "encoding" => match value.to_ascii_lowercase().as_str() {
                        "none" => encoding = Encoding::None,
                        "url" => encoding = Encoding::Url,
                        "entity" => encoding = Encoding::Entity,
                        _ => {
                            tracing::error!(
                                file = %self.request.filename,
                                "unknown value \"{}\" to parameter \"encoding\" of tag echo",
                                value
                            );
                            self.emit_error(content);
                        }
                    },
                    _ => {
                        tracing::error!(
                            file = %self.request.filename,
                            "unknown parameter \"{}\" in tag echo",
                            tag
                        );
                        self.emit_error(content);
                    }
                },
            }
        }
    }

    // ---------------------------------------------------------------
    // config
    // ---------------------------------------------------------------

    fn handle_config(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if !self.ctx.flags.printing {
            return;
        }
        let mut parser = TagParser::new(args);
        loop {
            match parser.next_pair(false) {
                None => return,
                Some((tag, None)) => {
                    self.missing_value("config", &tag, content);
                    return;
                }
                Some((tag, Some(value))) => match tag.as_str() {
                    "errmsg" => {
                        self.ctx.error_template = self.interp(&value);
                    }
                    "timefmt" => {
                        self.ctx.time_format = self.interp(&value);
                        self.republish_dates();
                    }
                    "sizefmt" => {
                        let parsed = decode_entities(&self.interp(&value));
                        match parsed.as_str() {
                            "bytes" => self.ctx.flags.size_in_bytes = true,
                            "abbrev" => self.ctx.flags.size_in_bytes = false,
                            _ => {}
                        }
                    }
                    _ => {
                        tracing::error!(
                            file = %self.request.filename,
                            "unknown parameter \"{}\" to tag config",
                            tag
                        );
                        self.emit_error(content);
                    }
                },
            }
        }
    }

    /// A new `timefmt` re-renders the date variables immediately.
    fn republish_dates(&self) {
        let fmt = &self.ctx.time_format;
        let now = self.request.request_time;
        let mtime = self.request.mtime.unwrap_or(now);
        let mut env = self.env.lock();
        env.set("DATE_LOCAL", format_timestamp(now, fmt, false));
        env.set("DATE_GMT", format_timestamp(now, fmt, true));
        env.set("LAST_MODIFIED", format_timestamp(mtime, fmt, false));
    }

    // ---------------------------------------------------------------
    // set
    // ---------------------------------------------------------------

    fn handle_set(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if !self.ctx.flags.printing {
            return;
        }
        let mut var: Option<String> = None;
        let mut parser = TagParser::new(args);
        loop {
            match parser.next_pair(true) {
                None => return,
                Some((tag, None)) => {
                    self.missing_value("set", &tag, content);
                    return;
                }
                Some((tag, Some(value))) => match tag.as_str() {
                    "var" => var = Some(value),
                    "value" => {
                        let Some(name) = var.clone() else {
                            tracing::error!(
                                file = %self.request.filename,
                                "variable must precede value in set directive"
                            );
                            self.emit_error(content);
                            return;
                        };
                        let parsed = self.interp(&value);
                        self.env.lock().set(name, parsed);
                    }
                    _ => {
                        tracing::error!(
                            file = %self.request.filename,
                            "Invalid tag for set directive"
                        );
                        self.emit_error(content);
                        return;
                    }
                },
            }
        }
    }

    // ---------------------------------------------------------------
    // printenv
    // ---------------------------------------------------------------

    fn handle_printenv(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if !self.ctx.flags.printing {
            return;
        }
        if TagParser::new(args).next_pair(true).is_some() {
            tracing::error!(
                file = %self.request.filename,
                "printenv directive does not take tags"
            );
            self.emit_error(content);
            return;
        }
        let text = {
            let env = self.env.lock();
            let mut text = String::new();
            for (key, value) in env.iter() {
                text.push_str(&escape_html(key));
                text.push('=');
                text.push_str(&escape_html(value));
                text.push('\n');
            }
            text
        };
        content.push(Bytes::from(text));
    }

    // ---------------------------------------------------------------
    // fsize / flastmod
    // ---------------------------------------------------------------

    async fn handle_fsize(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if !self.ctx.flags.printing {
            return;
        }
        let mut parser = TagParser::new(args);
        loop {
            match parser.next_pair(true) {
                None => return,
                Some((tag, None)) => {
                    self.missing_value("fsize", &tag, content);
                    return;
                }
                Some((tag, Some(value))) => {
                    let parsed = self.interp(&value);
                    match self.stat_target("fsize", &tag, &parsed).await {
                        Ok(meta) => {
                            let text = if self.ctx.flags.size_in_bytes {
                                exact_size(meta.size)
                            } else {
                                abbrev_size(meta.size)
                            };
                            content.push(Bytes::from(text));
                        }
                        Err(()) => self.emit_error(content),
                    }
                }
            }
        }
    }

    async fn handle_flastmod(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if !self.ctx.flags.printing {
            return;
        }
        let mut parser = TagParser::new(args);
        loop {
            match parser.next_pair(true) {
                None => return,
                Some((tag, None)) => {
                    self.missing_value("flastmod", &tag, content);
                    return;
                }
                Some((tag, Some(value))) => {
                    let parsed = self.interp(&value);
                    match self.stat_target("flastmod", &tag, &parsed).await {
                        Ok(FileMetadata {
                            mtime: Some(mtime), ..
                        }) => {
                            let text = format_timestamp(mtime, &self.ctx.time_format, false);
                            content.push(Bytes::from(text));
                        }
                        _ => self.emit_error(content),
                    }
                }
            }
        }
    }

    /// Resolve a `file=`/`virtual=` target to its metadata without
    /// producing a body.
    async fn stat_target(
        &self,
        directive: &str,
        tag: &str,
        value: &str,
    ) -> std::result::Result<FileMetadata, ()> {
        let target = match tag {
            "file" => {
                if !is_only_below(value) {
                    tracing::error!(
                        file = %self.request.filename,
                        "unable to access file \"{}\"",
                        value
                    );
                    return Err(());
                }
                LookupTarget::File(value)
            }
            "virtual" => LookupTarget::Virtual(value),
            _ => {
                tracing::error!(
                    file = %self.request.filename,
                    "unknown parameter \"{}\" to tag {}",
                    tag,
                    directive
                );
                return Err(());
            }
        };
        match self.resolver.lookup(target, &self.request).await {
            Ok(sub) if sub.status == 200 => Ok(sub.meta),
            _ => {
                tracing::error!(
                    file = %self.request.filename,
                    "unable to get information about \"{}\"",
                    value
                );
                Err(())
            }
        }
    }

    // ---------------------------------------------------------------
    // if / elif / else / endif
    // ---------------------------------------------------------------

    fn eval_condition(&mut self, expr: &str, content: &mut Vec<Bytes>) -> Option<bool> {
        let outcome = ssiflow_expr::eval_expr(expr, &self.env.lock());
        match outcome {
            Ok(res) => {
                if res.unmatched_quote {
                    tracing::debug!("unmatched ' in expression \"{}\"", expr);
                }
                Some(res.value)
            }
            Err(_) => {
                // already logged; the conditional state stays as it was
                self.emit_error(content);
                None
            }
        }
    }

    fn handle_if(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if !self.ctx.flags.printing {
            // a block that is already skipped: just track nesting so
            // the matching endif is recognized
            self.ctx.if_depth += 1;
            return;
        }
        let mut expr: Option<String> = None;
        let mut parser = TagParser::new(args);
        loop {
            match parser.next_pair(false) {
                None => {
                    let Some(e) = expr else {
                        tracing::error!(
                            file = %self.request.filename,
                            "missing expr in if statement"
                        );
                        self.emit_error(content);
                        return;
                    };
                    let Some(value) = self.eval_condition(&e, content) else {
                        return;
                    };
                    self.ctx.flags.printing = value;
                    self.ctx.flags.cond_true = value;
                    self.ctx.if_depth = 0;
                    return;
                }
                Some((tag, value)) if tag == "expr" => expr = value,
                Some((tag, _)) => {
                    tracing::error!(
                        file = %self.request.filename,
                        "unknown parameter \"{}\" to tag if",
                        tag
                    );
                    self.emit_error(content);
                }
            }
        }
    }

    fn handle_elif(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if self.ctx.if_depth != 0 {
            return;
        }
        let mut expr: Option<String> = None;
        let mut parser = TagParser::new(args);
        loop {
            match parser.next_pair(false) {
                None => {
                    // a branch already matched: everything else in the
                    // chain is a no-op
                    if self.ctx.flags.cond_true {
                        self.ctx.flags.printing = false;
                        return;
                    }
                    let Some(e) = expr else {
                        tracing::error!(
                            file = %self.request.filename,
                            "missing expr in elif statement"
                        );
                        self.emit_error(content);
                        return;
                    };
                    let Some(value) = self.eval_condition(&e, content) else {
                        return;
                    };
                    self.ctx.flags.printing = value;
                    self.ctx.flags.cond_true = value;
                    return;
                }
                Some((tag, value)) if tag == "expr" => expr = value,
                Some((tag, _)) => {
                    tracing::error!(
                        file = %self.request.filename,
                        "unknown parameter \"{}\" to tag elif",
                        tag
                    );
                    self.emit_error(content);
                }
            }
        }
    }

    fn handle_else(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if self.ctx.if_depth != 0 {
            return;
        }
        if TagParser::new(args).next_pair(true).is_some() {
            tracing::error!(
                file = %self.request.filename,
                "else directive does not take tags"
            );
            self.emit_error(content);
            return;
        }
        if self.ctx.flags.cond_true {
            self.ctx.flags.printing = false;
        } else {
            self.ctx.flags.printing = true;
            self.ctx.flags.cond_true = true;
        }
    }

    fn handle_endif(&mut self, args: &str, content: &mut Vec<Bytes>) {
        if self.ctx.if_depth != 0 {
            self.ctx.if_depth -= 1;
            return;
        }
        if TagParser::new(args).next_pair(true).is_some() {
            tracing::error!(
                file = %self.request.filename,
                "endif directive does not take tags"
            );
            self.emit_error(content);
            return;
        }
        self.ctx.flags.printing = true;
        self.ctx.flags.cond_true = true;
    }
}

/// Exact byte count with thousands separators. An unknown size keeps
/// the historical `-1` rendering.
fn exact_size(size: Option<u64>) -> String {
    let Some(size) = size else {
        return "-1".to_string();
    };
    let digits = size.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Abbreviated size in the historical fixed-width cells.
fn abbrev_size(size: Option<u64>) -> String {
    match size {
        None => "    -".to_string(),
        Some(0) => "   0k".to_string(),
        Some(s) if s < 1024 => "   1k".to_string(),
        Some(s) if s < 1_048_576 => format!("{:4}k", (s + 512) / 1024),
        Some(s) if s < 103_809_024 => format!("{:4.1}M", s as f64 / 1_048_576.0),
        Some(s) => format!("{:4}M", (s + 524_288) / 1_048_576),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_names() {
        assert_eq!(Directive::from_name("include"), Some(Directive::Include));
        assert_eq!(Directive::from_name("endif"), Some(Directive::Endif));
        assert_eq!(Directive::from_name("exec"), None);
        assert_eq!(Directive::from_name(""), None);
    }

    #[test]
    fn exact_sizes_use_thousands_separators() {
        assert_eq!(exact_size(Some(0)), "0");
        assert_eq!(exact_size(Some(999)), "999");
        assert_eq!(exact_size(Some(1000)), "1,000");
        assert_eq!(exact_size(Some(1234567)), "1,234,567");
        assert_eq!(exact_size(None), "-1");
    }

    #[test]
    fn abbreviated_size_cells() {
        assert_eq!(abbrev_size(None), "    -");
        assert_eq!(abbrev_size(Some(0)), "   0k");
        assert_eq!(abbrev_size(Some(512)), "   1k");
        assert_eq!(abbrev_size(Some(1023)), "   1k");
        assert_eq!(abbrev_size(Some(2048)), "   2k");
        assert_eq!(abbrev_size(Some(1024 * 1024 - 1)), "1024k");
        assert_eq!(abbrev_size(Some(2 * 1024 * 1024)), " 2.0M");
        assert_eq!(abbrev_size(Some(200 * 1024 * 1024)), " 200M");
    }
}

//! Configuration surface for the SSI filter.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Error template used until `#config errmsg=` overrides it.
pub const DEFAULT_ERROR_MSG: &str = "[an error occurred while processing this directive]";

/// Time format used until `#config timefmt=` overrides it.
pub const DEFAULT_TIME_FORMAT: &str = "%A, %d-%b-%Y %H:%M:%S %Z";

/// X-bit handling: `full` additionally exposes `Last-Modified` for
/// documents whose group-execute bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XBitHack {
    #[default]
    Off,
    On,
    Full,
}

/// Per-scope defaults for the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SsiConfig {
    /// X-bit policy mode.
    pub xbit_hack: XBitHack,

    /// Default user-visible error template.
    pub error_message: String,

    /// Default strftime-style time format.
    pub time_format: String,

    /// Refuse `include` of non-text content.
    pub no_exec: bool,

    /// Document root for `virtual=` lookups.
    pub root: PathBuf,
}

impl Default for SsiConfig {
    fn default() -> Self {
        Self {
            xbit_hack: XBitHack::Off,
            error_message: DEFAULT_ERROR_MSG.to_string(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            no_exec: false,
            root: PathBuf::from("."),
        }
    }
}

impl SsiConfig {
    /// Read filter defaults from disk. `.toml` files (and files with
    /// no extension) are TOML; `.json` files are JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let ext = path.extension().and_then(|e| e.to_str());
        Self::parse(&text, ext)
            .map_err(|reason| Error::Config(format!("{}: {}", path.display(), reason)))
    }

    fn parse(text: &str, ext: Option<&str>) -> std::result::Result<Self, String> {
        match ext {
            Some("json") => serde_json::from_str(text).map_err(|e| e.to_string()),
            Some("toml") | None => toml::from_str(text).map_err(|e| e.to_string()),
            Some(other) => Err(format!(
                "unsupported defaults format \"{}\", expected toml or json",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SsiConfig::default();
        assert_eq!(config.xbit_hack, XBitHack::Off);
        assert_eq!(config.error_message, DEFAULT_ERROR_MSG);
        assert_eq!(config.time_format, DEFAULT_TIME_FORMAT);
        assert!(!config.no_exec);
    }

    #[test]
    fn toml_defaults() {
        let config = SsiConfig::parse(
            r#"
            xbit_hack = "full"
            error_message = "[oops]"
            no_exec = true
            "#,
            Some("toml"),
        )
        .unwrap();
        assert_eq!(config.xbit_hack, XBitHack::Full);
        assert_eq!(config.error_message, "[oops]");
        assert!(config.no_exec);
        assert_eq!(config.time_format, DEFAULT_TIME_FORMAT);
    }

    #[test]
    fn json_defaults() {
        let config =
            SsiConfig::parse(r#"{"xbit_hack": "on", "root": "/srv/www"}"#, Some("json")).unwrap();
        assert_eq!(config.xbit_hack, XBitHack::On);
        assert_eq!(config.root, PathBuf::from("/srv/www"));
    }

    #[test]
    fn unsupported_extension_is_refused() {
        let err = SsiConfig::parse("xbit_hack = \"on\"", Some("yaml")).unwrap_err();
        assert!(err.contains("yaml"));
    }
}

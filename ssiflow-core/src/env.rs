//! Request environment and variable interpolation.
//!
//! The environment is the per-request variable table consulted by
//! `echo`, `set`, `printenv`, and the expression engine. Lookups are
//! case-sensitive; iteration preserves insertion order, which is the
//! order `printenv` emits.

use std::collections::HashMap;

/// Per-request variable table.
#[derive(Debug, Default, Clone)]
pub struct Environment {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.index.get(name).map(|&i| self.entries[i].1.as_str())
    }

    /// Set a variable, replacing any existing value in place so the
    /// original insertion position is kept.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.index.get(&name) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Append `text` to `out` without exceeding `budget` output bytes.
/// Returns false once truncation happens.
fn push_bounded(out: &mut String, text: &str, budget: usize) -> bool {
    for ch in text.chars() {
        if out.len() + ch.len_utf8() > budget {
            return false;
        }
        out.push(ch);
    }
    true
}

/// Substitute `$name` and `${name}` references in `input` from `env`.
///
/// - `\$` yields a literal `$`; any other `\x` passes both bytes through.
/// - `$name` takes the longest run of `[A-Za-z0-9_]`. An unset variable
///   is kept verbatim when `keep_undefined` is true, dropped otherwise.
/// - `${name}` reads up to the closing `}`; a missing `}` is logged and
///   aborts interpolation of the rest of the string.
/// - A lone `$` is emitted as-is.
///
/// Output is silently truncated at `budget` bytes; truncation is the
/// only failure mode, so this never returns an error.
pub fn interpolate(env: &Environment, input: &str, budget: usize, keep_undefined: bool) -> String {
    let bytes = input.as_bytes();
    let mut out = String::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if bytes.get(i + 1) == Some(&b'$') {
                    if !push_bounded(&mut out, "$", budget) {
                        return out;
                    }
                    i += 2;
                } else {
                    if !push_bounded(&mut out, "\\", budget) {
                        return out;
                    }
                    i += 1;
                }
            }
            b'$' => {
                let dollar = i;
                i += 1;
                let name = if bytes.get(i) == Some(&b'{') {
                    i += 1;
                    let start = i;
                    match input[start..].find('}') {
                        Some(rel) => {
                            i = start + rel + 1;
                            &input[start..start + rel]
                        }
                        None => {
                            tracing::error!(
                                "missing '}}' on variable \"{}\"",
                                &input[dollar..]
                            );
                            return out;
                        }
                    }
                } else {
                    let start = i;
                    while i < bytes.len()
                        && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                    {
                        i += 1;
                    }
                    &input[start..i]
                };

                let expansion = if name.is_empty() {
                    // zero-length name: just the $
                    "$"
                } else if let Some(val) = env.get(name) {
                    val
                } else if keep_undefined {
                    &input[dollar..i]
                } else {
                    continue;
                };
                if !push_bounded(&mut out, expansion, budget) {
                    return out;
                }
            }
            _ => {
                let ch = input[i..].chars().next().unwrap();
                if out.len() + ch.len_utf8() > budget {
                    return out;
                }
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    out
}

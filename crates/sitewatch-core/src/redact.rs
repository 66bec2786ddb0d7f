//! Streaming removal of per-request hidden-field tokens.
//!
//! ASP.NET-style pages embed `__VIEWSTATE`/`__EVENTVALIDATION` inputs whose
//! `value` changes on every request. The filter blanks those values so two
//! fetches of the same page hash identically. Every other byte passes through
//! untouched.
//!
//! Matching is literal: a fragment `id="<FIELD>"` (either quote style) arms
//! the filter, the next `value="` (or `value='`) in the same tag opens the
//! elided region, and the next matching quote closes it. A `>` before any
//! `value=` disarms the filter again. `id` and `value` only count as attribute
//! names when preceded by whitespace, so `grid="..."` and `data-value="..."`
//! never match. The filter is a byte-level state machine, so output does not
//! depend on how input is chunked.

use std::io::{self, Write};

use crate::error::{Error, Result};

pub const DEFAULT_FIELDS: [&str; 2] = ["__VIEWSTATE", "__EVENTVALIDATION"];

/// One hidden field whose value is replaced before comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionRule {
    pub field: String,
    pub replacement: String,
}

impl RedactionRule {
    /// Rule that replaces the value with nothing.
    pub fn blank(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            replacement: String::new(),
        }
    }
}

struct Pattern {
    bytes: Vec<u8>,
    rule: usize,
}

/// Validated rule set with its literal patterns precomputed.
pub struct RedactionRules {
    rules: Vec<RedactionRule>,
    id_patterns: Vec<Pattern>,
    value_patterns: Vec<Pattern>,
}

impl RedactionRules {
    pub fn new(rules: Vec<RedactionRule>) -> Result<Self> {
        let mut id_patterns = Vec::new();
        for (i, rule) in rules.iter().enumerate() {
            if rule.field.is_empty()
                || rule
                    .field
                    .bytes()
                    .any(|b| matches!(b, b'"' | b'\'' | b'<' | b'>') || b.is_ascii_whitespace())
            {
                return Err(Error::Redaction(format!(
                    "invalid field name {:?}",
                    rule.field
                )));
            }
            for quote in ["\"", "'"] {
                id_patterns.push(Pattern {
                    bytes: format!("id={quote}{}{quote}", rule.field).into_bytes(),
                    rule: i,
                });
            }
        }
        let value_patterns = ["value=\"", "value='"]
            .iter()
            .map(|p| Pattern {
                bytes: p.as_bytes().to_vec(),
                rule: 0,
            })
            .collect();
        Ok(Self {
            rules,
            id_patterns,
            value_patterns,
        })
    }

    /// Blank the values of the named fields.
    pub fn for_fields<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(fields.into_iter().map(RedactionRule::blank).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RedactionRules {
    fn default() -> Self {
        let rules = DEFAULT_FIELDS.iter().map(|f| RedactionRule::blank(*f)).collect();
        Self::new(rules).expect("built-in field names are valid")
    }
}

impl std::fmt::Debug for RedactionRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rules.iter().map(|r| &r.field)).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scan,
    SeekValue { rule: usize },
    Elide { quote: u8 },
}

/// Totals reported when a filter finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedactionStats {
    /// Bytes handed to the inner writer.
    pub written: u64,
    /// Token bytes dropped.
    pub elided: u64,
    /// Field values replaced.
    pub redactions: u64,
}

/// `Write` adapter that redacts on the way through to `inner`.
///
/// Bytes that may still turn out to be part of a pattern are held back until
/// the next write or [`finish`](Self::finish). Always call `finish`; dropping
/// the writer loses held-back bytes.
pub struct RedactingWriter<'r, W: Write> {
    inner: W,
    rules: &'r RedactionRules,
    state: State,
    pending: Vec<u8>,
    /// Input byte just before `pending[0]`; `None` at start of input.
    before: Option<u8>,
    stats: RedactionStats,
}

impl<'r, W: Write> RedactingWriter<'r, W> {
    pub fn new(inner: W, rules: &'r RedactionRules) -> Self {
        Self {
            inner,
            rules,
            state: State::Scan,
            pending: Vec::new(),
            before: None,
            stats: RedactionStats::default(),
        }
    }

    fn step(&mut self, b: u8, out: &mut Vec<u8>) {
        match self.state {
            State::Scan => {
                self.pending.push(b);
                let patterns = &self.rules.id_patterns;
                if let Some(rule) = advance(&mut self.pending, patterns, &mut self.before, out) {
                    self.state = State::SeekValue { rule };
                }
            }
            State::SeekValue { rule } => {
                if b == b'>' {
                    out.append(&mut self.pending);
                    out.push(b);
                    self.before = Some(b);
                    self.state = State::Scan;
                    return;
                }
                self.pending.push(b);
                let patterns = &self.rules.value_patterns;
                if advance(&mut self.pending, patterns, &mut self.before, out).is_some() {
                    out.extend_from_slice(self.rules.rules[rule].replacement.as_bytes());
                    self.stats.redactions += 1;
                    self.state = State::Elide { quote: b };
                }
            }
            State::Elide { quote } => {
                if b == quote {
                    out.push(b);
                    self.before = Some(b);
                    self.state = State::Scan;
                } else {
                    self.stats.elided += 1;
                }
            }
        }
    }

    /// Flush held-back bytes and return the inner writer with totals.
    /// Fails if the input ended inside a field value.
    pub fn finish(mut self) -> Result<(W, RedactionStats)> {
        if let State::Elide { quote } = self.state {
            return Err(Error::Redaction(format!(
                "input ended inside a redacted value (missing closing {})",
                quote as char
            )));
        }
        let tail = std::mem::take(&mut self.pending);
        self.inner
            .write_all(&tail)
            .and_then(|()| self.inner.flush())
            .map_err(|e| Error::Redaction(e.to_string()))?;
        self.stats.written += tail.len() as u64;
        Ok((self.inner, self.stats))
    }
}

impl<W: Write> Write for RedactingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = Vec::with_capacity(buf.len());
        for &b in buf {
            self.step(b, &mut out);
        }
        self.inner.write_all(&out)?;
        self.stats.written += out.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Resolve `pending` against `patterns`. On a full match the pattern bytes
/// move to `out` and the matched rule is returned. Otherwise leading bytes
/// that cannot start any pattern are released to `out`, leaving the longest
/// suffix that is still a pattern prefix. A pattern may only start where
/// the preceding byte is whitespace or the input begins; `before` carries
/// that byte across calls.
fn advance(
    pending: &mut Vec<u8>,
    patterns: &[Pattern],
    before: &mut Option<u8>,
    out: &mut Vec<u8>,
) -> Option<usize> {
    let mut start = 0;
    while start < pending.len() {
        let lead = if start == 0 { *before } else { Some(pending[start - 1]) };
        if lead.is_none_or(|b| b.is_ascii_whitespace()) {
            let candidate = &pending[start..];
            if let Some(p) = patterns.iter().find(|p| p.bytes == candidate) {
                let rule = p.rule;
                *before = pending.last().copied();
                out.extend_from_slice(&pending[..]);
                pending.clear();
                return Some(rule);
            }
            if patterns.iter().any(|p| p.bytes.starts_with(candidate)) {
                break;
            }
        }
        start += 1;
    }
    if start > 0 {
        *before = Some(pending[start - 1]);
    }
    out.extend_from_slice(&pending[..start]);
    pending.drain(..start);
    None
}

/// Redact a complete in-memory document.
pub fn redact(input: &[u8], rules: &RedactionRules) -> Result<Vec<u8>> {
    let mut writer = RedactingWriter::new(Vec::with_capacity(input.len()), rules);
    writer
        .write_all(input)
        .map_err(|e| Error::Redaction(e.to_string()))?;
    let (out, _) = writer.finish()?;
    Ok(out)
}

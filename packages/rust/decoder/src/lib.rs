//! De-obfuscation of chapter text.
//!
//! The remote service replaces ordinary glyphs with code points from a private-use
//! block. Two substitution schemes exist, each covering a fixed code-point range and
//! described by a positional table (`table[mode][codepoint - range_start]`). The
//! tables are loaded once at startup from a charset JSON file:
//!
//! ```json
//! [["的", "一", "?", ...], ["是", "了", ...]]
//! ```
//!
//! where `"?"` marks a slot with no known mapping.
//!
//! Decoding is pure and deterministic. [`Charset::decode_with_fallback`] never fails:
//! it tries mode 0, then mode 1, then degrades to [`markup::strip_markup`].

pub mod markup;

use std::ops::RangeInclusive;
use std::path::Path;

use tracing::{debug, warn};

use novelpull_shared::{NovelPullError, Result};

/// Slot value meaning "no known mapping".
pub const UNKNOWN_SENTINEL: &str = "?";

/// Substitution scheme selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Mode 0, code points `58344..=58715`.
    Primary,
    /// Mode 1, code points `58345..=58716`.
    Alternate,
}

impl DecodeMode {
    pub fn range(self) -> RangeInclusive<u32> {
        match self {
            Self::Primary => 58344..=58715,
            Self::Alternate => 58345..=58716,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Alternate => 1,
        }
    }
}

/// Soft decode failure. Handled inside [`Charset::decode_with_fallback`], never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{obfuscated} obfuscated code points but no usable mapping in {mode:?} table")]
    NoMapping { mode: DecodeMode, obfuscated: usize },
}

/// Which path produced the decoded text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    Primary,
    Alternate,
    /// Both tables failed; markup was stripped and whitespace may be lost.
    StrippedMarkup,
}

/// Output of [`Charset::decode_with_fallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub strategy: DecodeStrategy,
}

/// The two positional substitution tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Charset {
    tables: [Vec<Option<char>>; 2],
}

impl Charset {
    /// Build from raw tables; `None` slots are unknown.
    pub fn new(primary: Vec<Option<char>>, alternate: Vec<Option<char>>) -> Self {
        Self {
            tables: [primary, alternate],
        }
    }

    /// A charset with no mappings: plain text passes through, obfuscated text degrades.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the charset JSON document (two arrays of single-glyph strings).
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<Vec<String>> = serde_json::from_str(json)
            .map_err(|e| NovelPullError::Decode(format!("invalid charset JSON: {e}")))?;

        if raw.len() != 2 {
            return Err(NovelPullError::Decode(format!(
                "charset must contain exactly 2 tables, found {}",
                raw.len()
            )));
        }

        let mut tables = raw.into_iter().map(|table| {
            table
                .into_iter()
                .map(|slot| {
                    if slot == UNKNOWN_SENTINEL {
                        None
                    } else {
                        slot.chars().next()
                    }
                })
                .collect::<Vec<_>>()
        });

        let primary = tables.next().unwrap_or_default();
        let alternate = tables.next().unwrap_or_default();
        debug!(
            primary = primary.len(),
            alternate = alternate.len(),
            "charset tables loaded"
        );
        Ok(Self::new(primary, alternate))
    }

    /// Load and parse a charset file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| NovelPullError::io(path, e))?;
        Self::from_json(&json)
    }

    fn lookup(&self, mode: DecodeMode, c: char) -> Option<char> {
        let range = mode.range();
        let code = c as u32;
        if !range.contains(&code) {
            return None;
        }
        let bias = (code - range.start()) as usize;
        self.tables[mode.index()].get(bias).copied().flatten()
    }

    /// Decode with a single mode.
    ///
    /// Characters outside the mode's range, or mapped to the unknown sentinel, are
    /// emitted unchanged. Fails softly when the text contains in-range code points
    /// and not one of them maps.
    pub fn decode(&self, text: &str, mode: DecodeMode) -> std::result::Result<String, DecodeError> {
        let range = mode.range();
        let mut obfuscated = 0usize;
        let mut mapped = 0usize;
        let mut out = String::with_capacity(text.len());

        for c in text.chars() {
            if range.contains(&(c as u32)) {
                obfuscated += 1;
                if let Some(plain) = self.lookup(mode, c) {
                    mapped += 1;
                    out.push(plain);
                    continue;
                }
            }
            out.push(c);
        }

        if obfuscated > 0 && mapped == 0 {
            return Err(DecodeError::NoMapping { mode, obfuscated });
        }
        Ok(out)
    }

    /// Inverse of [`Charset::decode`] for glyphs present in the table. Used to
    /// build fixtures; glyphs without a slot are left as-is.
    pub fn encode(&self, text: &str, mode: DecodeMode) -> String {
        let start = *mode.range().start();
        let table = &self.tables[mode.index()];
        text.chars()
            .map(|c| {
                table
                    .iter()
                    .position(|slot| *slot == Some(c))
                    .and_then(|pos| char::from_u32(start + pos as u32))
                    .unwrap_or(c)
            })
            .collect()
    }

    /// Mode 0, then mode 1, then markup stripping. Never fails.
    pub fn decode_with_fallback(&self, text: &str) -> Decoded {
        let primary = match self.decode(text, DecodeMode::Primary) {
            Ok(text) => {
                return Decoded {
                    text,
                    strategy: DecodeStrategy::Primary,
                };
            }
            Err(e) => e,
        };

        match self.decode(text, DecodeMode::Alternate) {
            Ok(text) => {
                debug!(%primary, "primary table unusable, alternate table succeeded");
                Decoded {
                    text,
                    strategy: DecodeStrategy::Alternate,
                }
            }
            Err(alternate) => {
                warn!(%primary, %alternate, "both tables unusable, stripping markup");
                Decoded {
                    text: markup::strip_markup(text),
                    strategy: DecodeStrategy::StrippedMarkup,
                }
            }
        }
    }
}

//! Output formatters.
//!
//! A formatter turns a finished job's content into files under
//! `{download_dir}/{safe_name}-{work_id}/`. Formatters only read what they are
//! given; they never fetch.

mod split;
mod text;

use std::path::{Path, PathBuf};

use novelpull_shared::{AppConfig, ContentMap, NovelPullError, OrderedChapter, Result, WorkMeta};
use novelpull_storage::sanitize_filename;

pub use split::SplitFormatter;
pub use text::PlainTextFormatter;

/// Everything a formatter may read.
#[derive(Debug, Clone, Copy)]
pub struct FormatInput<'a> {
    pub meta: &'a WorkMeta,
    /// One entry per resolved chapter, in resolution order.
    pub content: &'a ContentMap,
    /// Numeral-ordered chapters with gap stand-ins.
    pub ordered: &'a [OrderedChapter],
}

/// Paragraph layout shared by the text formatters.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Indent characters inserted after each line break.
    pub paragraph_spacing: usize,
    pub indent: String,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FormatOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            paragraph_spacing: config.content.paragraph_spacing,
            indent: config.content.indent_character.clone(),
        }
    }
}

impl FormatOptions {
    /// Separator written after a title and in place of every line break in a body.
    fn line_break(&self) -> String {
        format!("\n{}", self.indent.repeat(self.paragraph_spacing))
    }

    fn layout_body(&self, body: &str) -> String {
        if self.paragraph_spacing == 0 {
            body.to_string()
        } else {
            body.replace('\n', &self.line_break())
        }
    }
}

/// An output format.
///
/// Formatters write synchronously with `std::fs`; async callers run them on the
/// blocking pool.
pub trait Formatter: Send + Sync {
    /// Name used in `formats.enabled`.
    fn name(&self) -> &'static str;

    /// Write output for one work under `out_root`; returns the files written.
    fn write(&self, input: &FormatInput<'_>, out_root: &Path) -> Result<Vec<PathBuf>>;
}

/// Build the formatters named in `names`, in order. Unknown names are a config error.
pub fn formatters_for(names: &[String], options: &FormatOptions) -> Result<Vec<Box<dyn Formatter>>> {
    names
        .iter()
        .map(|name| -> Result<Box<dyn Formatter>> {
            match name.trim().to_ascii_lowercase().as_str() {
                "txt" => Ok(Box::new(PlainTextFormatter::new(options.clone()))),
                "split" => Ok(Box::new(SplitFormatter::new(options.clone()))),
                other => Err(NovelPullError::config(format!(
                    "unknown output format '{other}' (expected txt or split)"
                ))),
            }
        })
        .collect()
}

/// `{out_root}/{safe_name}-{work_id}`.
pub fn work_output_dir(out_root: &Path, meta: &WorkMeta) -> PathBuf {
    out_root.join(format!("{}-{}", sanitize_filename(&meta.name), meta.work_id))
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| NovelPullError::io(path, e))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| NovelPullError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_known_formatters() {
        let names = vec!["txt".to_string(), "Split".to_string()];
        let formatters = formatters_for(&names, &FormatOptions::default()).unwrap();
        let built: Vec<_> = formatters.iter().map(|f| f.name()).collect();
        assert_eq!(built, vec!["txt", "split"]);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = formatters_for(&["epub".to_string()], &FormatOptions::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("epub"));
    }

    #[test]
    fn paragraph_spacing_indents_lines() {
        let options = FormatOptions {
            paragraph_spacing: 2,
            indent: "\u{3000}".into(),
        };
        assert_eq!(options.layout_body("甲\n乙"), "甲\n\u{3000}\u{3000}乙");

        let flat = FormatOptions {
            paragraph_spacing: 0,
            indent: "\u{3000}".into(),
        };
        assert_eq!(flat.layout_body("甲\n乙"), "甲\n乙");
    }
}

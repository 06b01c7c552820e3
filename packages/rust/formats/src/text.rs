//! Single merged text file in numeral order.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use novelpull_shared::Result;
use novelpull_storage::sanitize_filename;

use crate::{FormatInput, FormatOptions, Formatter, create_dir, work_output_dir, write_file};

/// Body written when a work has no chapters at all.
const EMPTY_WORK_TEXT: &str = "暂无章节内容\n";

/// Writes `{safe_name}.txt` containing every chapter, gap stand-ins included.
pub struct PlainTextFormatter {
    options: FormatOptions,
}

impl PlainTextFormatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }

    fn render(&self, input: &FormatInput<'_>) -> String {
        if input.ordered.is_empty() {
            return EMPTY_WORK_TEXT.to_string();
        }

        let line_break = self.options.line_break();
        let mut out = String::new();
        for chapter in input.ordered {
            if chapter.missing {
                warn!(title = %chapter.title, "numbering gap in merged text");
            }
            out.push('\n');
            out.push_str(&chapter.title);
            out.push_str(&line_break);
            out.push_str(&self.options.layout_body(&chapter.content));
            out.push('\n');
        }
        out
    }
}

impl Formatter for PlainTextFormatter {
    fn name(&self) -> &'static str {
        "txt"
    }

    fn write(&self, input: &FormatInput<'_>, out_root: &Path) -> Result<Vec<PathBuf>> {
        let dir = work_output_dir(out_root, input.meta);
        create_dir(&dir)?;

        let path = dir.join(format!("{}.txt", sanitize_filename(&input.meta.name)));
        write_file(&path, &self.render(input))?;
        info!(path = %path.display(), chapters = input.ordered.len(), "merged text written");
        Ok(vec![path])
    }
}

//! One text file per chapter under `Chapters/`.

use std::path::{Path, PathBuf};

use tracing::info;

use novelpull_shared::Result;
use novelpull_storage::sanitize_filename;

use crate::{FormatInput, FormatOptions, Formatter, create_dir, work_output_dir, write_file};

/// Directory holding the per-chapter files.
pub const CHAPTERS_DIR: &str = "Chapters";

pub struct SplitFormatter {
    options: FormatOptions,
}

impl SplitFormatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }
}

impl Formatter for SplitFormatter {
    fn name(&self) -> &'static str {
        "split"
    }

    fn write(&self, input: &FormatInput<'_>, out_root: &Path) -> Result<Vec<PathBuf>> {
        let dir = work_output_dir(out_root, input.meta).join(CHAPTERS_DIR);
        create_dir(&dir)?;

        let mut written = Vec::with_capacity(input.content.len());
        for (title, body) in input.content.iter() {
            let path = dir.join(format!("{}.txt", sanitize_filename(title)));
            let text = format!("{title}\n\n{}\n", self.options.layout_body(body));
            write_file(&path, &text)?;
            written.push(path);
        }

        info!(dir = %dir.display(), files = written.len(), "chapter files written");
        Ok(written)
    }
}

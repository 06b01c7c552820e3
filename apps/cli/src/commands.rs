//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use novelpull_core::pipeline::{DownloadOptions, DownloadResult, ProgressReporter, download_work};
use novelpull_core::update::update_all;
use novelpull_shared::{AppConfig, WorkId, init_config, load_config, load_config_from};
use novelpull_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// novelpull: resumable chapter downloader.
#[derive(Parser)]
#[command(
    name = "novelpull",
    version,
    about = "Download serialized works chapter by chapter, resuming where the last run stopped.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.novelpull/novelpull.toml.
    #[arg(long, global = true, env = "NOVELPULL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Download one or more works (resumes from any existing snapshot).
    Download {
        /// Work ids or work page URLs.
        #[arg(required = true)]
        works: Vec<String>,
    },

    /// Fetch new chapters for every previously downloaded work.
    Update,

    /// List works in the bookstore.
    List,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "novelpull=info",
        1 => "novelpull=debug",
        _ => "novelpull=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Download { works } => cmd_download(config_path, &works).await,
        Command::Update => cmd_update(config_path).await,
        Command::List => cmd_list(config_path).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_download(config_path: Option<&Path>, works: &[String]) -> Result<()> {
    let ids = works
        .iter()
        .map(|w| w.parse::<WorkId>())
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let config = resolve_config(config_path)?;
    let options = DownloadOptions::from_config(&config)?;

    let mut failed = Vec::new();
    for work in ids {
        info!(work_id = %work, "downloading work");
        let reporter = CliProgress::new()?;
        let outcome = download_work(&options, work, &reporter).await;
        reporter.finish();
        match outcome {
            Ok(result) => print_result(&result),
            Err(e) => {
                eprintln!("  {work}: {e}");
                failed.push(work);
            }
        }
    }

    if !failed.is_empty() {
        return Err(eyre!("{} of {} works failed", failed.len(), works.len()));
    }
    Ok(())
}

async fn cmd_update(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let options = DownloadOptions::from_config(&config)?;

    let reporter = CliProgress::new()?;
    let report = update_all(&options, &reporter).await;
    reporter.finish();
    let report = report?;

    for result in &report.results {
        print_result(result);
    }
    for (work, error) in &report.errors {
        eprintln!("  {work}: {error}");
    }
    println!(
        "  Updated {} works ({} new chapters) in {:.1}s",
        report.results.len(),
        report.fetched(),
        report.elapsed.as_secs_f64()
    );

    if !report.errors.is_empty() {
        return Err(eyre!("{} works failed to update", report.errors.len()));
    }
    Ok(())
}

async fn cmd_list(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open(Path::new(&config.directories.bookstore_dir)).await?;
    let works = storage.list_works().await?;

    if works.is_empty() {
        println!("No works downloaded yet.");
        return Ok(());
    }

    for work in works {
        let (name, status, updated) = match &work.meta {
            Some(meta) => (
                meta.name.as_str(),
                meta.status.as_deref().unwrap_or("-"),
                meta.last_updated.as_str(),
            ),
            None => ("(no metadata)", "-", "-"),
        };
        println!(
            "  {:<12} {name}  [{status}]  {} chapters  updated {updated}",
            work.work_id.to_string(),
            work.chapters
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn print_result(result: &DownloadResult) {
    println!();
    println!("  {} ({})", result.name, result.work_id);
    println!("  Status:   {}", result.status);
    println!(
        "  Chapters: {} ({} new, {} from snapshot, {} failed)",
        result.chapters, result.fetched, result.reused, result.failed
    );
    if !result.skipped_anchors.is_empty() {
        println!("  Skipped:  {} catalog entries", result.skipped_anchors.len());
    }
    if let Some(report) = &result.failure_report {
        println!("  Failures: {}", report.display());
    }
    for output in &result.outputs {
        println!("  Output:   {}", output.display());
    }
    println!("  Time:     {:.1}s", result.elapsed.as_secs_f64());
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner while resolving, then a chapter bar while fetching.
struct CliProgress {
    bar: ProgressBar,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let bar_style =
            ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} {msg}")?.progress_chars("=> ");

        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style.clone());
        bar.enable_steady_tick(Duration::from_millis(80));
        Ok(Self {
            bar,
            spinner_style,
            bar_style,
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn chapters_started(&self, total: usize) {
        if total > 0 {
            self.bar.set_style(self.bar_style.clone());
            self.bar.set_length(total as u64);
            self.bar.set_position(0);
        }
    }

    fn chapter_done(&self, title: &str, success: bool, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
        if success {
            self.bar.set_message(title.to_string());
        } else {
            self.bar.println(format!("  failed: {title}"));
        }
    }

    fn done(&self, _result: &DownloadResult) {
        // Back to the spinner; `update` reuses one reporter for every work.
        self.bar.set_style(self.spinner_style.clone());
        self.bar.set_message("");
    }
}

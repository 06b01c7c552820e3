//! Application configuration for novelpull.
//!
//! User config lives at `~/.novelpull/novelpull.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NovelPullError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "novelpull.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".novelpull";

/// Highest delay multiplier any configuration may reach.
pub const MULTIPLIER_CEILING: f64 = 5.0;

// ---------------------------------------------------------------------------
// Config structs (matching novelpull.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub directories: DirectoriesConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub content: ContentConfig,

    #[serde(default)]
    pub formats: FormatsConfig,
}

/// `[directories]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoriesConfig {
    /// Where per-work snapshots and failure reports are kept.
    #[serde(default = "default_bookstore_dir")]
    pub bookstore_dir: String,

    /// Where formatter output is written.
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            bookstore_dir: default_bookstore_dir(),
            download_dir: default_download_dir(),
        }
    }
}

fn default_bookstore_dir() -> String {
    "bookstore".into()
}
fn default_download_dir() -> String {
    "downloads".into()
}

/// `[network]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Remote service origin.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per chapter (including the first).
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Backoff before each retry; the last value repeats once exhausted.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,

    /// Pick a new user agent on every session rotation.
    #[serde(default = "default_true")]
    pub rotate_user_agent: bool,

    /// Decoded chapters shorter than this count as a fetch failure.
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            retry_count: default_retry_count(),
            backoff_ms: default_backoff_ms(),
            rotate_user_agent: true,
            min_content_chars: default_min_content_chars(),
        }
    }
}

fn default_base_url() -> String {
    "https://fanqienovel.com".into()
}
fn default_request_timeout() -> u64 {
    10
}
fn default_retry_count() -> u32 {
    3
}
fn default_backoff_ms() -> Vec<u64> {
    vec![1000]
}
fn default_true() -> bool {
    true
}
fn default_min_content_chars() -> usize {
    10
}

/// Named inter-request delay presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayMode {
    Fast,
    #[default]
    Normal,
    Safe,
    Custom,
}

/// `[performance]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Size of the chapter worker pool.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,

    #[serde(default)]
    pub delay_mode: DelayMode,

    /// Base delay window in ms, used when `delay_mode = "custom"`.
    #[serde(default = "default_custom_delay")]
    pub custom_delay: [u64; 2],

    /// Independent "reading time" delay window in ms, applied after every success.
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: [u64; 2],

    /// Snapshot the content map after this many completed chapters.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            delay_mode: DelayMode::default(),
            custom_delay: default_custom_delay(),
            dwell_ms: default_dwell_ms(),
            snapshot_every: default_snapshot_every(),
        }
    }
}

fn default_thread_count() -> usize {
    8
}
fn default_custom_delay() -> [u64; 2] {
    [150, 300]
}
fn default_dwell_ms() -> [u64; 2] {
    [100, 400]
}
fn default_snapshot_every() -> usize {
    5
}

impl PerformanceConfig {
    /// Base delay window in ms for the configured mode.
    pub fn delay_window(&self) -> [u64; 2] {
        match self.delay_mode {
            DelayMode::Fast => [50, 100],
            DelayMode::Normal => [100, 200],
            DelayMode::Safe => [200, 500],
            DelayMode::Custom => self.custom_delay,
        }
    }
}

/// How the initial session token is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookieMode {
    #[default]
    Auto,
    Manual,
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub cookie_mode: CookieMode,

    /// Cookie used verbatim in `manual` mode.
    #[serde(default)]
    pub manual_cookie: String,

    /// Rotate after this many consecutive chapter failures (0 disables).
    #[serde(default = "default_rotate_after_failures")]
    pub rotate_after_failures: u32,

    /// Rotate after this many successes since the last rotation (0 disables).
    #[serde(default = "default_rotate_after_successes")]
    pub rotate_after_successes: u32,

    /// Candidate cookies tried per rotation before falling back.
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Probe content must be longer than this to accept a cookie.
    #[serde(default = "default_probe_min_chars")]
    pub probe_min_chars: usize,

    /// Consecutive failures before the delay multiplier starts climbing.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_step_up")]
    pub multiplier_step_up: f64,

    #[serde(default = "default_step_down")]
    pub multiplier_step_down: f64,

    #[serde(default = "default_multiplier_max")]
    pub multiplier_max: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_mode: CookieMode::default(),
            manual_cookie: String::new(),
            rotate_after_failures: default_rotate_after_failures(),
            rotate_after_successes: default_rotate_after_successes(),
            probe_attempts: default_probe_attempts(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_min_chars: default_probe_min_chars(),
            failure_threshold: default_failure_threshold(),
            multiplier_step_up: default_step_up(),
            multiplier_step_down: default_step_down(),
            multiplier_max: default_multiplier_max(),
        }
    }
}

fn default_rotate_after_failures() -> u32 {
    8
}
fn default_rotate_after_successes() -> u32 {
    20
}
fn default_probe_attempts() -> u32 {
    5
}
fn default_probe_interval_ms() -> u64 {
    100
}
fn default_probe_min_chars() -> usize {
    200
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_step_up() -> f64 {
    0.5
}
fn default_step_down() -> f64 {
    0.1
}
fn default_multiplier_max() -> f64 {
    5.0
}

/// `[content]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Path to the two-table charset JSON. Without it, obfuscated text cannot be decoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset_path: Option<String>,

    /// Number of indent characters inserted after each line break in text output.
    #[serde(default)]
    pub paragraph_spacing: usize,

    #[serde(default = "default_indent_character")]
    pub indent_character: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            charset_path: None,
            paragraph_spacing: 0,
            indent_character: default_indent_character(),
        }
    }
}

fn default_indent_character() -> String {
    "\u{3000}".into()
}

/// `[formats]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatsConfig {
    /// Formatter names to run after a job (`txt`, `split`).
    #[serde(default = "default_enabled_formats")]
    pub enabled: Vec<String>,
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_formats(),
        }
    }
}

fn default_enabled_formats() -> Vec<String> {
    vec!["txt".into()]
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub retry_count: u32,
    pub backoff: Vec<Duration>,
    pub worker_count: usize,
    pub min_content_chars: usize,
    pub snapshot_every: usize,
    pub pacing: PacingConfig,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.network.base_url.clone(),
            request_timeout: Duration::from_secs(config.network.request_timeout_secs),
            retry_count: config.network.retry_count.max(1),
            backoff: config
                .network
                .backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            worker_count: config.performance.thread_count.max(1),
            min_content_chars: config.network.min_content_chars,
            snapshot_every: config.performance.snapshot_every,
            pacing: PacingConfig::from(config),
        }
    }
}

/// Post-success pacing windows, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct PacingConfig {
    pub delay_ms: [u64; 2],
    pub dwell_ms: [u64; 2],
}

impl From<&AppConfig> for PacingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            delay_ms: config.performance.delay_window(),
            dwell_ms: config.performance.dwell_ms,
        }
    }
}

/// Session rotation and adaptive-delay policy.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub manual_cookie: Option<String>,
    pub rotate_user_agent: bool,
    pub rotate_after_failures: u32,
    pub rotate_after_successes: u32,
    pub probe_attempts: u32,
    pub probe_interval: Duration,
    pub probe_min_chars: usize,
    pub failure_threshold: u32,
    pub step_up: f64,
    pub step_down: f64,
    pub multiplier_max: f64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SessionPolicy {
    fn from(config: &AppConfig) -> Self {
        let session = &config.session;
        let multiplier_max = if session.multiplier_max.is_finite() {
            session.multiplier_max.clamp(1.0, MULTIPLIER_CEILING)
        } else {
            MULTIPLIER_CEILING
        };
        let manual_cookie = match session.cookie_mode {
            CookieMode::Manual if !session.manual_cookie.is_empty() => {
                Some(session.manual_cookie.clone())
            }
            _ => None,
        };
        Self {
            manual_cookie,
            rotate_user_agent: config.network.rotate_user_agent,
            rotate_after_failures: session.rotate_after_failures,
            rotate_after_successes: session.rotate_after_successes,
            probe_attempts: session.probe_attempts,
            probe_interval: Duration::from_millis(session.probe_interval_ms),
            probe_min_chars: session.probe_min_chars,
            failure_threshold: session.failure_threshold,
            step_up: session.multiplier_step_up,
            step_down: session.multiplier_step_down,
            multiplier_max,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.novelpull/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| NovelPullError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.novelpull/novelpull.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NovelPullError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        NovelPullError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| NovelPullError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| NovelPullError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NovelPullError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configurations the engine cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let perf = &config.performance;
    if perf.custom_delay[0] > perf.custom_delay[1] || perf.dwell_ms[0] > perf.dwell_ms[1] {
        return Err(NovelPullError::config(
            "delay windows must be [min, max] with min <= max",
        ));
    }
    if config.network.backoff_ms.is_empty() {
        return Err(NovelPullError::config("network.backoff_ms must not be empty"));
    }
    if config.session.cookie_mode == CookieMode::Manual && config.session.manual_cookie.is_empty() {
        return Err(NovelPullError::config(
            "session.cookie_mode = \"manual\" requires session.manual_cookie",
        ));
    }
    let session = &config.session;
    for (name, step) in [
        ("multiplier_step_up", session.multiplier_step_up),
        ("multiplier_step_down", session.multiplier_step_down),
    ] {
        if !step.is_finite() || step <= 0.0 {
            return Err(NovelPullError::config(format!(
                "session.{name} must be a positive number, got {step}"
            )));
        }
    }
    if !(1.0..=MULTIPLIER_CEILING).contains(&session.multiplier_max) {
        return Err(NovelPullError::config(format!(
            "session.multiplier_max must be within 1.0..={MULTIPLIER_CEILING}, got {}",
            session.multiplier_max
        )));
    }
    url::Url::parse(&config.network.base_url).map_err(|e| {
        NovelPullError::config(format!("invalid network.base_url '{}': {e}", config.network.base_url))
    })?;
    Ok(())
}

//! Configuration loading and resolution.
//!
//! A single JSON file drives a run. Every section has defaults, so a file
//! holding only `source` and `locations` is complete.

use std::fmt;
use std::path::{Path, PathBuf};

use landcomp::partition::{
    default_price_ranges, default_size_ranges, partition_locations, validate_ranges,
    SearchTemplate,
};
use landcomp::{PriceRange, Query, SizeRange};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Env var naming the config file.
pub const CONFIG_ENV: &str = "LANDCOMP_CONFIG";
/// Env vars holding the source account credentials.
pub const ACCOUNT_ENV: &str = "LANDCOMP_ACCOUNT";
pub const SECRET_ENV: &str = "LANDCOMP_SECRET";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("credentials missing: set LANDCOMP_ACCOUNT and LANDCOMP_SECRET or add a credentials section")]
    MissingCredentials,
    #[error("source not configured: {0} is empty")]
    MissingSource(&'static str),
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    /// Locations (ZIP codes or region slugs), processed in order.
    pub locations: Vec<String>,
    pub size_ranges: Option<Vec<SizeRange>>,
    pub price_ranges: Option<Vec<PriceRange>>,
    pub throttle: ThrottleConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub headless: bool,
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing)]
    pub credentials: Option<Credentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            locations: Vec::new(),
            size_ranges: None,
            price_ranges: None,
            throttle: ThrottleConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            headless: true,
            data_dir: None,
            credentials: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Page that hosts the sign-in flow.
    pub login_url: String,
    /// Sold-listing search URL; see [`SearchTemplate`] for placeholders.
    pub search_url_template: String,
    /// Direct export URL for authenticated replay. When absent, replay uses
    /// the export control's link target.
    pub export_url_template: Option<String>,
    /// Regex matched against response URLs during network interception.
    pub export_url_pattern: String,
    /// Header that carries the anti-forgery token on replay.
    pub csrf_header: String,
    /// Maximum rows the source returns per export.
    pub row_cap: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            login_url: String::new(),
            search_url_template: String::new(),
            export_url_template: None,
            export_url_pattern: r"(?i)(download|export|gis-csv)".to_string(),
            csrf_header: "X-CSRF-Token".to_string(),
            row_cap: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Minimum gap between queries.
    pub min_delay_ms: u64,
    /// Gap after a failed query.
    pub failure_delay_ms: u64,
    /// Upper bound of the random extra delay.
    pub jitter_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 4_000,
            failure_delay_ms: 15_000,
            jitter_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Navigation attempts per query.
    pub attempts: u32,
    /// First backoff; doubles per attempt.
    pub base_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub navigation_ms: u64,
    /// Poll interval while probing for controls.
    pub probe_poll_ms: u64,
    /// Time allowed for the page to drop the password field after submit.
    pub login_settle_ms: u64,
    pub download_ms: u64,
    pub intercept_ms: u64,
    pub replay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            probe_poll_ms: 250,
            login_settle_ms: 8_000,
            download_ms: 60_000,
            intercept_ms: 30_000,
            replay_ms: 60_000,
        }
    }
}

/// Account credentials for the source.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub account: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(account: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            secret: secret.into(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.account.trim().is_empty() && !self.secret.is_empty()
    }

    /// Resolve from the environment, falling back to the config section.
    pub fn resolve(fallback: Option<&Credentials>) -> Result<Self, ConfigError> {
        Self::resolve_with(|key| std::env::var(key).ok(), fallback)
    }

    pub fn resolve_with(
        lookup: impl Fn(&str) -> Option<String>,
        fallback: Option<&Credentials>,
    ) -> Result<Self, ConfigError> {
        if let (Some(account), Some(secret)) = (lookup(ACCOUNT_ENV), lookup(SECRET_ENV)) {
            let creds = Self::new(account, secret);
            if creds.is_complete() {
                return Ok(creds);
            }
        }
        match fallback {
            Some(creds) if creds.is_complete() => Ok(creds.clone()),
            _ => Err(ConfigError::MissingCredentials),
        }
    }
}

/// Resolve the config file path.
///
/// Order: explicit flag, `LANDCOMP_CONFIG`, `./landcomp.json`,
/// `~/.landcomp/config.json`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    resolve_config_path_with(
        explicit,
        std::env::var(CONFIG_ENV).ok(),
        Path::new("."),
        &default_home(),
    )
}

/// [`resolve_config_path`] with the environment, working directory and home
/// supplied by the caller.
pub fn resolve_config_path_with(
    explicit: Option<&Path>,
    env_path: Option<String>,
    cwd: &Path,
    home: &Path,
) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Some(env_path) = env_path.filter(|p| !p.is_empty()) {
        return PathBuf::from(env_path);
    }

    let cwd_config = cwd.join("landcomp.json");
    if cwd_config.exists() {
        return cwd_config;
    }

    home.join("config.json")
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".landcomp")
}

impl Config {
    /// Load the resolved config file. A missing file is only an error when
    /// it was named explicitly; otherwise defaults are returned.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_config_path(explicit);
        if !path.exists() && explicit.is_none() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn size_ranges(&self) -> Vec<SizeRange> {
        self.size_ranges.clone().unwrap_or_else(default_size_ranges)
    }

    pub fn price_ranges(&self) -> Vec<PriceRange> {
        self.price_ranges
            .clone()
            .unwrap_or_else(default_price_ranges)
    }

    /// Every query for the configured locations, in processing order.
    pub fn queries(&self) -> Result<Vec<Query>, ConfigError> {
        let sizes = self.size_ranges();
        let prices = self.price_ranges();
        validate_ranges(&sizes, &prices).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(partition_locations(&self.locations, &sizes, &prices))
    }

    pub fn search_template(&self) -> SearchTemplate {
        SearchTemplate::new(&self.source.search_url_template)
    }

    pub fn export_template(&self) -> Option<SearchTemplate> {
        self.source
            .export_url_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(SearchTemplate::new)
    }

    pub fn export_pattern(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.source.export_url_pattern)
            .map_err(|e| ConfigError::Invalid(format!("export_url_pattern: {e}")))
    }

    /// Check everything `run` needs before contacting the source.
    pub fn validate_for_run(&self) -> Result<(), ConfigError> {
        if self.source.login_url.trim().is_empty() {
            return Err(ConfigError::MissingSource("source.login_url"));
        }
        if self.source.search_url_template.trim().is_empty() {
            return Err(ConfigError::MissingSource("source.search_url_template"));
        }
        if !self.source.search_url_template.contains("{location}") {
            return Err(ConfigError::Invalid(
                "source.search_url_template has no {location} placeholder".into(),
            ));
        }
        if self.locations.is_empty() {
            return Err(ConfigError::Invalid("no locations configured".into()));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid("retry.attempts must be at least 1".into()));
        }
        self.export_pattern()?;
        self.queries()?;
        Ok(())
    }

    /// Data directory: explicit override, config value, then `~/.landcomp`.
    pub fn data_paths(&self, override_dir: Option<&Path>) -> DataPaths {
        let root = override_dir
            .map(Path::to_path_buf)
            .or_else(|| self.data_dir.clone())
            .unwrap_or_else(default_home);
        DataPaths::new(root)
    }
}

/// Fixed layout under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
    pub ledger: PathBuf,
    /// Per-query CSV exports.
    pub raw: PathBuf,
    /// Browser download staging.
    pub downloads: PathBuf,
    pub output: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            ledger: root.join("ledger.jsonl"),
            raw: root.join("raw"),
            downloads: root.join("downloads"),
            output: root.join("output"),
            root,
        }
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.root, &self.raw, &self.downloads, &self.output] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn normalized_csv(&self) -> PathBuf {
        self.output.join("normalized.csv")
    }

    pub fn matrix_json(&self) -> PathBuf {
        self.output.join("matrix.json")
    }

    pub fn matrix_csv(&self) -> PathBuf {
        self.output.join("matrix.csv")
    }
}

use clap::Parser;
use log::{warn, LevelFilter};
use reqwest::Url;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::model::Labels;
use crate::scrape::{NormalizedJob, Target, TargetTable};
use crate::Settings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Debug, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scrape_configs: Vec<ScrapeConfig>,
}

#[derive(Deserialize, Debug)]
pub struct GlobalConfig {
    #[serde(
        default = "default_scrape_interval",
        deserialize_with = "duration_deserialize"
    )]
    pub scrape_interval: Duration,
    #[serde(
        default = "default_scrape_timeout",
        deserialize_with = "duration_deserialize"
    )]
    pub scrape_timeout: Duration,
    #[serde(default)]
    pub external_labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level", deserialize_with = "level_deserialize")]
    pub level: LevelFilter,
    pub file: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ScrapeConfig {
    pub job_name: String,
    #[serde(default, deserialize_with = "opt_duration_deserialize")]
    pub scrape_interval: Option<Duration>,
    #[serde(default, deserialize_with = "opt_duration_deserialize")]
    pub scrape_timeout: Option<Duration>,
    pub metrics_path: Option<String>,
    #[serde(default)]
    pub static_configs: Vec<StaticConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StaticConfig {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_scrape_interval() -> Duration {
    Settings::DEFAULT_SCRAPE_INTERVAL
}
fn default_scrape_timeout() -> Duration {
    Settings::DEFAULT_SCRAPE_TIMEOUT
}
fn default_log_level() -> LevelFilter {
    LevelFilter::Info
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

/// Parses `500ms`, `15s`, `2m`, `1h`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "" | "s" => Some(Duration::from_secs(n)),
        "ms" => Some(Duration::from_millis(n)),
        "m" => Some(Duration::from_secs(n.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(n.checked_mul(3600)?)),
        _ => None,
    }
}

fn duration_deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(s) => Ok(Duration::from_secs(s)),
        RawDuration::Text(s) => parse_duration(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid duration {:?}", s))),
    }
}

fn opt_duration_deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    duration_deserialize(deserializer).map(Some)
}

fn level_deserialize<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<LevelFilter>()
        .map_err(|_| serde::de::Error::custom("Invalid log level"))
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            scrape_interval: default_scrape_interval(),
            scrape_timeout: default_scrape_timeout(),
            external_labels: BTreeMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

impl AppConfig {
    pub fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents, path)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings `process` relies on, against resolved values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let global = &self.global;
        if global.scrape_interval.is_zero() {
            return Err(ConfigError::Invalid("global scrape_interval must be > 0".into()));
        }
        if global.scrape_timeout > global.scrape_interval {
            return Err(ConfigError::Invalid(format!(
                "global scrape_timeout ({:?}) must be <= scrape_interval ({:?})",
                global.scrape_timeout, global.scrape_interval
            )));
        }

        let mut seen = HashSet::new();
        for (i, sc) in self.scrape_configs.iter().enumerate() {
            if sc.job_name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "scrape_configs[{}]: job_name is required",
                    i
                )));
            }
            if !seen.insert(sc.job_name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "job {:?}: duplicate job_name",
                    sc.job_name
                )));
            }

            let (interval, timeout) = self.resolve_timing(sc);
            if interval.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "job {:?}: scrape_interval must be > 0",
                    sc.job_name
                )));
            }
            if timeout > interval {
                return Err(ConfigError::Invalid(format!(
                    "job {:?}: scrape_timeout ({:?}) must be <= scrape_interval ({:?})",
                    sc.job_name, timeout, interval
                )));
            }

            if sc.static_configs.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "job {:?}: no targets configured",
                    sc.job_name
                )));
            }
            for (j, stc) in sc.static_configs.iter().enumerate() {
                if stc.targets.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "job {:?}: static_configs[{}] has no targets",
                        sc.job_name, j
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_timing(&self, sc: &ScrapeConfig) -> (Duration, Duration) {
        (
            sc.scrape_interval.unwrap_or(self.global.scrape_interval),
            sc.scrape_timeout.unwrap_or(self.global.scrape_timeout),
        )
    }

    /// Resolves per-job defaults, target URLs and label sets.
    pub fn process(&self) -> TargetTable {
        let external: Labels = self.global.external_labels.clone().into();
        let mut table = TargetTable::with_capacity(self.scrape_configs.len());

        for sc in &self.scrape_configs {
            let (scrape_interval, scrape_timeout) = self.resolve_timing(sc);
            let metrics_path = sc
                .metrics_path
                .as_deref()
                .filter(|p| !p.is_empty())
                .unwrap_or(Settings::DEFAULT_METRICS_PATH);

            let mut static_targets = Vec::new();
            for stc in &sc.static_configs {
                let mut labels = external.clone();
                labels.merge(&Labels::from(stc.labels.clone()));

                for target in &stc.targets {
                    match build_target_url(target, metrics_path) {
                        Some(url) => static_targets.push(Target::new(url, labels.clone())),
                        None => warn!("Job {}: skipping unparsable target {:?}", sc.job_name, target),
                    }
                }
            }

            table.insert(
                sc.job_name.clone(),
                NormalizedJob {
                    job_name: sc.job_name.clone(),
                    scrape_interval,
                    scrape_timeout,
                    static_targets,
                },
            );
        }
        table
    }
}

/// Prefixes bare `host:port` targets with `http://` and appends the metrics
/// path to whatever path the target already has.
pub fn build_target_url(target: &str, metrics_path: &str) -> Option<String> {
    let target = if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    };
    let mut url = Url::parse(&target).ok()?;
    if url.cannot_be_a_base() {
        return None;
    }
    let joined = join_path(url.path(), metrics_path);
    url.set_path(&joined);
    Some(url.to_string())
}

fn join_path(base: &str, extra: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in base.split('/').chain(extra.split('/')) {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    /// Overrides the configured log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<LevelFilter>,
}

/// Loads the file named on the command line, or the defaults if it does not exist.
pub fn load_config(cli_args: &CliArgs) -> Result<AppConfig, ConfigError> {
    let path = Path::new(&cli_args.config);
    let mut config = if path.exists() {
        AppConfig::load(path)?
    } else {
        AppConfig::default()
    };

    if let Some(level) = cli_args.log_level {
        config.logging.level = level;
    }

    Ok(config)
}

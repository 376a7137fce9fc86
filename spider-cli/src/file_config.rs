//! Hand-parsed `key = value` file configuration, merged under explicit CLI
//! flags to produce a [`spider_core::SpiderConfig`].
//!
//! Grounded in the teacher CLI's `app_config` loader: same resolution order
//! (`$XDG_CONFIG_HOME` then `$HOME/.config`), same inline-comment-stripping
//! line parser, same "unknown key is an error" posture.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// File-backed overrides for [`spider_core::SpiderConfig`]. Every field is
/// optional; an absent field falls through to the CLI flag, then to
/// [`spider_core::SpiderConfig::default`].
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Default data-flow sink name, resolved via the storage registry.
    pub storage: Option<String>,
    /// Max admission attempts per request.
    pub retried_times: Option<u32>,
    /// Depth limit; `0` disables the check.
    pub depth: Option<u32>,
    /// Dispatch pacing target, requests/second.
    pub speed: Option<f64>,
    /// Soft cap on in-flight requests before back-pressure pauses dispatch.
    pub requested_queue_count: Option<u32>,
    /// Idle/paused terminal threshold, in seconds.
    pub empty_sleep_time: Option<u32>,
    /// In-flight timeout, in milliseconds.
    pub request_timeout_ms: Option<u64>,
    /// Whether to lease a proxy before every publish.
    pub use_proxy: Option<bool>,
}

impl FileConfig {
    /// Validates range constraints on whichever fields are present.
    pub fn validate(&self) -> Result<()> {
        if let Some(retried_times) = self.retried_times
            && retried_times < 1
        {
            bail!("Invalid config value for `retried_times`: {retried_times}. Expected >= 1");
        }
        if let Some(speed) = self.speed
            && !(speed > 0.0)
        {
            bail!("Invalid config value for `speed`: {speed}. Expected > 0");
        }
        if let Some(requested_queue_count) = self.requested_queue_count
            && requested_queue_count == 0
        {
            bail!(
                "Invalid config value for `requested_queue_count`: {requested_queue_count}. Expected > 0"
            );
        }
        Ok(())
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/spider/config.toml`
/// 2. `$HOME/.config/spider/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("spider").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join("spider").join("config.toml"))
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    };

    if !path_ref.exists() {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
        loaded_from_file: true,
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw).with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Loads config from an explicitly given path (e.g. `--config`), rather
/// than the default resolution order.
pub fn load_file_config_at(path: &Path) -> Result<FileConfig> {
    load_file_config(path)
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {}: expected key = value", line_index + 1);
        };

        let key = raw_key.trim();
        let value = raw_value.trim();

        match key {
            "storage" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `storage` value on line {}", line_index + 1))?;
                cfg.storage = Some(parsed);
            }
            "retried_times" => {
                let parsed = parse_integer_u32(value).with_context(|| {
                    format!("Invalid `retried_times` value on line {}", line_index + 1)
                })?;
                cfg.retried_times = Some(parsed);
            }
            "depth" => {
                let parsed = parse_integer_u32(value)
                    .with_context(|| format!("Invalid `depth` value on line {}", line_index + 1))?;
                cfg.depth = Some(parsed);
            }
            "speed" => {
                let parsed = parse_f64(value)
                    .with_context(|| format!("Invalid `speed` value on line {}", line_index + 1))?;
                cfg.speed = Some(parsed);
            }
            "requested_queue_count" => {
                let parsed = parse_integer_u32(value).with_context(|| {
                    format!("Invalid `requested_queue_count` value on line {}", line_index + 1)
                })?;
                cfg.requested_queue_count = Some(parsed);
            }
            "empty_sleep_time" => {
                let parsed = parse_integer_u32(value).with_context(|| {
                    format!("Invalid `empty_sleep_time` value on line {}", line_index + 1)
                })?;
                cfg.empty_sleep_time = Some(parsed);
            }
            "request_timeout_ms" => {
                let parsed = parse_integer_u64(value).with_context(|| {
                    format!("Invalid `request_timeout_ms` value on line {}", line_index + 1)
                })?;
                cfg.request_timeout_ms = Some(parsed);
            }
            "use_proxy" => {
                let parsed = parse_boolean(value)
                    .with_context(|| format!("Invalid `use_proxy` value on line {}", line_index + 1))?;
                cfg.use_proxy = Some(parsed);
            }
            unknown => {
                bail!("Unknown configuration key: '{}' on line {}", unknown, line_index + 1);
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u32(raw_value: &str) -> Result<u32> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i64>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u32::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u32"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_f64(raw_value: &str) -> Result<f64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected numeric value");
    }
    Ok(token.parse::<f64>()?)
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

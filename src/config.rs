//! Door configuration file.
//!
//! The file is a list of `key = value` lines. Strings are double quoted,
//! `#` starts a comment. All keys are optional:
//!
//! ```text
//! door_name = "webdav"
//! domain_name = "doorDomain"
//! pool_manager_timeout_ms = 300000
//! pool_timeout_ms = 90000
//! namespace_timeout_ms = 300000
//! mover_timeout_ms = 300000
//! kill_timeout_ms = 10000
//! retry_policy = "try_until_timeout"   # never_fail | try_once | try_until_timeout | custom
//! total_timeout_ms = 60000
//! retry_count = 5                      # custom only
//! retry_period_ms = 500                # custom only
//! mover_start_timeout_ms = 500
//! io_queue = "wan"
//! overwrite_allowed = false
//! create_parents = false
//! verbosity = "verbose"                # default | verbose | quiet | debug
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::door::{DEFAULT_KILL_TIMEOUT, DEFAULT_MOVER_TIMEOUT, DoorSettings};
use crate::retry::{DEFAULT_MOVER_START_TIMEOUT, DEFAULT_RETRY_PERIOD, RetryPolicy, UNBOUNDED_TIMEOUT};
use crate::session::DoorAddress;
use crate::transfer::Timeouts;

/// Longest timeout accepted for any key (one day).
const MAX_TIMEOUT_MS: u64 = 86_400_000;

/// Name of the retry policy preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicyKind {
    NeverFail,
    TryOnce,
    TryUntilTimeout,
    Custom,
}

impl RetryPolicyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NeverFail => "never_fail",
            Self::TryOnce => "try_once",
            Self::TryUntilTimeout => "try_until_timeout",
            Self::Custom => "custom",
        }
    }
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }
}

/// Parsed configuration file. Missing keys fall back to built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoorConfig {
    pub door_name: Option<String>,
    pub domain_name: Option<String>,
    pub pool_manager_timeout_ms: Option<u64>,
    pub pool_timeout_ms: Option<u64>,
    pub namespace_timeout_ms: Option<u64>,
    pub mover_timeout_ms: Option<u64>,
    pub kill_timeout_ms: Option<u64>,
    pub retry_policy: Option<RetryPolicyKind>,
    pub retry_count: Option<u32>,
    pub retry_period_ms: Option<u64>,
    pub total_timeout_ms: Option<u64>,
    pub mover_start_timeout_ms: Option<u64>,
    pub io_queue: Option<String>,
    pub overwrite_allowed: Option<bool>,
    pub create_parents: Option<bool>,
    pub verbosity: Option<VerbositySetting>,
}

impl DoorConfig {
    /// Checks value ranges and key combinations.
    ///
    /// # Errors
    ///
    /// Fails on a zero or overlong timeout, on a zero retry count, and on
    /// retry keys that the selected policy does not use.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("pool_manager_timeout_ms", self.pool_manager_timeout_ms),
            ("pool_timeout_ms", self.pool_timeout_ms),
            ("namespace_timeout_ms", self.namespace_timeout_ms),
            ("mover_timeout_ms", self.mover_timeout_ms),
            ("kill_timeout_ms", self.kill_timeout_ms),
            ("total_timeout_ms", self.total_timeout_ms),
            ("mover_start_timeout_ms", self.mover_start_timeout_ms),
        ] {
            validate_timeout_ms(key, value)?;
        }
        if let Some(period) = self.retry_period_ms.filter(|period| *period > MAX_TIMEOUT_MS) {
            bail!(
                "Invalid config value for `retry_period_ms`: {period}. Expected range: 0..={MAX_TIMEOUT_MS}"
            );
        }
        if self.retry_count == Some(0) {
            bail!("Invalid config value for `retry_count`: 0. Expected a positive number");
        }

        let kind = self.retry_policy_kind();
        if kind != RetryPolicyKind::Custom {
            if self.retry_count.is_some() {
                bail!("`retry_count` requires retry_policy = \"custom\", found \"{}\"", kind.as_str());
            }
            if self.retry_period_ms.is_some() {
                bail!("`retry_period_ms` requires retry_policy = \"custom\", found \"{}\"", kind.as_str());
            }
        }
        if kind == RetryPolicyKind::NeverFail && self.total_timeout_ms.is_some() {
            bail!("`total_timeout_ms` cannot be combined with retry_policy = \"never_fail\"");
        }
        Ok(())
    }

    #[must_use]
    pub fn retry_policy_kind(&self) -> RetryPolicyKind {
        self.retry_policy.unwrap_or(RetryPolicyKind::NeverFail)
    }

    /// The retry policy this configuration names.
    ///
    /// `try_once` and `try_until_timeout` default to a one minute budget.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let total = self
            .total_timeout_ms
            .map_or(Duration::from_secs(60), Duration::from_millis);
        let mover_start = self
            .mover_start_timeout_ms
            .map_or(DEFAULT_MOVER_START_TIMEOUT, Duration::from_millis);

        match self.retry_policy_kind() {
            RetryPolicyKind::NeverFail => RetryPolicy::new(
                crate::retry::UNBOUNDED_RETRIES,
                DEFAULT_RETRY_PERIOD,
                UNBOUNDED_TIMEOUT,
                mover_start,
            ),
            RetryPolicyKind::TryOnce => {
                RetryPolicy::new(1, Duration::ZERO, total, mover_start)
            }
            RetryPolicyKind::TryUntilTimeout => RetryPolicy::new(
                crate::retry::UNBOUNDED_RETRIES,
                DEFAULT_RETRY_PERIOD,
                total,
                mover_start,
            ),
            RetryPolicyKind::Custom => RetryPolicy::new(
                self.retry_count.unwrap_or(crate::retry::UNBOUNDED_RETRIES),
                self.retry_period_ms
                    .map_or(DEFAULT_RETRY_PERIOD, Duration::from_millis),
                self.total_timeout_ms
                    .map_or(UNBOUNDED_TIMEOUT, Duration::from_millis),
                mover_start,
            ),
        }
    }

    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        let defaults = Timeouts::default();
        Timeouts {
            namespace: self
                .namespace_timeout_ms
                .map_or(defaults.namespace, Duration::from_millis),
            pool_manager: self
                .pool_manager_timeout_ms
                .map_or(defaults.pool_manager, Duration::from_millis),
            pool: self
                .pool_timeout_ms
                .map_or(defaults.pool, Duration::from_millis),
        }
    }

    #[must_use]
    pub fn door_address(&self) -> DoorAddress {
        DoorAddress::new(
            self.door_name.as_deref().unwrap_or("door"),
            self.domain_name.as_deref().unwrap_or("doorDomain"),
        )
    }

    #[must_use]
    pub fn settings(&self) -> DoorSettings {
        DoorSettings {
            retry_policy: self.retry_policy(),
            mover_timeout: self
                .mover_timeout_ms
                .map_or(DEFAULT_MOVER_TIMEOUT, Duration::from_millis),
            kill_timeout: self
                .kill_timeout_ms
                .map_or(DEFAULT_KILL_TIMEOUT, Duration::from_millis),
            io_queue: self.io_queue.clone(),
            overwrite_allowed: self.overwrite_allowed.unwrap_or(false),
            create_parents: self.create_parents.unwrap_or(false),
        }
    }
}

fn validate_timeout_ms(key: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=MAX_TIMEOUT_MS).contains(&value) {
        bail!("Invalid config value for `{key}`: {value}. Expected range: 1..={MAX_TIMEOUT_MS}");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path, if any.
    pub path: Option<PathBuf>,
    pub config: DoorConfig,
    pub loaded_from_file: bool,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/transfer-door/config.toml`
/// 2. `$HOME/.config/transfer-door/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("transfer-door")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("transfer-door")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads `explicit`, or the default config file if it exists.
///
/// A missing default file yields the built-in defaults; a missing explicit
/// file is an error.
///
/// # Errors
///
/// Fails if the file cannot be read or is invalid.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: load_config_file(path)?,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    match path.as_deref().filter(|path| path.exists()) {
        Some(existing) => Ok(LoadedConfig {
            config: load_config_file(existing)?,
            path,
            loaded_from_file: true,
        }),
        None => Ok(LoadedConfig {
            path,
            config: DoorConfig::default(),
            loaded_from_file: false,
        }),
    }
}

/// Reads and parses one config file.
///
/// # Errors
///
/// Fails if the file cannot be read or is invalid.
pub fn load_config_file(path: &Path) -> Result<DoorConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Parses config file contents.
///
/// # Errors
///
/// Fails on syntax errors, unknown keys and invalid values, naming the line.
pub fn parse_config_str(raw: &str) -> Result<DoorConfig> {
    let mut cfg = DoorConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "door_name" => cfg.door_name = Some(parse_string_literal(value).with_context(invalid)?),
            "domain_name" => {
                cfg.domain_name = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "io_queue" => cfg.io_queue = Some(parse_string_literal(value).with_context(invalid)?),
            "pool_manager_timeout_ms" => {
                cfg.pool_manager_timeout_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "pool_timeout_ms" => {
                cfg.pool_timeout_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "namespace_timeout_ms" => {
                cfg.namespace_timeout_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "mover_timeout_ms" => {
                cfg.mover_timeout_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "kill_timeout_ms" => {
                cfg.kill_timeout_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "retry_period_ms" => {
                cfg.retry_period_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "total_timeout_ms" => {
                cfg.total_timeout_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "mover_start_timeout_ms" => {
                cfg.mover_start_timeout_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "retry_count" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let count = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("retry_count out of range for u32"))
                    .with_context(invalid)?;
                cfg.retry_count = Some(count);
            }
            "overwrite_allowed" => {
                cfg.overwrite_allowed = Some(parse_boolean(value).with_context(invalid)?);
            }
            "create_parents" => {
                cfg.create_parents = Some(parse_boolean(value).with_context(invalid)?);
            }
            "retry_policy" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.retry_policy = Some(parse_retry_policy(&parsed).with_context(|| {
                    format!("Invalid `retry_policy` value '{parsed}' on line {line_no}")
                })?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_no}"),
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
    let Some(inner) = raw_value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        bail!("Expected double-quoted string");
    };
    Ok(inner.to_string())
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

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

fn parse_retry_policy(value: &str) -> Result<RetryPolicyKind> {
    match value {
        "never_fail" => Ok(RetryPolicyKind::NeverFail),
        "try_once" => Ok(RetryPolicyKind::TryOnce),
        "try_until_timeout" => Ok(RetryPolicyKind::TryUntilTimeout),
        "custom" => Ok(RetryPolicyKind::Custom),
        _ => bail!("Expected one of: never_fail, try_once, try_until_timeout, custom"),
    }
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

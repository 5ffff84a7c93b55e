//! Environment-driven configuration and the startup settings validator.
//!
//! The environment is captured once, after an optional `.env` file has been
//! loaded, into an [`Env`] snapshot. Each capability pulls its own settings
//! out of the snapshot through [`Env::require`], which runs
//! [`check_env_vars`] for that capability's required set. Any error here is
//! fatal: the binary logs it and exits before binding a socket.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use revoice_core::types::Device;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingSettings(Vec<&'static str>),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Check that every setting in `settings` is non-empty after trimming.
///
/// Logs one error line naming every missing setting, or an info line naming
/// the group when all are present.
pub fn check_env_vars(group: &str, settings: &[(&'static str, &str)]) -> Result<(), ConfigError> {
    let missing: Vec<&'static str> = settings
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

    if !missing.is_empty() {
        error!(
            "{group}: missing required environment variables: {}",
            missing.join(", ")
        );
        return Err(ConfigError::MissingSettings(missing));
    }

    info!("{group}: all required environment variables are set");
    Ok(())
}

/// Snapshot of the process environment.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: HashMap<String, String>,
}

impl Env {
    /// Load `.env` from the working directory if present, then snapshot.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => info!("loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("ignoring unreadable .env file: {e}"),
        }
        Self::from_process()
    }

    pub fn from_process() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Raw value, empty when unset.
    pub fn get(&self, key: &str) -> &str {
        self.vars.get(key).map_or("", String::as_str)
    }

    /// Trimmed value, `None` when unset or blank.
    pub fn optional(&self, key: &str) -> Option<&str> {
        Some(self.get(key).trim()).filter(|v| !v.is_empty())
    }

    /// Validate and return a group of required settings, trimmed, in order.
    pub fn require<const N: usize>(
        &self,
        group: &str,
        keys: [&'static str; N],
    ) -> Result<[String; N], ConfigError> {
        let settings: Vec<(&'static str, &str)> = keys.iter().map(|&k| (k, self.get(k))).collect();
        check_env_vars(group, &settings)?;
        Ok(keys.map(|k| self.get(k).trim().to_string()))
    }

    /// `true`/`1`/`yes` (any case) are true, anything else false; unset is `None`.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.optional(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
    }

    pub fn parse_optional<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key)
            .map(|v| {
                v.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    value: v.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

// ─── Server ────────────────────────────────────────────────────────────────

/// HTTP bind address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn from_env(env: &Env) -> Result<Self, ConfigError> {
        let [host, port] = env.require("server", ["HOST", "PORT"])?;
        let port = port.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
            key: "PORT",
            value: port.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { host, port })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ─── Engine ────────────────────────────────────────────────────────────────

const DEFAULT_READY_TIMEOUT_SECS: u64 = 60;

/// Settings shared by every model handle.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Base for relative model paths and the staging directories.
    pub project_root: PathBuf,
    pub device: Device,
    /// Concurrent inference calls allowed per model handle.
    pub concurrency: usize,
    /// Per-request bound on synthesis and conversion calls; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// How long startup waits for the runtime to answer `/health`.
    pub ready_timeout: Duration,
}

impl EngineSettings {
    pub fn from_env(env: &Env) -> Result<Self, ConfigError> {
        let project_root = match env.optional("PROJECT_ROOT") {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir().map_err(|e| ConfigError::Invalid {
                key: "PROJECT_ROOT",
                value: String::new(),
                reason: format!("cannot determine working directory: {e}"),
            })?,
        };

        let device = select_device(env.optional("DEVICE").unwrap_or("auto"))?;
        info!("compute device: {device}");

        let concurrency = env.parse_optional::<usize>("INFERENCE_CONCURRENCY")?.unwrap_or(1);
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "INFERENCE_CONCURRENCY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            project_root,
            device,
            concurrency,
            request_timeout: env
                .parse_optional::<u64>("INFERENCE_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            ready_timeout: Duration::from_secs(
                env.parse_optional::<u64>("RUNTIME_READY_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_READY_TIMEOUT_SECS),
            ),
        })
    }

    /// Resolve a configured path against the project root. Absolute paths
    /// pass through unchanged.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.project_root.join(path)
    }
}

/// Pick the compute device: `cuda`, `cpu`, or `auto` (accelerator if one is
/// visible, else CPU).
pub fn select_device(preference: &str) -> Result<Device, ConfigError> {
    match preference.trim().to_ascii_lowercase().as_str() {
        "auto" | "" => Ok(if accelerator_present() {
            Device::Cuda
        } else {
            Device::Cpu
        }),
        "cuda" | "gpu" => Ok(Device::Cuda),
        "cpu" => Ok(Device::Cpu),
        other => Err(ConfigError::Invalid {
            key: "DEVICE",
            value: other.to_string(),
            reason: "expected auto, cuda or cpu".into(),
        }),
    }
}

fn accelerator_present() -> bool {
    ["/dev/nvidiactl", "/dev/nvidia0"]
        .iter()
        .any(|p| Path::new(p).exists())
}

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::upload::STORAGE_DIR;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_MEDIA_ROOT: &str = ".";
pub const DEFAULT_CLIPSHELF_PORT: u16 = 3000;
pub const DEFAULT_CLIPSHELF_HOST: &str = "127.0.0.1";
pub const DEFAULT_FFPROBE_BIN: &str = "ffprobe";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";

/// Staging area for multipart bodies, relative to the media root.
pub const STAGING_DIR: &str = ".incoming";
/// Catalog document, relative to the media root.
pub const CATALOG_FILE: &str = "suggest_video.json";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub media_root: PathBuf,
    pub clipshelf_port: u16,
    pub clipshelf_host: String,
    pub ffprobe_bin: PathBuf,
    pub ytdlp_bin: PathBuf,
}

impl RuntimeConfig {
    pub fn storage_root(&self) -> PathBuf {
        self.media_root.join(STORAGE_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.media_root.join(STAGING_DIR)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.media_root.join(CATALOG_FILE)
    }
}

/// Values supplied on the command line; they win over the environment and
/// the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub media_root: Option<PathBuf>,
    pub clipshelf_port: Option<u16>,
    pub clipshelf_host: Option<String>,
    pub ffprobe_bin: Option<PathBuf>,
    pub ytdlp_bin: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    resolve_runtime_config_with(overrides, env_var_string)
}

fn resolve_runtime_config_with(
    overrides: RuntimeOverrides,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_config_with_overrides(
        &file_vars,
        env_lookup,
        overrides,
    ))
}

#[cfg(test)]
fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeConfig {
    build_runtime_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeConfig {
    let path_setting = |value: Option<PathBuf>, key: &str, default: &str| {
        value
            .filter(|path| !path.as_os_str().is_empty())
            .or_else(|| lookup_value(key, file_vars, &env_lookup).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(default))
    };

    let media_root = path_setting(overrides.media_root, "MEDIA_ROOT", DEFAULT_MEDIA_ROOT);
    let ffprobe_bin = path_setting(overrides.ffprobe_bin, "FFPROBE_BIN", DEFAULT_FFPROBE_BIN);
    let ytdlp_bin = path_setting(overrides.ytdlp_bin, "YTDLP_BIN", DEFAULT_YTDLP_BIN);
    let clipshelf_port = overrides
        .clipshelf_port
        .or_else(|| {
            lookup_value("CLIPSHELF_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_CLIPSHELF_PORT);
    let clipshelf_host = overrides
        .clipshelf_host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("CLIPSHELF_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CLIPSHELF_HOST.to_string());

    RuntimeConfig {
        media_root,
        clipshelf_port,
        clipshelf_host,
        ffprobe_bin,
        ytdlp_bin,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    })
}

/// Parses a `KEY=value` file. Comments, blank lines, `export ` prefixes and
/// surrounding quotes are handled; a missing file is an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

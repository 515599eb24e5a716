//! Configuration loading for nativebind.toml files
//!
//! A configuration reasonable for everyday use is compiled into the crate. It
//! can be overridden by a `nativebind.toml` in the user's home directory and
//! then by one in the current working directory; each file only needs the keys
//! it changes. The `NATIVEBIND_LIBRARY` environment variable overrides
//! `library` last.

use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "nativebind.toml";
pub const LIBRARY_ENV_VAR: &str = "NATIVEBIND_LIBRARY";
pub const DEFAULT_CONFIG: &str = include_str!("nativebind.toml");

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value {value:?} for '{key}', expected one of: {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Which strategy produces bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryMode {
    /// Compile the declarations on first use.
    Inline,
    /// Load the artifact built ahead of time, compiling inline if it is absent.
    Precompiled,
}

impl LibraryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LibraryMode::Inline => "inline",
            LibraryMode::Precompiled => "precompiled",
        }
    }
}

impl fmt::Display for LibraryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LibraryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(LibraryMode::Inline),
            "precompiled" => Ok(LibraryMode::Precompiled),
            _ => Err(ConfigError::InvalidValue {
                key: "library".to_string(),
                value: s.to_string(),
                expected: "inline, precompiled".to_string(),
            }),
        }
    }
}

/// Effective configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub library: LibraryMode,
    pub log_level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tempdir: Option<PathBuf>,
    pub search_path: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<String>,
}

/// One file's worth of settings; absent keys leave earlier values alone.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigLayer {
    library: Option<LibraryMode>,
    log_level: Option<LogLevel>,
    tempdir: Option<PathBuf>,
    search_path: Option<Vec<PathBuf>>,
    compiler: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    nativebind: ConfigLayer,
}

#[derive(Serialize)]
struct ConfigFileRef<'a> {
    nativebind: &'a Config,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            library: LibraryMode::Precompiled,
            log_level: LogLevel::Warn,
            tempdir: None,
            search_path: Vec::new(),
            compiler: None,
        }
    }
}

impl Config {
    /// Load the built-in defaults, the standard files and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::default_paths())?;
        config.apply_env()?;
        Ok(config)
    }

    /// The files read by [`Config::load`], lowest precedence first.
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = home_dir() {
            paths.push(home.join(CONFIG_FILE_NAME));
        }
        paths.push(PathBuf::from(CONFIG_FILE_NAME));
        paths
    }

    /// Layer `paths` over the built-in defaults. Missing files are skipped.
    pub fn load_from(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.merge_toml(DEFAULT_CONFIG, "built-in defaults")?;

        for path in paths {
            if !path.is_file() {
                continue;
            }
            config.merge_file(path)?;
        }

        Ok(config)
    }

    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "reading configuration");
        self.merge_toml(&content, &path.display().to_string())
    }

    /// Apply the keys present in `content` on top of this configuration.
    pub fn merge_toml(&mut self, content: &str, origin: &str) -> Result<(), ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        let layer = file.nativebind;

        if let Some(library) = layer.library {
            self.library = library;
        }
        if let Some(level) = layer.log_level {
            self.log_level = level;
        }
        if layer.tempdir.is_some() {
            self.tempdir = layer.tempdir;
        }
        if let Some(search_path) = layer.search_path {
            self.search_path = search_path;
        }
        if layer.compiler.is_some() {
            self.compiler = layer.compiler;
        }
        Ok(())
    }

    /// Honour `NATIVEBIND_LIBRARY` when it is set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        match std::env::var(LIBRARY_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => self.override_library(&value),
            _ => Ok(()),
        }
    }

    pub fn override_library(&mut self, value: &str) -> Result<(), ConfigError> {
        self.library = value.parse()?;
        Ok(())
    }

    pub fn precompiled(&self) -> bool {
        self.library == LibraryMode::Precompiled
    }

    /// Render as a `nativebind.toml` document.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(&ConfigFileRef { nativebind: self })?)
    }
}

fn home_dir() -> Option<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_builtin_defaults_match_default_impl() {
        let config = Config::load_from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.precompiled());
    }

    #[test]
    fn test_later_files_override_earlier_keys() {
        let dir = TempDir::new().unwrap();
        let home = write_config(
            &dir,
            "home.toml",
            "[nativebind]\nlibrary = \"inline\"\nlog_level = \"debug\"\n",
        );
        let local = write_config(&dir, "local.toml", "[nativebind]\nlog_level = \"error\"\n");
        let missing = dir.path().join("missing.toml");

        let config = Config::load_from(&[home, missing, local]).unwrap();
        assert_eq!(config.library, LibraryMode::Inline);
        assert_eq!(config.log_level, LogLevel::Error);
    }

    #[test]
    fn test_invalid_library_value() {
        let mut config = Config::default();
        let err = config
            .merge_toml("[nativebind]\nlibrary = \"sometimes\"\n", "test")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = config.override_library("sometimes").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "library"));
        assert_eq!(config.library, LibraryMode::Precompiled);
    }

    #[test]
    fn test_override_library() {
        let mut config = Config::default();
        config.override_library("INLINE").unwrap();
        assert_eq!(config.library, LibraryMode::Inline);
        assert!(!config.precompiled());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let mut config = Config::default();
        assert!(config.merge_toml("[nativebind]\nlibary = \"inline\"\n", "test").is_err());
    }

    #[test]
    fn test_render_round_trips() {
        let mut config = Config::default();
        config.compiler = Some("clang".to_string());
        config.search_path = vec![PathBuf::from("/opt/nativebind")];

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[nativebind]"));

        let mut reparsed = Config::default();
        reparsed.merge_toml(&rendered, "rendered").unwrap();
        assert_eq!(reparsed, config);
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

#[cfg(windows)]
pub fn config_dir() -> PathBuf {
    std::env::var("APPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("tainttrail")
}

#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".config")
        .join("tainttrail")
}

fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn default_max_passes() -> usize {
    8
}

fn default_custom1() -> String {
    "custom1".into()
}

fn default_custom2() -> String {
    "custom2".into()
}

#[derive(Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Fixpoint pass cap; contracts are monotone so this only bounds work.
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
    /// Display names for the plugin-defined taint categories.
    #[serde(default = "default_custom1")]
    pub custom1_name: String,
    #[serde(default = "default_custom2")]
    pub custom2_name: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_passes: default_max_passes(),
            custom1_name: default_custom1(),
            custom2_name: default_custom2(),
        }
    }
}

fn default_cache_file() -> PathBuf {
    config_dir().join("parse-cache.json")
}

#[derive(Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_file: default_cache_file(),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

pub fn load_config() -> Result<Config> {
    let path = config_file_path();
    if path.exists() {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).context("failed to parse config")
    } else {
        Ok(Config::default())
    }
}

impl Config {
    pub fn analyzer_config(&self) -> engine::AnalyzerConfig {
        engine::AnalyzerConfig {
            custom1_name: self.analysis.custom1_name.clone(),
            custom2_name: self.analysis.custom2_name.clone(),
            max_passes: self.analysis.max_passes,
            false_positive_hook: None,
        }
    }
}

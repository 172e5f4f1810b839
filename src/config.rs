use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::tile::QualityWeights;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub quality: QualityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Canonical PB file store and its archive sibling.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Flat directory of current `.pb` files, keyed by file name.
    pub root: PathBuf,
    /// Archive directory; superseded files land in timestamped subfolders.
    #[serde(default)]
    pub archive: Option<PathBuf>,
}

impl StoreConfig {
    /// Archive directory, defaulting to a sibling of the store root.
    pub fn archive_dir(&self) -> PathBuf {
        match &self.archive {
            Some(p) => p.clone(),
            None => {
                let name = self
                    .root
                    .file_name()
                    .map(|n| format!("{}_archive", n.to_string_lossy()))
                    .unwrap_or_else(|| "pb_files_archive".to_string());
                self.root.with_file_name(name)
            }
        }
    }
}

/// Quality-score exponent overrides; defaults match [`QualityWeights`].
#[derive(Debug, Deserialize, Clone, Default)]
pub struct QualityConfig {
    pub vote_length_exp: Option<f64>,
    pub projects_exp: Option<f64>,
    pub votes_exp: Option<f64>,
}

impl Config {
    pub fn quality_weights(&self) -> QualityWeights {
        let defaults = QualityWeights::default();
        QualityWeights {
            vote_length_exp: self
                .quality
                .vote_length_exp
                .unwrap_or(defaults.vote_length_exp),
            projects_exp: self.quality.projects_exp.unwrap_or(defaults.projects_exp),
            votes_exp: self.quality.votes_exp.unwrap_or(defaults.votes_exp),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.store.root.as_os_str().is_empty() {
        anyhow::bail!("store.root must not be empty");
    }

    let weights = config.quality_weights();
    for (name, v) in [
        ("quality.vote_length_exp", weights.vote_length_exp),
        ("quality.projects_exp", weights.projects_exp),
        ("quality.votes_exp", weights.votes_exp),
    ] {
        if !v.is_finite() {
            anyhow::bail!("{} must be finite", name);
        }
    }

    Ok(config)
}

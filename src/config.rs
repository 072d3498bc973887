use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::MergeError;
use crate::models::Policy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// One sub-folder per contributor.
    pub input_root: PathBuf,
    pub staging_root: PathBuf,
    #[serde(default)]
    pub archive_root: Option<PathBuf>,
    /// SQLite audit ledger.
    pub ledger: PathBuf,
}

impl PathsConfig {
    pub fn archive_root(&self) -> PathBuf {
        self.archive_root
            .clone()
            .unwrap_or_else(|| self.staging_root.join("archive"))
    }

    /// Lock file guarding apply-mode runs, kept next to the ledger.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .ledger
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger".into());
        name.push(".lock");
        self.ledger.with_file_name(name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MergeConfig {
    #[serde(default)]
    pub policy: Policy,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub ensure_contributors: Vec<String>,
    /// `PATH` or `KEY=PATH`.
    #[serde(default)]
    pub force_winners: Vec<String>,
    #[serde(default = "default_lock")]
    pub lock: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            include_globs: default_include_globs(),
            ensure_contributors: Vec::new(),
            force_winners: Vec::new(),
            lock: true,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["*.lorprev".to_string()]
}

fn default_lock() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReportsConfig {
    /// JSON run summary written at the end of every run.
    #[serde(default)]
    pub json: Option<PathBuf>,
    /// Additional report files (written by external tooling) that must not
    /// be locked when a run starts.
    #[serde(default)]
    pub probe: Vec<PathBuf>,
}

impl ReportsConfig {
    /// Every report path checked by the pre-flight probe.
    pub fn targets(&self) -> Vec<PathBuf> {
        self.json.iter().chain(self.probe.iter()).cloned().collect()
    }
}

/// A `--force-winner` entry after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForceWinner {
    /// Restricts the override to one identity key.
    pub key: Option<String>,
    pub path: PathBuf,
}

impl ForceWinner {
    pub fn parse(spec: &str) -> Result<Self, MergeError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(MergeError::Config("empty force-winner entry".to_string()));
        }
        // Keys always carry a `ID:` or `NAME:` prefix, so a bare Windows
        // drive path like `C:\x` is not mistaken for one.
        if let Some((key, path)) = spec.split_once('=') {
            let key = key.trim();
            if key.starts_with("ID:") || key.starts_with("NAME:") {
                return Ok(Self {
                    key: Some(key.to_string()),
                    path: resolve(Path::new(path.trim())),
                });
            }
        }
        Ok(Self {
            key: None,
            path: resolve(Path::new(spec)),
        })
    }

    pub fn matches(&self, key: &str, path: &Path) -> bool {
        if let Some(k) = &self.key {
            if k != key {
                return false;
            }
        }
        resolve(path) == self.path
    }
}

/// Canonical form when the file exists, otherwise the path as given.
pub fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl Config {
    pub fn force_winners(&self) -> Result<Vec<ForceWinner>> {
        self.merge
            .force_winners
            .iter()
            .map(|s| ForceWinner::parse(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let paths = &config.paths;
    if paths.input_root.as_os_str().is_empty() {
        bail!("paths.input_root must be set");
    }
    if paths.staging_root.as_os_str().is_empty() {
        bail!("paths.staging_root must be set");
    }
    if paths.input_root == paths.staging_root {
        bail!("paths.input_root and paths.staging_root must differ");
    }
    if paths.ledger.as_os_str().is_empty() {
        bail!("paths.ledger must be set");
    }

    if config.merge.include_globs.is_empty() {
        bail!("merge.include_globs must contain at least one pattern");
    }
    for pattern in &config.merge.include_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid merge.include_globs pattern: '{}'", pattern))?;
    }

    for name in &config.merge.ensure_contributors {
        if name.trim().is_empty() || name.contains(['/', '\\']) {
            bail!(
                "merge.ensure_contributors entries must be plain folder names, got '{}'",
                name
            );
        }
    }

    config.force_winners()?;

    Ok(())
}

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::IngestOptions;
use crate::pipeline::PipelineSettings;

const CONFIG_FILE: &str = "config.json";
const MODELS_DIR: &str = "rvc_models";
const CATALOG_FILE: &str = "public_models.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Root of the model store. Defaults to `<data dir>/rvc_models`.
    pub models_dir: Option<PathBuf>,
    /// Public model index. Defaults to `<models dir>/public_models.json`.
    pub catalog_file: Option<PathBuf>,
    #[serde(flatten)]
    pub ingest: IngestOptions,
    pub fetch_timeout_secs: Option<u64>,
    /// Where downloaded archives are kept until extracted. Defaults to the
    /// system temp directory.
    pub download_dir: Option<PathBuf>,
    pub pipeline: PipelineSettings,
}

impl Settings {
    pub fn models_dir(&self) -> Result<PathBuf> {
        match &self.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().join(MODELS_DIR)),
        }
    }

    pub fn catalog_file(&self) -> Result<PathBuf> {
        match &self.catalog_file {
            Some(file) => Ok(file.clone()),
            None => Ok(self.models_dir()?.join(CATALOG_FILE)),
        }
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

pub struct SettingsManager {
    path: PathBuf,
    inner: RwLock<Settings>,
}

impl SettingsManager {
    /// Loads `config.json` from the platform config directory.
    pub fn new() -> Result<Self> {
        Self::open(resolve_config_path()?)
    }

    /// Loads settings from `path`; a missing file yields defaults.
    pub fn open(path: PathBuf) -> Result<Self> {
        let settings = load_settings(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(settings),
        })
    }

    pub fn read(&self) -> Settings {
        self.inner.read().clone()
    }

    pub fn write(&self, settings: Settings) -> Result<()> {
        let mut guard = self.inner.write();
        persist_settings(self.path.as_path(), &settings)?;
        *guard = settings;
        Ok(())
    }

    /// Applies `update` in memory only, for per-invocation overrides.
    pub fn override_with<F>(&self, update: F)
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = self.inner.write();
        update(&mut *guard);
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "AICoverGen", "AICoverGen").context("missing project directories")
}

fn resolve_config_path() -> Result<PathBuf> {
    let project_dirs = project_dirs()?;
    let dir = project_dirs.config_dir();
    fs::create_dir_all(dir).context("creating config directory failed")?;
    Ok(dir.join(CONFIG_FILE))
}

fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let bytes = fs::read(path).with_context(|| format!("failed reading {path:?}"))?;
    serde_json::from_slice(&bytes).context("config json could not be parsed")
}

fn persist_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {parent:?}"))?;
    }
    let serialized =
        serde_json::to_vec_pretty(settings).context("serialize settings to json failed")?;
    fs::write(path, serialized).with_context(|| format!("write settings to {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DuplicatePolicy, Thresholds};

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::open(dir.path().join("config.json")).unwrap();
        let settings = manager.read();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.ingest.thresholds, Thresholds::default());
        assert_eq!(settings.fetch_timeout(), None);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"modelsDir": "/srv/models", "duplicatePolicy": "reject", "indexMinBytes": 1}"#,
        )
        .unwrap();

        let settings = SettingsManager::open(path).unwrap().read();

        assert_eq!(settings.models_dir().unwrap(), PathBuf::from("/srv/models"));
        assert_eq!(
            settings.catalog_file().unwrap(),
            PathBuf::from("/srv/models/public_models.json")
        );
        assert_eq!(settings.ingest.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(settings.ingest.thresholds.index_min_bytes, 1);
        assert_eq!(
            settings.ingest.thresholds.weights_min_bytes,
            Thresholds::default().weights_min_bytes
        );
    }

    #[test]
    fn write_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let manager = SettingsManager::open(path.clone()).unwrap();
        let mut settings = manager.read();
        settings.fetch_timeout_secs = Some(120);
        settings.ingest.keep_failed_staging = true;
        manager.write(settings.clone()).unwrap();

        assert_eq!(SettingsManager::open(path).unwrap().read(), settings);
    }

    #[test]
    fn overrides_stay_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let manager = SettingsManager::open(path.clone()).unwrap();
        manager.override_with(|settings| settings.models_dir = Some("/tmp/models".into()));

        assert_eq!(manager.read().models_dir, Some(PathBuf::from("/tmp/models")));
        assert!(!path.exists());
    }

    #[test]
    fn broken_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, b"{").unwrap();
        assert!(SettingsManager::open(path).is_err());
    }
}

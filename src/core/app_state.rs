use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;

use crate::catalog::{ModelDescriptor, PublicCatalog};
use crate::core::events::ProgressReporter;
use crate::models::{
    CancelToken, Fetcher, HttpFetcher, IngestError, Ingestor, ModelEntry, ModelStore,
    PackageSource,
};
use crate::pipeline::{ConversionPipeline, CoverRequest};

use super::settings::SettingsManager;

/// Everything a front end needs: settings, the model store with its ingestor,
/// and snapshots of the installed models and the public catalog that are only
/// updated by explicit refreshes.
pub struct AppState<F = HttpFetcher> {
    settings: Arc<SettingsManager>,
    ingestor: Arc<Ingestor<F>>,
    installed: RwLock<Vec<String>>,
    catalog: RwLock<Option<PublicCatalog>>,
}

impl AppState<HttpFetcher> {
    pub fn new(settings: SettingsManager) -> Result<Self> {
        let fetcher = HttpFetcher::new(settings.read().fetch_timeout())
            .context("create http client")?;
        Self::with_fetcher(settings, fetcher)
    }
}

impl<F: Fetcher> AppState<F> {
    pub fn with_fetcher(settings: SettingsManager, fetcher: F) -> Result<Self> {
        let current = settings.read();
        let store = Arc::new(ModelStore::open(current.models_dir()?)?);
        let ingestor = Arc::new(
            Ingestor::new(store, fetcher, current.ingest.clone())
                .with_download_dir(current.download_dir.clone()),
        );
        let state = Self {
            settings: Arc::new(settings),
            ingestor,
            installed: RwLock::new(Vec::new()),
            catalog: RwLock::new(None),
        };
        state.refresh_models()?;
        Ok(state)
    }

    pub fn settings_manager(&self) -> Arc<SettingsManager> {
        self.settings.clone()
    }

    pub fn ingestor(&self) -> Arc<Ingestor<F>> {
        self.ingestor.clone()
    }

    pub fn store(&self) -> &ModelStore {
        self.ingestor.store()
    }

    /// Re-reads the model directory.
    pub fn refresh_models(&self) -> Result<Vec<String>> {
        let names = self.store().list()?;
        *self.installed.write() = names.clone();
        Ok(names)
    }

    pub fn installed_models(&self) -> Vec<String> {
        self.installed.read().clone()
    }

    /// Loads (or reloads) the public model index from the configured file.
    pub fn load_catalog(&self) -> Result<usize> {
        let path = self.settings.read().catalog_file()?;
        let catalog = PublicCatalog::load(&path)?;
        let count = catalog.voice_models.len();
        *self.catalog.write() = Some(catalog);
        Ok(count)
    }

    fn with_catalog<R>(&self, read: impl FnOnce(&PublicCatalog) -> R) -> Result<R> {
        let guard = self.catalog.read();
        let catalog = guard
            .as_ref()
            .ok_or_else(|| anyhow!("public model index has not been loaded"))?;
        Ok(read(catalog))
    }

    pub fn catalog_tags(&self) -> Result<Vec<String>> {
        self.with_catalog(|catalog| catalog.tags().into_iter().map(str::to_string).collect())
    }

    pub fn filter_catalog(&self, tags: &[String], query: &str) -> Result<Vec<ModelDescriptor>> {
        self.with_catalog(|catalog| catalog.filter(tags, query).into_iter().cloned().collect())
    }

    /// Catalog entries whose name is not among the installed models.
    pub fn available_public_models(&self) -> Result<Vec<ModelDescriptor>> {
        let installed = self.installed_models();
        self.with_catalog(|catalog| catalog.available(&installed).into_iter().cloned().collect())
    }

    pub fn install(
        &self,
        source: &PackageSource,
        name: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<ModelEntry, IngestError> {
        let entry = self.ingestor.ingest(source, name, progress, cancel)?;
        if let Err(error) = self.refresh_models() {
            tracing::warn!("Failed to refresh installed models: {error:?}");
        }
        Ok(entry)
    }

    /// Installs a catalog model, under its catalog name unless `rename` is set.
    pub fn install_from_catalog(
        &self,
        catalog_name: &str,
        rename: Option<&str>,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<ModelEntry> {
        let descriptor = self
            .with_catalog(|catalog| catalog.find(catalog_name).cloned())?
            .ok_or_else(|| anyhow!("`{catalog_name}` is not in the public model index"))?;
        let name = rename.unwrap_or(&descriptor.name);
        let entry = self.install(&PackageSource::Url(descriptor.url.clone()), name, progress, cancel)?;
        Ok(entry)
    }

    pub fn generate_cover(
        &self,
        request: &CoverRequest,
        pipeline: &dyn ConversionPipeline,
    ) -> Result<PathBuf> {
        request.validate()?;
        let entry = self
            .store()
            .entry(&request.model)?
            .ok_or_else(|| anyhow!("voice model `{}` is not installed", request.model))?;
        pipeline.generate(request, &entry)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::core::events::NoProgress;
    use crate::models::fixtures::{zip_bytes, RecordingFetcher, ZipItem};
    use crate::pipeline::CoverParams;

    const CATALOG: &str = r#"{
        "tags": {"Female": "", "English": ""},
        "voice_models": [
            {"name": "Gura", "description": "vtuber", "credit": "x", "url": "https://pixeldrain.com/u/abc", "tags": ["Female", "English"]},
            {"name": "Lisa", "description": "singer", "credit": "y", "url": "https://example.com/Lisa.zip", "tags": ["Female"]}
        ]
    }"#;

    fn state(dir: &Path, fetcher: RecordingFetcher) -> AppState<RecordingFetcher> {
        let settings = SettingsManager::open(dir.join("config.json")).unwrap();
        settings.override_with(|settings| {
            settings.models_dir = Some(dir.join("rvc_models"));
            settings.ingest.thresholds.weights_min_bytes = 16;
        });
        AppState::with_fetcher(settings, fetcher).unwrap()
    }

    fn package() -> Vec<u8> {
        zip_bytes(&[ZipItem::file("model/voice.pth", vec![1u8; 64])])
    }

    #[test]
    fn install_refreshes_installed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), RecordingFetcher::serving(package()));
        assert!(state.installed_models().is_empty());

        state
            .install(
                &PackageSource::Url("https://example.com/Lisa.zip".into()),
                "Lisa",
                &NoProgress,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(state.installed_models(), vec!["Lisa"]);
    }

    #[test]
    fn catalog_requires_explicit_load() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), RecordingFetcher::failing());
        assert!(state.filter_catalog(&[], "").is_err());

        fs::write(dir.path().join("rvc_models/public_models.json"), CATALOG).unwrap();
        assert_eq!(state.load_catalog().unwrap(), 2);
        assert_eq!(state.catalog_tags().unwrap(), vec!["English", "Female"]);
        assert_eq!(state.filter_catalog(&["English".into()], "").unwrap().len(), 1);
    }

    #[test]
    fn catalog_install_uses_descriptor_url_and_hides_entry() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), RecordingFetcher::serving(package()));
        fs::write(dir.path().join("rvc_models/public_models.json"), CATALOG).unwrap();
        state.load_catalog().unwrap();

        let entry = state
            .install_from_catalog("Gura", None, &NoProgress, &CancelToken::new())
            .unwrap();

        assert_eq!(entry.name, "Gura");
        assert_eq!(
            state.ingestor().fetcher().requests(),
            vec!["https://pixeldrain.com/api/file/abc".to_string()]
        );
        let available: Vec<_> = state
            .available_public_models()
            .unwrap()
            .into_iter()
            .map(|model| model.name)
            .collect();
        assert_eq!(available, vec!["Lisa"]);
    }

    #[test]
    fn unknown_catalog_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), RecordingFetcher::failing());
        fs::write(dir.path().join("rvc_models/public_models.json"), CATALOG).unwrap();
        state.load_catalog().unwrap();

        assert!(state
            .install_from_catalog("Nobody", None, &NoProgress, &CancelToken::new())
            .is_err());
    }

    struct EchoPipeline;

    impl ConversionPipeline for EchoPipeline {
        fn generate(&self, request: &CoverRequest, model: &ModelEntry) -> Result<PathBuf> {
            Ok(PathBuf::from(format!("{}-{}.mp3", request.song, model.name)))
        }
    }

    #[test]
    fn cover_needs_installed_model() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), RecordingFetcher::serving(package()));
        let request = CoverRequest {
            song: "song".into(),
            model: "Lisa".into(),
            params: CoverParams::default(),
        };
        assert!(state.generate_cover(&request, &EchoPipeline).is_err());

        state
            .install(
                &PackageSource::Url("https://example.com/Lisa.zip".into()),
                "Lisa",
                &NoProgress,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(
            state.generate_cover(&request, &EchoPipeline).unwrap(),
            PathBuf::from("song-Lisa.mp3")
        );
    }
}

//! The public voice model index shipped as `public_models.json`.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub credit: String,
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ModelDescriptor {
    /// Name, description, credit and tags joined and lowercased, the text a
    /// search query is matched against.
    fn haystack(&self) -> String {
        format!(
            "{} {} {} {}",
            self.name,
            self.description,
            self.credit,
            self.tags.join(" ")
        )
        .to_lowercase()
    }

    #[must_use]
    pub fn matches(&self, tags: &[String], query: &str) -> bool {
        let tagged = tags.iter().all(|tag| self.tags.contains(tag));
        tagged && (query.is_empty() || self.haystack().contains(&query.to_lowercase()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicCatalog {
    /// Tag name to a human readable description.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub voice_models: Vec<ModelDescriptor>,
}

impl PublicCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("read public model index {}", path.display()))?;
        let catalog: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse public model index {}", path.display()))?;
        tracing::debug!(
            models = catalog.voice_models.len(),
            tags = catalog.tags.len(),
            "loaded public model index"
        );
        Ok(catalog)
    }

    pub fn tags(&self) -> Vec<&str> {
        self.tags.keys().map(String::as_str).collect()
    }

    /// Descriptors carrying every tag in `tags` whose text contains `query`
    /// (case-insensitive), in catalog order. Empty filters select everything.
    pub fn filter(&self, tags: &[String], query: &str) -> Vec<&ModelDescriptor> {
        filter_models(&self.voice_models, tags, query)
    }

    /// Descriptors not yet installed under their catalog name.
    pub fn available<S: AsRef<str>>(&self, installed: &[S]) -> Vec<&ModelDescriptor> {
        self.voice_models
            .iter()
            .filter(|model| !installed.iter().any(|name| name.as_ref() == model.name))
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&ModelDescriptor> {
        self.voice_models.iter().find(|model| model.name == name)
    }
}

pub fn filter_models<'a, I>(models: I, tags: &[String], query: &str) -> Vec<&'a ModelDescriptor>
where
    I: IntoIterator<Item = &'a ModelDescriptor>,
{
    models
        .into_iter()
        .filter(|model| model.matches(tags, query))
        .collect()
}

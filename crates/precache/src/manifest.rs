//! # Pre-cache Manifest
//!
//! The ordered list of resources a generation must hold before the application
//! can run offline, resolved to absolute URLs against the application origin.

use url::Url;

use crate::cache::RequestKey;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<Url>,
    fallback_document: Url,
}

impl Manifest {
    /// Resolve manifest paths against `origin`. Duplicate entries keep their first position.
    pub fn resolve(
        origin: &Url,
        paths: &[String],
        fallback_document: &str,
    ) -> Result<Self, ConfigError> {
        let join = |path: &str| {
            origin
                .join(path)
                .map_err(|e| ConfigError::InvalidManifestEntry {
                    path: path.to_owned(),
                    reason: e.to_string(),
                })
        };

        let mut entries: Vec<Url> = Vec::with_capacity(paths.len());
        for path in paths {
            let mut url = join(path)?;
            url.set_fragment(None);
            if !entries.contains(&url) {
                entries.push(url);
            }
        }

        let mut fallback_document = join(fallback_document)?;
        fallback_document.set_fragment(None);

        Ok(Self {
            entries,
            fallback_document,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache keys of every manifest entry, in manifest order
    pub fn keys(&self) -> Vec<RequestKey> {
        self.entries.iter().map(RequestKey::get).collect()
    }

    /// Absolute URL of the offline substitute for document navigations
    pub fn fallback_document(&self) -> &Url {
        &self.fallback_document
    }
}

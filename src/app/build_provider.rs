use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    DeviceImage,
    Archive,
    Other,
}

impl ArtifactKind {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("img") => ArtifactKind::DeviceImage,
            Some("zip") | Some("tar") | Some("gz") => ArtifactKind::Archive,
            _ => ArtifactKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

/// Build artifacts already present in a local directory.
#[derive(Debug, Clone)]
pub struct LocalBuildProvider {
    root: PathBuf,
    artifacts: BTreeMap<String, Artifact>,
}

impl LocalBuildProvider {
    pub fn fetch(root: &Path, trace_id: &str) -> Result<Self, AppError> {
        if !root.is_dir() {
            return Err(AppError::validation(
                format!("build directory {} does not exist", root.display()),
                trace_id,
            ));
        }
        let entries = fs::read_dir(root).map_err(|err| {
            AppError::system(format!("Failed to read {}: {err}", root.display()), trace_id)
        })?;
        let mut artifacts = BTreeMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            artifacts.insert(
                name.to_string(),
                Artifact {
                    kind: ArtifactKind::from_path(&path),
                    path: path.clone(),
                },
            );
        }
        Ok(Self {
            root: root.to_path_buf(),
            artifacts,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts(&self) -> &BTreeMap<String, Artifact> {
        &self.artifacts
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    pub fn device_images(&self) -> impl Iterator<Item = (&String, &Artifact)> {
        self.artifacts
            .iter()
            .filter(|(_, artifact)| artifact.kind == ArtifactKind::DeviceImage)
    }
}

/// Named build providers visible to one command context.
#[derive(Debug, Default)]
pub struct BuildProviderSet {
    providers: BTreeMap<String, LocalBuildProvider>,
}

impl BuildProviderSet {
    pub fn insert(&mut self, name: &str, provider: LocalBuildProvider) -> Option<LocalBuildProvider> {
        self.providers.insert(name.to_string(), provider)
    }

    pub fn get(&self, name: &str) -> Option<&LocalBuildProvider> {
        self.providers.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LocalBuildProvider)> {
        self.providers.iter()
    }
}

pub fn check_provider_type(kind: &str, trace_id: &str) -> Result<(), AppError> {
    match kind {
        "local" => Ok(()),
        other => Err(AppError::validation(
            format!("unsupported build provider type '{other}' (supported: local)"),
            trace_id,
        )),
    }
}

//! The capability every folder-backed entity kind implements.
//!
//! An entity is split into two disjoint field sets: *derived* fields, which
//! are recomputed from the folder path on every scan, and *persisted* fields,
//! which only ever come from the sidecar file. A third, throwaway *mirror*
//! shape echoes some derived values into the sidecar so the file stays
//! readable on its own; it is written but never merged back.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ParseError;
use crate::id::{generate_id_from_str, DEFAULT_ID_LENGTH};

/// Tag selecting the entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    Project,
}

impl EntityKind {
    /// Discriminator mixed into every id of this kind.
    pub fn marker(self) -> &'static str {
        match self {
            EntityKind::Company => "folderbound.v1.Company",
            EntityKind::Project => "folderbound.v1.Project",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::Project => "project",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Id of the entity of `kind` living in a folder called `base_name`.
pub fn derive_entity_id(kind: EntityKind, base_name: &str) -> String {
    let mut text = String::with_capacity(kind.marker().len() + base_name.len());
    text.push_str(kind.marker());
    text.push_str(base_name);
    generate_id_from_str(&text, DEFAULT_ID_LENGTH)
}

/// Final path component as UTF-8.
pub fn base_name(folder: &Path) -> Result<&str, ParseError> {
    folder
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ParseError::InvalidFolderPath(folder.to_path_buf()))
}

pub trait FolderEntity: Clone + fmt::Debug + Serialize + Send + Sync + 'static {
    type Derived: Clone + PartialEq + fmt::Debug;
    type Persisted: Clone + Default + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync;
    type Mirror: Clone + Default + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync;
    /// Kind-specific parse settings.
    type Settings: Clone + fmt::Debug + Send + Sync;

    const KIND: EntityKind;

    /// Builds the entity from its folder. Persisted fields start empty.
    fn parse(folder: &Path, settings: &Self::Settings) -> Result<Self, ParseError>;

    fn id(&self) -> &str;

    fn folder(&self) -> &Path;

    fn derived_of(&self) -> &Self::Derived;

    fn persisted_of(&self) -> &Self::Persisted;

    fn persisted_mut(&mut self) -> &mut Self::Persisted;

    /// Derived values echoed into the sidecar.
    fn mirror(&self) -> Self::Mirror;

    /// Folder name implied by the derived fields.
    fn conventional_name(&self) -> Result<String, ParseError>;

    /// Recomputes derived values that also depend on persisted ones.
    fn refresh_derived(&mut self) {}

    /// Order in which snapshots publish entities.
    fn publish_order(&self, other: &Self) -> Ordering;

    fn folder_name(&self) -> &str {
        self.folder().file_name().and_then(|n| n.to_str()).unwrap_or_default()
    }

    /// Location of the sidecar for this entity.
    fn conventional_path(&self, sidecar_filename: &str) -> PathBuf {
        self.folder().join(sidecar_filename)
    }
}

//! Named field selections persisted as one JSON document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{FieldPath, Gvk};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteView {
    pub id: String,
    pub name: String,
    pub gvk: Gvk,
    pub fields: Vec<FieldPath>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FavoriteDocument {
    #[serde(default)]
    views: Vec<FavoriteView>,
}

#[derive(Debug, Error)]
pub enum FavoriteError {
    #[error("a view named `{name}` already exists for {gvk}")]
    DuplicateName { gvk: Gvk, name: String },

    #[error("no saved view with id {0}")]
    NotFound(String),

    #[error("view names cannot be empty")]
    InvalidName,

    #[error("failed to access favorites file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode favorites")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct FavoriteStore {
    path: PathBuf,
    document: RwLock<FavoriteDocument>,
}

impl FavoriteStore {
    /// A missing file is an empty store. A document that does not parse is
    /// moved aside to `<file>.corrupt-<timestamp>` and the store starts empty,
    /// even when the backup itself cannot be written.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, FavoriteError> {
        let path = path.into();
        let document = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => FavoriteDocument::default(),
            Ok(bytes) => match serde_json::from_slice::<FavoriteDocument>(&bytes) {
                Ok(document) => unique_views(document),
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "favorites file is corrupt; starting empty"
                    );
                    preserve_corrupt(&path);
                    FavoriteDocument::default()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => FavoriteDocument::default(),
            Err(source) => return Err(FavoriteError::Io { path, source }),
        };

        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current snapshot.
    pub fn save(&self) -> Result<(), FavoriteError> {
        let document = self.read();
        write_document(&self.path, &document)
    }

    pub fn create(
        &self,
        name: &str,
        gvk: &Gvk,
        fields: Vec<FieldPath>,
    ) -> Result<FavoriteView, FavoriteError> {
        let name = validate_name(name)?;
        let mut document = self.write();
        if document
            .views
            .iter()
            .any(|view| &view.gvk == gvk && view.name == name)
        {
            return Err(FavoriteError::DuplicateName {
                gvk: gvk.clone(),
                name,
            });
        }

        let now = Utc::now();
        let view = FavoriteView {
            id: Uuid::new_v4().to_string(),
            name,
            gvk: gvk.clone(),
            fields,
            created_at: now,
            updated_at: now,
        };
        document.views.push(view.clone());
        if let Err(err) = write_document(&self.path, &document) {
            document.views.pop();
            return Err(err);
        }

        debug!(id = %view.id, name = %view.name, gvk = %view.gvk, "favorite view saved");
        Ok(view)
    }

    pub fn rename(&self, id: &str, new_name: &str) -> Result<FavoriteView, FavoriteError> {
        let new_name = validate_name(new_name)?;
        let mut document = self.write();
        let index = position(&document, id)?;
        let gvk = document.views[index].gvk.clone();
        if document
            .views
            .iter()
            .any(|view| view.id != id && view.gvk == gvk && view.name == new_name)
        {
            return Err(FavoriteError::DuplicateName {
                gvk,
                name: new_name,
            });
        }

        let previous = document.views[index].clone();
        let view = &mut document.views[index];
        view.name = new_name;
        view.updated_at = Utc::now();
        let renamed = view.clone();
        if let Err(err) = write_document(&self.path, &document) {
            document.views[index] = previous;
            return Err(err);
        }

        debug!(id = %renamed.id, name = %renamed.name, "favorite view renamed");
        Ok(renamed)
    }

    pub fn delete(&self, id: &str) -> Result<FavoriteView, FavoriteError> {
        let mut document = self.write();
        let index = position(&document, id)?;
        let removed = document.views.remove(index);
        if let Err(err) = write_document(&self.path, &document) {
            document.views.insert(index, removed);
            return Err(err);
        }

        debug!(id = %removed.id, name = %removed.name, "favorite view deleted");
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<FavoriteView> {
        self.read().views.iter().find(|view| view.id == id).cloned()
    }

    pub fn find_by_name(&self, gvk: &Gvk, name: &str) -> Option<FavoriteView> {
        let name = name.trim();
        self.read()
            .views
            .iter()
            .find(|view| &view.gvk == gvk && view.name == name)
            .cloned()
    }

    pub fn list_all(&self) -> Vec<FavoriteView> {
        sorted(self.read().views.iter().cloned().collect())
    }

    pub fn list_by_gvk(&self, gvk: &Gvk) -> Vec<FavoriteView> {
        sorted(
            self.read()
                .views
                .iter()
                .filter(|view| &view.gvk == gvk)
                .cloned()
                .collect(),
        )
    }

    fn read(&self) -> RwLockReadGuard<'_, FavoriteDocument> {
        self.document.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FavoriteDocument> {
        self.document.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_name(name: &str) -> Result<String, FavoriteError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FavoriteError::InvalidName);
    }
    Ok(name.to_string())
}

fn position(document: &FavoriteDocument, id: &str) -> Result<usize, FavoriteError> {
    document
        .views
        .iter()
        .position(|view| view.id == id)
        .ok_or_else(|| FavoriteError::NotFound(id.to_string()))
}

fn sorted(mut views: Vec<FavoriteView>) -> Vec<FavoriteView> {
    views.sort_by(|left, right| {
        left.created_at
            .cmp(&right.created_at)
            .then_with(|| left.name.cmp(&right.name))
    });
    views
}

/// Drops views whose `(gvk, name)` repeats an earlier one.
fn unique_views(document: FavoriteDocument) -> FavoriteDocument {
    let mut views: Vec<FavoriteView> = Vec::with_capacity(document.views.len());
    for view in document.views {
        if views
            .iter()
            .any(|kept| kept.gvk == view.gvk && kept.name == view.name)
        {
            warn!(
                id = %view.id,
                name = %view.name,
                gvk = %view.gvk,
                "dropping favorite view with a duplicate name"
            );
            continue;
        }
        views.push(view);
    }
    FavoriteDocument { views }
}

/// Moves a corrupt file aside, copying it when the move fails. Failure to
/// keep a backup is logged and never fatal.
fn preserve_corrupt(path: &Path) {
    let backup = unused_backup_path(path, Utc::now());
    let kept = fs::rename(path, &backup).or_else(|rename_error| {
        debug!(error = %rename_error, "rename of corrupt favorites failed, copying");
        fs::copy(path, &backup).map(|_| ())
    });
    match kept {
        Ok(()) => warn!(backup = %backup.display(), "corrupt favorites backed up"),
        Err(error) => warn!(
            path = %path.display(),
            backup = %backup.display(),
            error = %error,
            "could not back up corrupt favorites"
        ),
    }
}

fn backup_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", now.format("%Y%m%dT%H%M%S")));
    path.with_file_name(name)
}

/// `backup_path`, with a `-N` suffix when that name is already taken.
fn unused_backup_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let base = backup_path(path, now);
    let mut candidate = base.clone();
    let mut counter = 1;
    while candidate.exists() {
        let mut name = base.as_os_str().to_os_string();
        name.push(format!("-{counter}"));
        candidate = PathBuf::from(name);
        counter += 1;
    }
    candidate
}

/// Writes to a sibling temp file and renames it over the target.
fn write_document(path: &Path, document: &FavoriteDocument) -> Result<(), FavoriteError> {
    let io_error = |source| FavoriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let encoded = serde_json::to_vec_pretty(document)?;
    let mut temp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    temp_name.push(".tmp");
    let temp = path.with_file_name(temp_name);
    fs::write(&temp, encoded).map_err(io_error)?;
    fs::rename(&temp, path).map_err(io_error)
}

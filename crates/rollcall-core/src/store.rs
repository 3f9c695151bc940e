//! Flat on-disk store of enrolled face encodings.
//!
//! One JSON document holds every identity, keyed by name, in enrollment
//! order. The document carries a format marker and a version so the layout
//! can evolve. Every mutation rewrites the whole file through
//! [`persist::write_atomic`] while holding the store lock.

use crate::persist::{self, FileLock};
use crate::types::{Embedding, KnownFace};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const STORE_FORMAT: &str = "rollcall-encodings";
const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("encoding store unavailable: {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("encoding store {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("embedding for {name:?} has {actual} dimensions, store holds {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("refusing to store an empty embedding for {0:?}")]
    EmptyEmbedding(String),
    #[error("serialize encoding store: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    format: String,
    version: u32,
    faces: Vec<KnownFace>,
}

/// In-memory view of the encoding store, bound to its file.
#[derive(Debug)]
pub struct EncodingStore {
    path: PathBuf,
    faces: IndexMap<String, Embedding>,
}

impl EncodingStore {
    /// Open the store at `path`. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let faces = load(&path)?;
        tracing::info!(path = %path.display(), faces = faces.len(), "loaded encoding store");
        Ok(Self { path, faces })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.faces.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Embedding> {
        self.faces.get(name)
    }

    /// Enrolled names in store order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.faces.keys().map(String::as_str)
    }

    /// Embedding dimensionality shared by every entry, if any are enrolled.
    pub fn dimension(&self) -> Option<usize> {
        self.faces.values().next().map(Embedding::len)
    }

    /// Ordered snapshot of the gallery for matching.
    pub fn known_faces(&self) -> Vec<KnownFace> {
        self.faces
            .iter()
            .map(|(name, embedding)| KnownFace {
                name: name.clone(),
                embedding: embedding.clone(),
            })
            .collect()
    }

    /// Insert or overwrite `name`, then persist.
    ///
    /// Overwriting keeps the entry's original position.
    pub fn add(&mut self, name: &str, embedding: Embedding) -> Result<(), StoreError> {
        if embedding.is_empty() {
            return Err(StoreError::EmptyEmbedding(name.to_string()));
        }
        // A lone entry being overwritten may change dimension.
        let other_dim = self
            .faces
            .iter()
            .find(|(n, _)| n.as_str() != name)
            .map(|(_, e)| e.len());
        if let Some(expected) = other_dim {
            if expected != embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    name: name.to_string(),
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let previous = self.faces.insert(name.to_string(), embedding);
        if let Err(e) = self.save() {
            // Keep memory consistent with disk.
            match previous {
                Some(old) => {
                    self.faces.insert(name.to_string(), old);
                }
                None => {
                    self.faces.shift_remove(name);
                }
            }
            return Err(e);
        }
        tracing::info!(name, replaced = previous.is_some(), "face encoding stored");
        Ok(())
    }

    /// Delete `name` if present and persist. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> Result<bool, StoreError> {
        let Some(index) = self.faces.get_index_of(name) else {
            tracing::debug!(name, "remove: no such identity");
            return Ok(false);
        };
        let Some((key, old)) = self.faces.shift_remove_index(index) else {
            return Ok(false);
        };
        if let Err(e) = self.save() {
            self.faces.shift_insert(index, key, old);
            return Err(e);
        }
        tracing::info!(name, "face encoding removed");
        Ok(true)
    }

    /// Serialize the full mapping, replacing the file on disk.
    pub fn save(&self) -> Result<(), StoreError> {
        let doc = StoreFile {
            format: STORE_FORMAT.to_string(),
            version: STORE_VERSION,
            faces: self.known_faces(),
        };
        let bytes = serde_json::to_vec(&doc)?;

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let _lock = FileLock::exclusive(&self.path).map_err(io_err)?;
        persist::write_atomic(&self.path, |w| w.write_all(&bytes)).map_err(io_err)?;
        tracing::debug!(path = %self.path.display(), faces = self.faces.len(), "saved encoding store");
        Ok(())
    }
}

/// Read the mapping persisted at `path`.
///
/// Returns an empty mapping when no store exists yet. Anything present but
/// unreadable is reported as [`StoreError::Corrupt`] and never replaced.
pub fn load(path: &Path) -> Result<IndexMap<String, Embedding>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no encoding store yet; starting empty");
            return Ok(IndexMap::new());
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let doc: StoreFile = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    if doc.format != STORE_FORMAT {
        return Err(corrupt(format!("unexpected format marker {:?}", doc.format)));
    }
    if doc.version != STORE_VERSION {
        return Err(corrupt(format!(
            "unsupported version {} (expected {STORE_VERSION})",
            doc.version
        )));
    }

    let mut faces = IndexMap::with_capacity(doc.faces.len());
    let mut dim: Option<usize> = None;
    for face in doc.faces {
        let len = face.embedding.len();
        match dim {
            None if len == 0 => return Err(corrupt(format!("empty embedding for {:?}", face.name))),
            None => dim = Some(len),
            Some(d) if d != len => {
                return Err(corrupt(format!(
                    "embedding for {:?} has {len} dimensions, expected {d}",
                    face.name
                )))
            }
            Some(_) => {}
        }
        if faces.insert(face.name.clone(), face.embedding).is_some() {
            return Err(corrupt(format!("duplicate identity {:?}", face.name)));
        }
    }
    Ok(faces)
}

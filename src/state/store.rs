use crate::errors::StateError;
use crate::util::{decode_branch, encode_branch};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ARCHIVE_DIR: &str = "archive";

/// Namespace of a state entry.
///
/// Intent-level entries (`iteration.json`) live under `Branch`, unit-level
/// entries (notes, blockers) under `Unit`. The two never alias, even when the
/// branch names are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The intent workspace branch
    Branch(String),
    /// A unit workspace branch
    Unit(String),
}

impl Scope {
    fn kind(&self) -> &'static str {
        match self {
            Scope::Branch(_) => "branch",
            Scope::Unit(_) => "unit",
        }
    }

    pub fn branch(&self) -> &str {
        match self {
            Scope::Branch(b) | Scope::Unit(b) => b,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind(), self.branch())
    }
}

/// Durable `(scope, key) -> content` store on the local filesystem.
///
/// Layout: `<root>/<kind>/<encoded branch>/<key>`. Writes go through a temp
/// file and a rename, so readers see either the old or the new content.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scope_dir(&self, scope: &Scope) -> PathBuf {
        self.root
            .join(scope.kind())
            .join(encode_branch(scope.branch()))
    }

    fn entry_path(&self, scope: &Scope, key: &str) -> Result<PathBuf, StateError> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(StateError::Io {
                path: self.scope_dir(scope).join(key),
                source: std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("invalid state key '{}'", key),
                ),
            });
        }
        Ok(self.scope_dir(scope).join(key))
    }

    /// Write `content` under `(scope, key)`. Last write wins.
    pub fn save(&self, scope: &Scope, key: &str, content: &str) -> Result<(), StateError> {
        let path = self.entry_path(scope, key)?;
        let dir = self.scope_dir(scope);
        fs::create_dir_all(&dir).map_err(|source| StateError::Io {
            path: dir.clone(),
            source,
        })?;

        let tmp = dir.join(format!(".{}.tmp", key));
        fs::write(&tmp, content)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|source| StateError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(scope = %scope, key, "state saved");
        Ok(())
    }

    pub fn load(&self, scope: &Scope, key: &str) -> Result<Option<String>, StateError> {
        let path = self.entry_path(scope, key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }

    /// Remove one entry. Returns whether it existed.
    pub fn delete(&self, scope: &Scope, key: &str) -> Result<bool, StateError> {
        let path = self.entry_path(scope, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }

    pub fn save_json<T: Serialize>(
        &self,
        scope: &Scope,
        key: &str,
        value: &T,
    ) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(value).map_err(|e| StateError::Corrupt {
            scope: scope.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.save(scope, key, &content)
    }

    /// Load and decode a JSON entry. Undecodable content is `StateError::Corrupt`.
    pub fn load_json<T: DeserializeOwned>(
        &self,
        scope: &Scope,
        key: &str,
    ) -> Result<Option<T>, StateError> {
        let Some(content) = self.load(scope, key)? else {
            return Ok(None);
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StateError::Corrupt {
                scope: scope.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Keys stored under `scope`, sorted.
    pub fn keys(&self, scope: &Scope) -> Result<Vec<String>, StateError> {
        let dir = self.scope_dir(scope);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StateError::Io { path: dir, source }),
        };

        let mut keys: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .filter(|name| !name.starts_with('.'))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Every scope that currently holds at least one directory on disk.
    pub fn scopes(&self) -> Result<Vec<Scope>, StateError> {
        let mut scopes = Vec::new();
        for kind in ["branch", "unit"] {
            let dir = self.root.join(kind);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(source) => return Err(StateError::Io { path: dir, source }),
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let Some(name) = entry.file_name().to_str().map(decode_branch) else {
                    continue;
                };
                scopes.push(if kind == "branch" {
                    Scope::Branch(name)
                } else {
                    Scope::Unit(name)
                });
            }
        }
        scopes.sort_by(|a, b| (a.kind(), a.branch()).cmp(&(b.kind(), b.branch())));
        Ok(scopes)
    }

    /// Remove every entry of `scope`. Returns the number of keys removed.
    pub fn delete_scope(&self, scope: &Scope) -> Result<usize, StateError> {
        let keys = self.keys(scope)?;
        let dir = self.scope_dir(scope);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|source| StateError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        info!(scope = %scope, removed = keys.len(), "state scope deleted");
        Ok(keys.len())
    }

    /// Copy the entries of `scopes` to `<root>/archive/<label>/<timestamp>/`.
    ///
    /// Returns the archive directory, or `None` when there was nothing to copy.
    pub fn archive(&self, label: &str, scopes: &[Scope]) -> Result<Option<PathBuf>, StateError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let dest_root = self.root.join(ARCHIVE_DIR).join(label).join(stamp);
        let mut copied = 0;

        for scope in scopes {
            for key in self.keys(scope)? {
                let from = self.scope_dir(scope).join(&key);
                let dest_dir = dest_root
                    .join(scope.kind())
                    .join(encode_branch(scope.branch()));
                fs::create_dir_all(&dest_dir)
                    .and_then(|_| fs::copy(&from, dest_dir.join(&key)))
                    .map_err(|source| StateError::Io {
                        path: dest_dir.clone(),
                        source,
                    })?;
                copied += 1;
            }
        }

        if copied == 0 {
            return Ok(None);
        }
        info!(archive = %dest_root.display(), entries = copied, "state archived");
        Ok(Some(dest_root))
    }
}

//! Deduplicating post storage.
//!
//! Posts are stored as one JSON file per post, named by post id, either
//! flat under the stash root or under a per-author subdirectory when
//! partitioning is enabled. A `HashSet` of known ids is built once at
//! startup so existence checks never touch the filesystem.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::Post;

#[derive(Error, Debug)]
pub enum StashError {
    #[error("post {id} not found in stash")]
    NotFound { id: u64 },

    #[error("stash root does not exist: {path}")]
    RootMissing { path: PathBuf },

    #[error("stash is partitioned by author; author_id is required")]
    AuthorRequired,

    #[error("stash I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize post: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Storage backend for posts, keyed by post id.
///
/// `id` is the sole deduplication key; author partitioning only changes
/// where a post lives, not its identity.
pub trait Stash {
    /// O(1), served from the in-memory index.
    fn exists(&self, id: u64) -> bool;

    /// Persist a post. Returns `Ok(false)` without any I/O when the post
    /// is already stashed and `overwrite` is false.
    fn put(&mut self, post: &Post, overwrite: bool) -> Result<bool, StashError>;

    /// Read a stored post's verbatim payload. When the stash is
    /// partitioned by author, `author_id` is required to derive the
    /// location; the stash keeps no reverse index from id to author.
    fn get(&self, id: u64, author_id: Option<u64>) -> Result<Value, StashError>;

    /// Remove a stored post and its index entry.
    fn delete(&mut self, id: u64, author_id: Option<u64>) -> Result<(), StashError>;

    /// Lazily enumerate stored ids, optionally scoped to one author
    /// partition. Restartable: each call walks the filesystem anew.
    fn ids(
        &self,
        author_id: Option<u64>,
    ) -> Result<Box<dyn Iterator<Item = Result<u64, StashError>>>, StashError>;
}

/// Filesystem-backed stash.
pub struct FileStash {
    root: PathBuf,
    by_author: bool,
    index: HashSet<u64>,
}

impl FileStash {
    /// Open a stash rooted at `root`, creating the root when `create_root`
    /// is set, then scan existing storage to build the id index. The scan
    /// is the one unavoidable O(existing posts) startup cost.
    pub fn open(
        root: impl Into<PathBuf>,
        by_author: bool,
        create_root: bool,
    ) -> Result<Self, StashError> {
        let root = root.into();
        if !root.is_dir() {
            if create_root {
                fs::create_dir_all(&root)?;
            } else {
                return Err(StashError::RootMissing { path: root });
            }
        }

        let mut stash = Self {
            root,
            by_author,
            index: HashSet::new(),
        };
        stash.rebuild_index()?;
        debug!(
            posts = stash.index.len(),
            by_author, "stash index built"
        );
        Ok(stash)
    }

    /// Number of posts currently indexed.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn rebuild_index(&mut self) -> Result<(), StashError> {
        self.index.clear();
        if self.by_author {
            for entry in fs::read_dir(&self.root)? {
                let path = entry?.path();
                if path.is_dir() {
                    for id in dir_ids(&path)? {
                        self.index.insert(id?);
                    }
                }
            }
        } else {
            for id in dir_ids(&self.root)? {
                self.index.insert(id?);
            }
        }
        Ok(())
    }

    fn post_path(&self, id: u64, author_id: Option<u64>) -> Result<PathBuf, StashError> {
        let dir = if self.by_author {
            let author = author_id.ok_or(StashError::AuthorRequired)?;
            self.root.join(author.to_string())
        } else {
            self.root.clone()
        };
        Ok(dir.join(format!("{id}.json")))
    }
}

impl Stash for FileStash {
    fn exists(&self, id: u64) -> bool {
        self.index.contains(&id)
    }

    fn put(&mut self, post: &Post, overwrite: bool) -> Result<bool, StashError> {
        if !overwrite && self.exists(post.id) {
            return Ok(false);
        }

        let path = self.post_path(post.id, Some(post.author_id))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write through a temp sibling and rename so a crash or cancel
        // mid-write never leaves a half-written post behind.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(post.raw())?)?;
        fs::rename(&tmp, &path)?;

        self.index.insert(post.id);
        info!(post_id = post.id, author_id = post.author_id, "stashed post");
        Ok(true)
    }

    fn get(&self, id: u64, author_id: Option<u64>) -> Result<Value, StashError> {
        let path = self.post_path(id, author_id)?;
        if !self.exists(id) {
            return Err(StashError::NotFound { id });
        }
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StashError::NotFound { id },
            _ => StashError::Io(e),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn delete(&mut self, id: u64, author_id: Option<u64>) -> Result<(), StashError> {
        let path = self.post_path(id, author_id)?;
        if !self.exists(id) {
            return Err(StashError::NotFound { id });
        }
        fs::remove_file(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StashError::NotFound { id },
            _ => StashError::Io(e),
        })?;
        self.index.remove(&id);
        Ok(())
    }

    fn ids(
        &self,
        author_id: Option<u64>,
    ) -> Result<Box<dyn Iterator<Item = Result<u64, StashError>>>, StashError> {
        if !self.by_author {
            return Ok(Box::new(dir_ids(&self.root)?));
        }

        match author_id {
            Some(author) => {
                let dir = self.root.join(author.to_string());
                match dir_ids(&dir) {
                    Ok(iter) => Ok(Box::new(iter)),
                    // No partition directory means no posts for that author.
                    Err(StashError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                        Ok(Box::new(std::iter::empty()))
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                let partitions = fs::read_dir(&self.root)?;
                let iter = partitions.flat_map(
                    |entry| -> Box<dyn Iterator<Item = Result<u64, StashError>>> {
                        match entry {
                            Ok(e) if e.path().is_dir() => match dir_ids(&e.path()) {
                                Ok(iter) => Box::new(iter),
                                Err(err) => Box::new(std::iter::once(Err(err))),
                            },
                            Ok(_) => Box::new(std::iter::empty()),
                            Err(e) => Box::new(std::iter::once(Err(StashError::Io(e)))),
                        }
                    },
                );
                Ok(Box::new(iter))
            }
        }
    }
}

/// Lazy iterator over the post ids stored directly in `dir`. Files that
/// are not named `<u64>.json` are skipped.
fn dir_ids(
    dir: &Path,
) -> Result<impl Iterator<Item = Result<u64, StashError>> + 'static, StashError> {
    let entries = fs::read_dir(dir)?;
    Ok(entries.filter_map(|entry| match entry {
        Ok(e) => post_id_from_path(&e.path()).map(Ok),
        Err(e) => Some(Err(StashError::Io(e))),
    }))
}

fn post_id_from_path(path: &Path) -> Option<u64> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.parse::<u64>().ok()
}

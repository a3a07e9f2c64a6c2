use crate::error::{LocalError, StorageError, StorageResult};
use crate::prelude::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::{BatchDeleteResult, Container, FailedKey, ObjectPage, Storage, StorageObject};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Directory-backed storage: every directory directly under the root is a
/// container, every file beneath it an object keyed by its relative path.
pub struct LocalStorage {
    root: PathBuf,
    page_size: usize,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.is_dir() {
            return Err(StorageError::from(LocalError::MissingRoot(
                root.display().to_string(),
            ))
            .into());
        }
        Ok(Self {
            root,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn container_path(&self, container: &str) -> StorageResult<PathBuf> {
        validate_relative(container)?;
        Ok(self.root.join(container))
    }

    fn remove_object(&self, container_path: &Path, key: &str) -> StorageResult<()> {
        validate_relative(key)?;
        let path = container_path.join(key);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(map_io("delete_objects", &path, e)),
        }

        // Drop directories emptied by the removal, stopping at the container.
        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir == container_path {
                break;
            }
            if fs::remove_dir(dir).is_err() {
                break;
            }
            parent = dir.parent();
        }
        Ok(())
    }
}

fn validate_relative(key: &str) -> StorageResult<()> {
    let path = Path::new(key);
    let valid = !key.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(LocalError::InvalidKey(key.to_string()).into())
    }
}

fn map_io(operation: &str, path: &Path, e: io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
        io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
            operation: operation.to_string(),
            message: format!("{}: {}", path.display(), e),
        },
        _ => LocalError::Io(e).into(),
    }
}

fn walk(dir: &Path, prefix: &str, out: &mut Vec<StorageObject>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };

        if entry.file_type()?.is_dir() {
            walk(&entry.path(), &key, out)?;
        } else {
            let last_modified = entry.metadata()?.modified().ok().map(DateTime::<Utc>::from);
            out.push(StorageObject { key, last_modified });
        }
    }
    Ok(())
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_containers(&self) -> StorageResult<Vec<Container>> {
        let entries = fs::read_dir(&self.root).map_err(|e| map_io("list_containers", &self.root, e))?;

        let mut containers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(LocalError::Io)?;
            if entry.file_type().map_err(LocalError::Io)?.is_dir() {
                containers.push(Container::new(entry.file_name().to_string_lossy()));
            }
        }
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    async fn list_objects(
        &self,
        container: &str,
        continuation_token: Option<&str>,
    ) -> StorageResult<ObjectPage> {
        let path = self.container_path(container)?;
        let mut objects = Vec::new();
        walk(&path, "", &mut objects).map_err(|e| map_io("list_objects", &path, e))?;
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        let mut remaining: Vec<StorageObject> = match continuation_token {
            Some(after) => objects.into_iter().filter(|o| o.key.as_str() > after).collect(),
            None => objects,
        };

        let next_token = if remaining.len() > self.page_size {
            remaining.truncate(self.page_size);
            remaining.last().map(|o| o.key.clone())
        } else {
            None
        };

        debug!(
            container,
            objects = remaining.len(),
            truncated = next_token.is_some(),
            "Listed local objects"
        );
        Ok(ObjectPage {
            objects: remaining,
            next_token,
        })
    }

    async fn delete_objects(
        &self,
        container: &str,
        keys: &[String],
    ) -> StorageResult<BatchDeleteResult> {
        let path = self.container_path(container)?;
        if !path.is_dir() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }

        let mut result = BatchDeleteResult::default();
        for key in keys {
            match self.remove_object(&path, key) {
                Ok(()) => result.deleted.push(key.clone()),
                Err(e) => {
                    warn!("Failed to remove local object {}/{}: {}", container, key, e);
                    let code = match &e {
                        StorageError::PermissionDenied { .. } => "AccessDenied",
                        StorageError::Local(LocalError::InvalidKey(_)) => "InvalidArgument",
                        _ => "InternalError",
                    };
                    result.failed.push(FailedKey {
                        key: key.clone(),
                        code: code.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    async fn delete_container(&self, container: &str) -> StorageResult<()> {
        let path = self.container_path(container)?;
        let mut objects = Vec::new();
        walk(&path, "", &mut objects).map_err(|e| map_io("delete_container", &path, e))?;
        if !objects.is_empty() {
            return Err(StorageError::PreconditionFailed {
                operation: "delete_container".into(),
                code: "BucketNotEmpty".into(),
                message: format!("{} still holds {} object(s)", path.display(), objects.len()),
            });
        }

        // Only empty directories remain; they are not objects.
        fs::remove_dir_all(&path).map_err(|e| map_io("delete_container", &path, e))?;
        info!("Removed local container: {:?}", path);
        Ok(())
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stale_sweep::error::{StorageError, StorageResult};
use stale_sweep::storage::{
    BatchDeleteResult, Container, FailedKey, ObjectPage, Storage, StorageObject,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListContainers,
    ListObjects(String),
    DeleteObjects(String, Vec<String>),
    DeleteContainer {
        container: String,
        objects_remaining: usize,
    },
}

#[derive(Default)]
struct State {
    containers: BTreeMap<String, BTreeMap<String, DateTime<Utc>>>,
    page_size: usize,
    list_containers_failures: VecDeque<StorageError>,
    list_objects_failures: HashMap<String, VecDeque<StorageError>>,
    delete_objects_failures: HashMap<String, VecDeque<StorageError>>,
    delete_container_failures: HashMap<String, VecDeque<StorageError>>,
    key_failures: HashMap<(String, String), VecDeque<String>>,
    calls: Vec<Call>,
}

/// In-memory storage with scripted failures and a call log.
pub struct ScriptedStorage {
    state: Mutex<State>,
}

impl ScriptedStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                page_size: 1000,
                ..Default::default()
            }),
        }
    }

    pub fn page_size(self, page_size: usize) -> Self {
        self.state.lock().unwrap().page_size = page_size;
        self
    }

    pub fn container(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .containers
            .entry(name.to_string())
            .or_default();
        self
    }

    pub fn object(self, container: &str, key: &str, last_modified: DateTime<Utc>) -> Self {
        self.put(container, key, last_modified);
        self
    }

    /// Writes an object into a container that already exists.
    pub fn put(&self, container: &str, key: &str, last_modified: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(key.to_string(), last_modified);
    }

    pub fn fail_list_containers(self, err: StorageError) -> Self {
        self.state
            .lock()
            .unwrap()
            .list_containers_failures
            .push_back(err);
        self
    }

    pub fn fail_list_objects(self, container: &str, err: StorageError) -> Self {
        self.state
            .lock()
            .unwrap()
            .list_objects_failures
            .entry(container.to_string())
            .or_default()
            .push_back(err);
        self
    }

    pub fn fail_delete_objects(self, container: &str, err: StorageError) -> Self {
        self.state
            .lock()
            .unwrap()
            .delete_objects_failures
            .entry(container.to_string())
            .or_default()
            .push_back(err);
        self
    }

    pub fn fail_delete_container(self, container: &str, err: StorageError) -> Self {
        self.state
            .lock()
            .unwrap()
            .delete_container_failures
            .entry(container.to_string())
            .or_default()
            .push_back(err);
        self
    }

    /// The next `times` bulk deletes that include `key` reject it with `code`.
    pub fn fail_key(self, container: &str, key: &str, code: &str, times: usize) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let queue = state
                .key_failures
                .entry((container.to_string(), key.to_string()))
                .or_default();
            for _ in 0..times {
                queue.push_back(code.to_string());
            }
        }
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.state.lock().unwrap().containers.contains_key(name)
    }

    pub fn object_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|objects| objects.len())
            .unwrap_or(0)
    }

    pub fn delete_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::DeleteObjects(..) | Call::DeleteContainer { .. }))
            .count()
    }
}

fn pop(failures: &mut HashMap<String, VecDeque<StorageError>>, container: &str) -> Option<StorageError> {
    failures.get_mut(container).and_then(|queue| queue.pop_front())
}

#[async_trait]
impl Storage for ScriptedStorage {
    async fn list_containers(&self) -> StorageResult<Vec<Container>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListContainers);
        if let Some(err) = state.list_containers_failures.pop_front() {
            return Err(err);
        }
        Ok(state.containers.keys().map(Container::new).collect())
    }

    async fn list_objects(
        &self,
        container: &str,
        continuation_token: Option<&str>,
    ) -> StorageResult<ObjectPage> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListObjects(container.to_string()));
        if let Some(err) = pop(&mut state.list_objects_failures, container) {
            return Err(err);
        }

        let page_size = state.page_size;
        let objects = state
            .containers
            .get(container)
            .ok_or_else(|| StorageError::NotFound(container.to_string()))?;
        let start: usize = continuation_token.map(|t| t.parse().unwrap()).unwrap_or(0);

        let page: Vec<StorageObject> = objects
            .iter()
            .skip(start)
            .take(page_size)
            .map(|(key, ts)| StorageObject {
                key: key.clone(),
                last_modified: Some(*ts),
            })
            .collect();
        let next = start + page.len();
        let next_token = (next < objects.len()).then(|| next.to_string());

        Ok(ObjectPage {
            objects: page,
            next_token,
        })
    }

    async fn delete_objects(
        &self,
        container: &str,
        keys: &[String],
    ) -> StorageResult<BatchDeleteResult> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::DeleteObjects(container.to_string(), keys.to_vec()));
        if let Some(err) = pop(&mut state.delete_objects_failures, container) {
            return Err(err);
        }

        let mut result = BatchDeleteResult::default();
        for key in keys {
            let scripted = state
                .key_failures
                .get_mut(&(container.to_string(), key.clone()))
                .and_then(|queue| queue.pop_front());
            match scripted {
                Some(code) => result.failed.push(FailedKey {
                    key: key.clone(),
                    code,
                    message: "scripted failure".into(),
                }),
                None => {
                    if let Some(objects) = state.containers.get_mut(container) {
                        objects.remove(key);
                    }
                    result.deleted.push(key.clone());
                }
            }
        }
        Ok(result)
    }

    async fn delete_container(&self, container: &str) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        let remaining = state.containers.get(container).map(|o| o.len());
        state.calls.push(Call::DeleteContainer {
            container: container.to_string(),
            objects_remaining: remaining.unwrap_or(0),
        });
        if let Some(err) = pop(&mut state.delete_container_failures, container) {
            return Err(err);
        }

        match remaining {
            None => Err(StorageError::NotFound(container.to_string())),
            Some(n) if n > 0 => Err(StorageError::PreconditionFailed {
                operation: "delete_container".into(),
                code: "BucketNotEmpty".into(),
                message: "The bucket you tried to delete is not empty".into(),
            }),
            Some(_) => {
                state.containers.remove(container);
                Ok(())
            }
        }
    }
}

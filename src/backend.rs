//! Access to the object that holds the persisted document.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::document::DocumentCodec;
use crate::error::{Error, Result};
use crate::store::Snippets;

/// A named object with string fields, shaped like a Kubernetes ConfigMap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigObject {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Opaque version for optimistic concurrency. `None` on update means
    /// "overwrite unconditionally".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ConfigObject {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }

    pub fn field(&self, field: &str) -> Option<&str> {
        self.data.get(field).map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("object {namespace}/{name} was modified concurrently")]
    Conflict { namespace: String, name: String },

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(namespace: &str, name: &str) -> Self {
        Self::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn conflict(namespace: &str, name: &str) -> Self {
        Self::Conflict {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Fetch/update client for config objects. Implementations must be
/// thread-safe.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> std::result::Result<ConfigObject, StoreError>;

    /// Replaces an existing object.
    async fn update(&self, object: ConfigObject) -> std::result::Result<(), StoreError>;
}

// ── In-memory store ─────────────────────────────────────────

/// In-memory object storage backed by a `RwLock<HashMap>`.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), ConfigObject>>,
    version: AtomicU64,
    writes: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites an object without counting it as a write.
    pub async fn insert(&self, mut object: ConfigObject) {
        object.resource_version = Some(self.next_version());
        let mut objects = self.objects.write().await;
        objects.insert((object.namespace.clone(), object.name.clone()), object);
    }

    /// Number of successful `update` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, namespace: &str, name: &str) -> std::result::Result<ConfigObject, StoreError> {
        let objects = self.objects.read().await;
        objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(namespace, name))
    }

    async fn update(&self, mut object: ConfigObject) -> std::result::Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        let id = (object.namespace.clone(), object.name.clone());
        let Some(current) = objects.get(&id) else {
            return Err(StoreError::not_found(&object.namespace, &object.name));
        };
        if object.resource_version.is_some() && object.resource_version != current.resource_version {
            return Err(StoreError::conflict(&object.namespace, &object.name));
        }
        object.resource_version = Some(self.next_version());
        objects.insert(id, object);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Persisted document ──────────────────────────────────────

/// Location of the persisted document: a field of a named object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTarget {
    pub namespace: String,
    pub name: String,
    pub field: String,
}

impl DocumentTarget {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            field: field.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (what, value) in [
            ("namespace", &self.namespace),
            ("name", &self.name),
            ("field", &self.field),
        ] {
            if value.trim().is_empty() {
                return Err(Error::invalid_config(format!(
                    "document {} must not be empty",
                    what
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for DocumentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}]", self.namespace, self.name, self.field)
    }
}

/// The promtail config document: one field of one object, read and
/// written through an [`ObjectStore`].
#[derive(Clone)]
pub struct PersistedDocument {
    store: Arc<dyn ObjectStore>,
    target: DocumentTarget,
    codec: DocumentCodec,
}

impl PersistedDocument {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        target: DocumentTarget,
        codec: DocumentCodec,
    ) -> Result<Self> {
        target.validate()?;
        Ok(Self {
            store,
            target,
            codec,
        })
    }

    pub fn target(&self) -> &DocumentTarget {
        &self.target
    }

    pub fn codec(&self) -> &DocumentCodec {
        &self.codec
    }

    /// Fetches the object and parses its document field. A missing field
    /// is treated as an empty document.
    pub async fn fetch(&self) -> Result<(ConfigObject, Snippets)> {
        let object = self
            .store
            .get(&self.target.namespace, &self.target.name)
            .await
            .map_err(|source| self.unavailable(source))?;
        let snippets = self
            .codec
            .parse(object.field(&self.target.field).unwrap_or_default())?;
        Ok((object, snippets))
    }

    pub async fn load(&self) -> Result<Snippets> {
        self.fetch().await.map(|(_, snippets)| snippets)
    }

    /// Renders `snippets` into the document field of `object` and writes
    /// the object back. Returns the rendered text.
    pub async fn save(&self, mut object: ConfigObject, snippets: &Snippets) -> Result<String> {
        let rendered = self.codec.render(snippets);
        object
            .data
            .insert(self.target.field.clone(), rendered.clone());
        self.store
            .update(object)
            .await
            .map_err(|source| self.unavailable(source))?;
        Ok(rendered)
    }

    fn unavailable(&self, source: StoreError) -> Error {
        Error::BackingStoreUnavailable {
            target: self.target.to_string(),
            source,
        }
    }
}

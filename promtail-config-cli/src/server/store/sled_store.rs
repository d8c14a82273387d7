use async_trait::async_trait;
use promtail_config_lib::{ConfigObject, ObjectStore, StoreError};

/// Persistent config object storage backed by sled.
///
/// Objects are stored as JSON under `configmap:{namespace}/{name}`; sled's
/// id generator supplies the resource versions.
pub struct SledObjectStore {
    db: sled::Db,
}

impl SledObjectStore {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    /// Open a sled database at the given directory path.
    pub fn open(data_dir: &str) -> Result<Self, String> {
        let db = sled::open(data_dir).map_err(|e| format!("failed to open sled db: {}", e))?;
        Ok(Self::new(db))
    }

    fn object_key(namespace: &str, name: &str) -> String {
        format!("configmap:{}/{}", namespace, name)
    }

    fn next_version(&self) -> Result<String, StoreError> {
        self.db
            .generate_id()
            .map(|id| id.to_string())
            .map_err(|e| StoreError::Backend(format!("failed to generate version: {}", e)))
    }

    /// Creates the object unless it already exists. Returns whether it was
    /// created.
    pub fn seed(&self, mut object: ConfigObject) -> Result<bool, StoreError> {
        object.resource_version = Some(self.next_version()?);
        let bytes = encode(&object)?;
        let created = self
            .db
            .compare_and_swap(
                Self::object_key(&object.namespace, &object.name),
                None as Option<&[u8]>,
                Some(bytes),
            )
            .map_err(|e| StoreError::Backend(format!("failed to store object: {}", e)))?
            .is_ok();
        self.flush()?;
        Ok(created)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| StoreError::Backend(format!("failed to flush: {}", e)))
    }
}

fn encode(object: &ConfigObject) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(object)
        .map_err(|e| StoreError::Backend(format!("failed to serialize object: {}", e)))
}

#[async_trait]
impl ObjectStore for SledObjectStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<ConfigObject, StoreError> {
        let ivec = self
            .db
            .get(Self::object_key(namespace, name))
            .map_err(|e| StoreError::Backend(format!("failed to read object: {}", e)))?
            .ok_or_else(|| StoreError::not_found(namespace, name))?;
        serde_json::from_slice(&ivec)
            .map_err(|e| StoreError::Backend(format!("failed to deserialize object: {}", e)))
    }

    async fn update(&self, mut object: ConfigObject) -> Result<(), StoreError> {
        let key = Self::object_key(&object.namespace, &object.name);
        let current = self
            .db
            .get(&key)
            .map_err(|e| StoreError::Backend(format!("failed to read object: {}", e)))?
            .ok_or_else(|| StoreError::not_found(&object.namespace, &object.name))?;

        if object.resource_version.is_some() {
            let stored: ConfigObject = serde_json::from_slice(&current).map_err(|e| {
                StoreError::Backend(format!("failed to deserialize object: {}", e))
            })?;
            if stored.resource_version != object.resource_version {
                return Err(StoreError::conflict(&object.namespace, &object.name));
            }
        }

        object.resource_version = Some(self.next_version()?);
        let bytes = encode(&object)?;
        // The swap fails if another writer got in between the read and here.
        self.db
            .compare_and_swap(&key, Some(current), Some(bytes))
            .map_err(|e| StoreError::Backend(format!("failed to store object: {}", e)))?
            .map_err(|_| StoreError::conflict(&object.namespace, &object.name))?;
        self.flush()
    }
}

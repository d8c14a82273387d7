pub mod kube;
pub mod sled_store;

use std::sync::Arc;

use promtail_config_lib::{ConfigObject, DocumentTarget, MemoryObjectStore, ObjectStore};
use tracing::info;

use self::kube::KubeObjectStore;
use self::sled_store::SledObjectStore;
use super::config::{BackendConfig, BackendKind};

/// Opens the configured object store.
///
/// The local backends start out empty, so the target object is created
/// there when missing; on Kubernetes it must already exist.
pub async fn open_backend(
    config: &BackendConfig,
    target: &DocumentTarget,
) -> Result<Arc<dyn ObjectStore>, Box<dyn std::error::Error>> {
    let seed = ConfigObject::new(&target.namespace, &target.name);
    match config.kind {
        BackendKind::Kubernetes => {
            let store = KubeObjectStore::from_service_account(
                &config.api_server,
                &config.token_path,
                &config.ca_path,
            )?;
            info!(api_server = %config.api_server, "Using Kubernetes backend");
            Ok(Arc::new(store))
        }
        BackendKind::Sled => {
            let store = SledObjectStore::open(&config.data_dir)?;
            if store.seed(seed)? {
                info!(target_document = %target, "Created empty target object");
            }
            info!(data_dir = %config.data_dir, "Using sled backend");
            Ok(Arc::new(store))
        }
        BackendKind::Memory => {
            let store = MemoryObjectStore::new();
            store.insert(seed).await;
            info!("Using in-memory backend, nothing survives a restart");
            Ok(Arc::new(store))
        }
    }
}

use std::collections::BTreeMap;

use async_trait::async_trait;
use promtail_config_lib::{ConfigObject, ObjectStore, StoreError};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;

const MERGE_PATCH: &str = "application/merge-patch+json";

/// ConfigMap access through the Kubernetes API server, authenticated with
/// the pod's service account.
///
/// Updates are JSON merge patches of `data` only, so labels, annotations,
/// owner references and `binaryData` set by others stay untouched.
pub struct KubeObjectStore {
    client: reqwest::Client,
    api_server: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ConfigMap {
    metadata: ObjectMeta,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    namespace: String,
    #[serde(default)]
    resource_version: Option<String>,
}

impl From<ConfigMap> for ConfigObject {
    fn from(map: ConfigMap) -> Self {
        ConfigObject {
            namespace: map.metadata.namespace,
            name: map.metadata.name,
            data: map.data,
            resource_version: map.metadata.resource_version,
        }
    }
}

/// Merge patch that replaces the `data` entries of `object`. A known
/// resource version makes the API server reject the patch with 409 when
/// the object changed since it was read.
fn merge_patch(object: &ConfigObject) -> serde_json::Value {
    let mut metadata = serde_json::Map::new();
    if let Some(version) = &object.resource_version {
        metadata.insert("resourceVersion".to_string(), version.clone().into());
    }
    serde_json::json!({
        "metadata": metadata,
        "data": object.data,
    })
}

impl KubeObjectStore {
    /// Reads the service account token and the cluster CA bundle.
    pub fn from_service_account(
        api_server: &str,
        token_path: &str,
        ca_path: &str,
    ) -> Result<Self, String> {
        let token = std::fs::read_to_string(token_path)
            .map_err(|e| format!("failed to read token {}: {}", token_path, e))?;
        let ca = std::fs::read(ca_path)
            .map_err(|e| format!("failed to read CA bundle {}: {}", ca_path, e))?;
        let cert = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| format!("invalid CA bundle {}: {}", ca_path, e))?;
        let client = reqwest::Client::builder()
            .add_root_certificate(cert)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            api_server: api_server.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        })
    }

    fn url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/configmaps/{}",
            self.api_server, namespace, name
        )
    }
}

async fn backend_error(response: reqwest::Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    StoreError::Backend(format!("API server returned {}: {}", status, body))
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<ConfigObject, StoreError> {
        let response = self
            .client
            .get(self.url(namespace, name))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("failed to fetch ConfigMap: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::not_found(namespace, name)),
            status if status.is_success() => response
                .json::<ConfigMap>()
                .await
                .map(ConfigObject::from)
                .map_err(|e| StoreError::Backend(format!("invalid ConfigMap: {}", e))),
            _ => Err(backend_error(response).await),
        }
    }

    async fn update(&self, object: ConfigObject) -> Result<(), StoreError> {
        let (namespace, name) = (&object.namespace, &object.name);
        let body = serde_json::to_vec(&merge_patch(&object))
            .map_err(|e| StoreError::Backend(format!("failed to encode patch: {}", e)))?;
        let response = self
            .client
            .patch(self.url(namespace, name))
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, MERGE_PATCH)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("failed to update ConfigMap: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::not_found(namespace, name)),
            StatusCode::CONFLICT => Err(StoreError::conflict(namespace, name)),
            status if status.is_success() => Ok(()),
            _ => Err(backend_error(response).await),
        }
    }
}

//! Turns workload events into `add_config` / `del_config` calls.
//!
//! A workload opts in with the [`PROMTAIL_CONFIG_LABEL`] label, whose value
//! names a ConfigMap in the workload's namespace holding the snippet under
//! [`SNIPPET_FIELD`]. Workloads running several containers pick the one to
//! scrape with [`PROMTAIL_CONTAINER_NAME_LABEL`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::backend::{ObjectStore, StoreError};
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::key::Key;

pub const PROMTAIL_CONFIG_LABEL: &str = "giantswarm.io/loki-promtail-config";
pub const PROMTAIL_CONTAINER_NAME_LABEL: &str = "giantswarm.io/loki-promtail-container";
pub const SNIPPET_FIELD: &str = "promtail.yaml";

/// The parts of a workload (pod) the operator looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<String>,
}

impl Workload {
    fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Whether the workload asked for a promtail config.
pub fn handles(workload: &Workload) -> bool {
    workload.labels.contains_key(PROMTAIL_CONFIG_LABEL)
}

/// Builds the key of a workload's snippet.
///
/// The logging container is the one named by
/// [`PROMTAIL_CONTAINER_NAME_LABEL`]; without that label the workload must
/// run exactly one container.
pub fn config_key(workload: &Workload) -> Result<Key> {
    let container = match workload.labels.get(PROMTAIL_CONTAINER_NAME_LABEL) {
        Some(name) => {
            if !workload.containers.iter().any(|c| c == name) {
                return Err(Error::UnknownContainer {
                    workload: workload.id(),
                    container: name.clone(),
                });
            }
            name.clone()
        }
        None => match workload.containers.as_slice() {
            [only] => only.clone(),
            containers => {
                return Err(Error::AmbiguousContainerSelection {
                    workload: workload.id(),
                    containers: containers.len(),
                })
            }
        },
    };
    Ok(Key::build(&workload.namespace, &workload.labels, container))
}

pub struct WorkloadResource {
    objects: Arc<dyn ObjectStore>,
    handler: Arc<dyn Handler>,
}

impl WorkloadResource {
    pub fn new(objects: Arc<dyn ObjectStore>, handler: Arc<dyn Handler>) -> Self {
        Self { objects, handler }
    }

    /// Registers the snippet of a created or updated workload. Returns the
    /// key, or `None` when the workload does not ask for a promtail config.
    pub async fn ensure_created(&self, workload: &Workload) -> Result<Option<Key>> {
        if !handles(workload) {
            debug!(workload = %workload.id(), "Workload has no promtail config label, skipping");
            return Ok(None);
        }
        let key = config_key(workload)?;
        let snippet = self.load_snippet(workload).await?;
        self.handler.add_config(key.clone(), snippet);
        info!(workload = %workload.id(), key = %key, "Registered promtail snippet");
        Ok(Some(key))
    }

    /// Drops the snippet of a deleted workload.
    pub async fn ensure_deleted(&self, workload: &Workload) -> Result<Option<Key>> {
        if !handles(workload) {
            return Ok(None);
        }
        let key = config_key(workload)?;
        self.handler.del_config(&key);
        info!(workload = %workload.id(), key = %key, "Removed promtail snippet");
        Ok(Some(key))
    }

    async fn load_snippet(&self, workload: &Workload) -> Result<String> {
        let unavailable = |reason: String| Error::SnippetUnavailable {
            workload: workload.id(),
            reason,
        };

        let name = workload
            .labels
            .get(PROMTAIL_CONFIG_LABEL)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| unavailable(format!("'{}' label is empty", PROMTAIL_CONFIG_LABEL)))?;

        let object = self
            .objects
            .get(&workload.namespace, name)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => {
                    unavailable(format!("ConfigMap '{}' configured, but not found", name))
                }
                other => unavailable(other.to_string()),
            })?;

        object
            .field(SNIPPET_FIELD)
            .map(str::to_string)
            .ok_or_else(|| {
                unavailable(format!(
                    "'{}' key not found in ConfigMap '{}'",
                    SNIPPET_FIELD, name
                ))
            })
    }
}

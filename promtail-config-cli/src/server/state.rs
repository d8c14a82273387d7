use std::sync::Arc;

use promtail_config_lib::{PeriodicHandler, WorkloadResource};

/// Shared application state for the HTTP server.
pub struct AppState {
    /// Owns the snippets and the flush task.
    pub handler: Arc<PeriodicHandler>,
    /// Resolves workload events into handler calls.
    pub resource: WorkloadResource,
}

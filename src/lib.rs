//! Aggregates the promtail scrape-config snippets of many workloads into a
//! single persisted document.
//!
//! The pieces are plain values wired together by the caller:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use promtail_config_lib::{
//!     DocumentCodec, DocumentTarget, Handler, HandlerConfig, Key, MemoryObjectStore,
//!     PeriodicHandler, PersistedDocument,
//! };
//!
//! # async fn demo() -> promtail_config_lib::Result<()> {
//! let objects = Arc::new(MemoryObjectStore::new());
//! let document = PersistedDocument::new(
//!     objects,
//!     DocumentTarget::new("loki", "promtail", "promtail.yaml"),
//!     DocumentCodec::default(),
//! )?;
//! let handler = PeriodicHandler::start(
//!     HandlerConfig {
//!         initial_delay: Duration::from_secs(10),
//!         period: Duration::from_secs(30),
//!     },
//!     document,
//! )
//! .await?;
//!
//! handler.add_config(Key::build("apps", [("app", "api")], "api"), "- job_name: api".into());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod diff;
pub mod document;
pub mod error;
pub mod handler;
pub mod key;
pub mod resource;
pub mod store;

pub use backend::{
    ConfigObject, DocumentTarget, MemoryObjectStore, ObjectStore, PersistedDocument, StoreError,
};
pub use diff::SnippetDiff;
pub use document::DocumentCodec;
pub use error::{Error, Result};
pub use handler::{
    FlushOutcome, FlushReport, FlusherState, Handler, HandlerConfig, PeriodicHandler,
};
pub use key::Key;
pub use resource::{Workload, WorkloadResource};
pub use store::{SnippetStore, Snippets};

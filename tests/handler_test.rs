use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use promtail_config_lib::document::DEFAULT_HEADER;
use promtail_config_lib::{
    ConfigObject, DocumentCodec, DocumentTarget, Error, FlushOutcome, FlusherState, Handler,
    HandlerConfig, Key, MemoryObjectStore, ObjectStore, PeriodicHandler, PersistedDocument,
    StoreError,
};

const FIELD: &str = "promtail.yaml";

fn config() -> HandlerConfig {
    HandlerConfig {
        initial_delay: Duration::from_secs(10),
        period: Duration::from_secs(30),
    }
}

fn target() -> DocumentTarget {
    DocumentTarget::new("loki", "promtail", FIELD)
}

async fn seeded_store(text: &str) -> Arc<MemoryObjectStore> {
    let store = Arc::new(MemoryObjectStore::new());
    store
        .insert(ConfigObject::new("loki", "promtail").with_field(FIELD, text))
        .await;
    store
}

async fn start(store: Arc<dyn ObjectStore>) -> PeriodicHandler {
    let document = PersistedDocument::new(store, target(), DocumentCodec::default()).unwrap();
    PeriodicHandler::start(config(), document).await.unwrap()
}

async fn persisted(store: &MemoryObjectStore) -> String {
    store
        .get("loki", "promtail")
        .await
        .unwrap()
        .field(FIELD)
        .unwrap_or_default()
        .to_string()
}

fn k1() -> Key {
    Key::build("ns1", [("a", "1")], "c1")
}

/// Wraps the memory store and fails every call while `failing` is set.
struct FlakyStore {
    inner: Arc<MemoryObjectStore>,
    failing: AtomicBool,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<ConfigObject, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection refused".into()));
        }
        self.inner.get(namespace, name).await
    }

    async fn update(&self, object: ConfigObject) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection refused".into()));
        }
        self.inner.update(object).await
    }
}

/// Wraps the memory store, records every call and can hold the next `get`
/// until `release` is notified.
struct GatedStore {
    inner: Arc<MemoryObjectStore>,
    hold_next_get: AtomicBool,
    entered: Notify,
    release: Notify,
    events: Mutex<Vec<&'static str>>,
}

impl GatedStore {
    fn new(inner: Arc<MemoryObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hold_next_get: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
            events: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for GatedStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<ConfigObject, StoreError> {
        self.record("get");
        if self.hold_next_get.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.get(namespace, name).await
    }

    async fn update(&self, object: ConfigObject) -> Result<(), StoreError> {
        self.record("update");
        let result = self.inner.update(object).await;
        self.record("updated");
        result
    }
}

#[tokio::test]
async fn test_add_remove_scenario() {
    let store = seeded_store("").await;
    let handler = start(store.clone()).await;

    handler.add_config(k1(), "scrape: 1".into());
    assert!(matches!(
        handler.flush().await,
        FlushOutcome::Written { added: 1, .. }
    ));
    let text = persisted(&store).await;
    assert_eq!(text.matches("#@container ").count(), 1);
    assert!(text.contains("#@container c1\n"));

    handler.del_config(&k1());
    assert!(matches!(
        handler.flush().await,
        FlushOutcome::Written { removed: 1, .. }
    ));
    assert_eq!(persisted(&store).await, DEFAULT_HEADER);

    handler.add_config(k1(), "scrape: 1".into());
    handler.add_config(k1(), "scrape: 2".into());
    handler.flush().await;
    let text = persisted(&store).await;
    assert!(text.contains("scrape: 2"));
    assert!(!text.contains("scrape: 1"));

    handler.shutdown().await;
}

#[tokio::test]
async fn test_consecutive_flushes_write_once() {
    let store = seeded_store("").await;
    let handler = start(store.clone()).await;

    handler.add_config(k1(), "scrape: 1".into());
    handler.flush().await;
    assert_eq!(handler.flush().await, FlushOutcome::Unchanged);
    assert_eq!(store.writes(), 1);
    handler.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_flushes_run_one_after_another() {
    let inner = seeded_store("").await;
    let gated = GatedStore::new(inner.clone());
    let handler = start(gated.clone()).await;
    handler.add_config(k1(), "scrape: 1".into());
    gated.events.lock().unwrap().clear();
    gated.hold_next_get.store(true, Ordering::SeqCst);

    let (first, second, ()) = tokio::join!(handler.flush(), handler.flush(), async {
        gated.entered.notified().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // The second cycle must not read while the first is in flight.
        assert_eq!(gated.events(), ["get"]);
        gated.release.notify_one();
    });

    assert!(matches!(first, FlushOutcome::Written { added: 1, .. }));
    assert_eq!(second, FlushOutcome::Unchanged);
    assert_eq!(gated.events(), ["get", "update", "updated", "get"]);
    assert_eq!(inner.writes(), 1);
    handler.shutdown().await;
}

#[tokio::test]
async fn test_trailing_newline_does_not_cause_rewrites() {
    let store = seeded_store("").await;
    let handler = start(store.clone()).await;

    handler.add_config(k1(), "- job_name: api\n  static_configs: []\n".into());
    handler.flush().await;
    assert_eq!(handler.flush().await, FlushOutcome::Unchanged);
    assert_eq!(store.writes(), 1);
    handler.shutdown().await;
}

#[tokio::test]
async fn test_loads_existing_document() {
    let codec = DocumentCodec::default();
    let existing = codec.render(&[(k1(), "scrape: 1".to_string())].into_iter().collect());
    let store = seeded_store(&existing).await;
    let handler = start(store.clone()).await;

    assert_eq!(handler.len(), 1);
    assert_eq!(handler.render(), existing);
    assert_eq!(handler.flush().await, FlushOutcome::Unchanged);
    assert_eq!(store.writes(), 0);
    handler.shutdown().await;
}

#[tokio::test]
async fn test_external_edit_is_overwritten() {
    let store = seeded_store("").await;
    let handler = start(store.clone()).await;
    handler.add_config(k1(), "scrape: 1".into());
    handler.flush().await;

    store
        .insert(ConfigObject::new("loki", "promtail").with_field(FIELD, DEFAULT_HEADER))
        .await;
    assert!(matches!(
        handler.flush().await,
        FlushOutcome::Written { added: 1, .. }
    ));
    assert!(persisted(&store).await.contains("scrape: 1"));
    handler.shutdown().await;
}

#[tokio::test]
async fn test_invalid_configuration_fails_fast() {
    let store = seeded_store("").await;
    let document = PersistedDocument::new(store.clone(), target(), DocumentCodec::default()).unwrap();
    let zero = HandlerConfig {
        initial_delay: Duration::ZERO,
        period: Duration::from_secs(1),
    };
    assert!(matches!(
        PeriodicHandler::start(zero, document).await,
        Err(Error::InvalidConfiguration(_))
    ));

    assert!(matches!(
        PersistedDocument::new(
            store,
            DocumentTarget::new("loki", "promtail", ""),
            DocumentCodec::default()
        ),
        Err(Error::InvalidConfiguration(_))
    ));
}

#[tokio::test]
async fn test_malformed_document_fails_construction() {
    let text = format!("{}#@container c1\nscrape: 1\n", DEFAULT_HEADER);
    let store = seeded_store(&text).await;
    let document = PersistedDocument::new(store, target(), DocumentCodec::default()).unwrap();
    assert!(matches!(
        PeriodicHandler::start(config(), document).await,
        Err(Error::MalformedDocument { .. })
    ));
}

#[tokio::test]
async fn test_failed_cycle_is_reported_and_retried() {
    let inner = seeded_store("").await;
    let flaky = Arc::new(FlakyStore {
        inner: inner.clone(),
        failing: AtomicBool::new(false),
    });
    let handler = start(flaky.clone()).await;
    handler.add_config(k1(), "scrape: 1".into());

    flaky.failing.store(true, Ordering::SeqCst);
    assert!(matches!(handler.flush().await, FlushOutcome::Failed { .. }));
    let report = handler.last_report().unwrap();
    assert_eq!(report.cycle, 1);
    assert!(matches!(report.outcome, FlushOutcome::Failed { ref error } if error.contains("connection refused")));
    assert_eq!(inner.writes(), 0);

    flaky.failing.store(false, Ordering::SeqCst);
    assert!(matches!(handler.flush().await, FlushOutcome::Written { .. }));
    assert_eq!(handler.last_report().unwrap().cycle, 2);
    assert_eq!(inner.writes(), 1);
    handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timer_waits_initial_delay_then_period() {
    let store = seeded_store("").await;
    let handler = start(store.clone()).await;
    handler.add_config(k1(), "scrape: 1".into());

    tokio::time::sleep(Duration::from_secs(39)).await;
    assert_eq!(store.writes(), 0);
    assert_eq!(handler.state(), FlusherState::Idle);
    assert!(handler.last_report().is_none());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.writes(), 1);
    assert_eq!(handler.last_report().unwrap().cycle, 1);

    // Nothing changed since, so later cycles skip the write.
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(store.writes(), 1);
    assert_eq!(handler.last_report().unwrap().cycle, 4);
    assert_eq!(handler.last_report().unwrap().outcome, FlushOutcome::Unchanged);

    handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_flush_stays_flushing_while_timer_moves_on() {
    let gated = GatedStore::new(seeded_store("").await);
    let handler = start(gated.clone()).await;
    handler.add_config(k1(), "scrape: 1".into());
    gated.hold_next_get.store(true, Ordering::SeqCst);

    let (outcome, ()) = tokio::join!(handler.flush(), async {
        gated.entered.notified().await;
        assert_eq!(handler.state(), FlusherState::Flushing);
        // The initial delay runs out while the cycle is still reading.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(handler.state(), FlusherState::Flushing);
        gated.release.notify_one();
    });

    assert!(matches!(outcome, FlushOutcome::Written { .. }));
    assert_eq!(handler.state(), FlusherState::Idle);
    handler.shutdown().await;
    assert_eq!(handler.state(), FlusherState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_see_reports() {
    let store = seeded_store("").await;
    let handler = start(store.clone()).await;
    let mut reports = handler.subscribe();
    handler.add_config(k1(), "scrape: 1".into());

    reports.changed().await.unwrap();
    let report = reports.borrow_and_update().clone().unwrap();
    assert!(matches!(report.outcome, FlushOutcome::Written { added: 1, .. }));
    handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_the_timer() {
    let store = seeded_store("").await;
    let handler = start(store.clone()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handler.state(), FlusherState::WaitingInitialDelay);

    handler.add_config(k1(), "scrape: 1".into());
    handler.shutdown().await;
    assert_eq!(handler.state(), FlusherState::Stopped);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(store.writes(), 0);
    assert!(handler.last_report().is_none());
}

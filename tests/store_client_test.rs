//! HttpStoreClient against a running HTTP API

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use road_telemetry::domain::record::{NewRecord, ProcessedRecord};
use road_telemetry::domain::types::{
    AccelerometerSample, AggregatedData, GpsSample, ParkingSample, UserId,
};
use road_telemetry::error::StoreError;
use road_telemetry::infra::Metrics;
use road_telemetry::io::{start_api_server, ApiState, HttpStoreClient, SqliteStore};
use road_telemetry::services::{
    BatchBuffer, BatchPolicy, FlushOutcome, StoreGateway, SubscriptionRegistry, ZAxisClassifier,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Hub-side store whose saves can be switched to fail
struct SwitchableStore {
    inner: SqliteStore,
    failing: AtomicBool,
}

#[async_trait]
impl StoreGateway for SwitchableStore {
    async fn save(&self, records: &[NewRecord]) -> Result<Vec<ProcessedRecord>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Task("disk full".to_string()));
        }
        self.inner.save(records).await
    }

    async fn get(&self, id: i64) -> Result<Option<ProcessedRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<ProcessedRecord>, StoreError> {
        self.inner.list().await
    }

    async fn update(
        &self,
        id: i64,
        record: &NewRecord,
    ) -> Result<Option<ProcessedRecord>, StoreError> {
        self.inner.update(id, record).await
    }

    async fn delete(&self, id: i64) -> Result<Option<ProcessedRecord>, StoreError> {
        self.inner.delete(id).await
    }

    fn backend_type(&self) -> &'static str {
        "Switchable"
    }
}

struct Hub {
    addr: SocketAddr,
    store: Arc<SwitchableStore>,
    shutdown: watch::Sender<bool>,
}

impl Hub {
    fn client(&self) -> HttpStoreClient {
        HttpStoreClient::with_base_url(&format!("http://{}", self.addr), Duration::from_secs(5))
            .unwrap()
    }
}

async fn start_hub() -> Hub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let store = Arc::new(SwitchableStore {
        inner: SqliteStore::open_in_memory().unwrap(),
        failing: AtomicBool::new(false),
    });
    let metrics = Arc::new(Metrics::new());
    let state = ApiState {
        store: store.clone(),
        registry: Arc::new(SubscriptionRegistry::with_metrics(metrics.clone())),
        metrics,
        listener_queue: 8,
        agent: "hub".to_string(),
    };
    let (shutdown, rx) = watch::channel(false);
    tokio::spawn(async move {
        start_api_server(listener, state, rx).await.unwrap();
    });
    Hub { addr, store, shutdown }
}

fn sample(x: f64, z: f64) -> AggregatedData {
    let gps = GpsSample::new(50.45, 30.52);
    AggregatedData {
        accelerometer: AccelerometerSample::new(x, -1.0, z),
        gps,
        parking: ParkingSample::new(3.0, gps),
        captured_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        user_id: UserId(4),
    }
}

#[tokio::test]
async fn test_client_crud_against_hub() {
    let hub = start_hub().await;
    let client = hub.client();

    let saved = client
        .save(&[NewRecord::from_sample("normal", &sample(1.0, 16500.0))])
        .await
        .unwrap();
    assert_eq!(saved.len(), 1);
    let id = saved[0].id;
    assert_eq!(saved[0].user_id, UserId(4));
    assert_eq!(saved[0].x, 1.0);

    assert_eq!(client.get(id).await.unwrap(), Some(saved[0].clone()));
    assert_eq!(client.get(id + 999).await.unwrap(), None);
    assert_eq!(client.list().await.unwrap(), saved);

    let replacement = NewRecord::from_sample("pothole", &sample(2.0, 9000.0));
    let updated = client.update(id, &replacement).await.unwrap().unwrap();
    assert_eq!(updated.id, id);
    assert_eq!(updated.road_state, "pothole");
    assert!(updated.same_fields(&replacement));
    assert_eq!(client.update(id + 999, &replacement).await.unwrap(), None);

    assert_eq!(client.delete(id).await.unwrap(), Some(updated));
    assert_eq!(client.delete(id).await.unwrap(), None);
    assert!(client.list().await.unwrap().is_empty());

    hub.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_client_maps_error_status_to_rejected() {
    let hub = start_hub().await;
    hub.store.failing.store(true, Ordering::SeqCst);

    let client = hub.client();
    let result = client.save(&[NewRecord::from_sample("normal", &sample(1.0, 16500.0))]).await;
    assert!(matches!(result, Err(StoreError::Rejected { status: 500 })));

    let wrong_prefix = HttpStoreClient::with_base_url(
        &format!("http://{}/v2", hub.addr),
        Duration::from_secs(5),
    )
    .unwrap();
    assert!(matches!(wrong_prefix.list().await, Err(StoreError::Rejected { status: 404 })));

    hub.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_rejected_save_is_retained_then_resubmitted() {
    let hub = start_hub().await;
    hub.store.failing.store(true, Ordering::SeqCst);

    let mut buffer = BatchBuffer::new(
        BatchPolicy { batch_size: 2, flush_interval: None, max_buffered: 100 },
        Arc::new(hub.client()),
        Arc::new(ZAxisClassifier::new(16500.0, 2000.0, 5000.0)),
        Arc::new(SubscriptionRegistry::new()),
        Arc::new(Metrics::new()),
    );

    buffer.push(sample(1.0, 16500.0)).unwrap();
    buffer.push(sample(2.0, 16500.0)).unwrap();
    assert_eq!(buffer.maybe_flush().await, FlushOutcome::Retained(2));
    assert_eq!(buffer.len(), 2);
    assert!(hub.store.list().await.unwrap().is_empty());

    hub.store.failing.store(false, Ordering::SeqCst);
    buffer.push(sample(3.0, 16500.0)).unwrap();
    assert_eq!(buffer.maybe_flush().await, FlushOutcome::Saved(3));
    assert!(buffer.is_empty());

    let xs: Vec<f64> = hub.store.list().await.unwrap().iter().map(|r| r.x).collect();
    assert_eq!(xs, vec![1.0, 2.0, 3.0]);

    hub.shutdown.send(true).unwrap();
}

//! Batch buffer - accumulates aggregated samples and saves them in batches
//!
//! A flush classifies the whole buffered batch, hands it to the store
//! gateway, and on success publishes every saved record to the subscription
//! registry. A failed save keeps the batch; the next flush re-submits it
//! together with anything pushed since, so no sample is silently lost.

use crate::domain::record::NewRecord;
use crate::domain::types::AggregatedData;
use crate::error::PipelineError;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::classifier::RoadClassifier;
use crate::services::store_gateway::StoreGateway;
use crate::services::subscription::SubscriptionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Flush triggers and the retention cap
#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    /// Flush once this many samples are buffered
    pub batch_size: usize,
    /// Flush a non-empty buffer this long after the last flush (None = size only)
    pub flush_interval: Option<Duration>,
    /// Retained samples at which the pipeline gives up
    pub max_buffered: usize,
}

impl BatchPolicy {
    pub fn from_config(config: &Config) -> Self {
        let flush_interval = match config.flush_interval_ms() {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        Self { batch_size: config.batch_size(), flush_interval, max_buffered: config.max_buffered() }
    }
}

/// Result of one flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No trigger fired (or nothing buffered)
    Idle,
    /// Batch saved and published
    Saved(usize),
    /// Save failed; this many samples are still buffered
    Retained(usize),
}

pub struct BatchBuffer {
    samples: Vec<AggregatedData>,
    policy: BatchPolicy,
    last_flush: Instant,
    store: Arc<dyn StoreGateway>,
    classifier: Arc<dyn RoadClassifier>,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<Metrics>,
}

impl BatchBuffer {
    pub fn new(
        policy: BatchPolicy,
        store: Arc<dyn StoreGateway>,
        classifier: Arc<dyn RoadClassifier>,
        registry: Arc<SubscriptionRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            samples: Vec::with_capacity(policy.batch_size),
            policy,
            last_flush: Instant::now(),
            store,
            classifier,
            registry,
            metrics,
        }
    }

    /// Append a sample in arrival order
    ///
    /// Fails only when earlier saves have kept failing and the retained
    /// batch already holds `max_buffered` samples.
    pub fn push(&mut self, sample: AggregatedData) -> Result<(), PipelineError> {
        if self.samples.len() >= self.policy.max_buffered {
            return Err(PipelineError::BufferOverflow {
                buffered: self.samples.len(),
                cap: self.policy.max_buffered,
            });
        }
        self.samples.push(sample);
        self.metrics.set_buffered_samples(self.samples.len());
        Ok(())
    }

    fn should_flush(&self) -> bool {
        if self.samples.len() >= self.policy.batch_size {
            return true;
        }
        match self.policy.flush_interval {
            Some(interval) => !self.samples.is_empty() && self.last_flush.elapsed() >= interval,
            None => false,
        }
    }

    /// Flush iff the size (or time) trigger has fired
    pub async fn maybe_flush(&mut self) -> FlushOutcome {
        if self.should_flush() {
            self.flush().await
        } else {
            FlushOutcome::Idle
        }
    }

    /// Classify, save and publish the whole buffered batch
    pub async fn flush(&mut self) -> FlushOutcome {
        if self.samples.is_empty() {
            return FlushOutcome::Idle;
        }

        let road_state = self.classifier.classify(&self.samples);
        let records: Vec<NewRecord> =
            self.samples.iter().map(|s| NewRecord::from_sample(&road_state, s)).collect();

        let started = std::time::Instant::now();
        let result = self.store.save(&records).await;
        let latency_us = started.elapsed().as_micros() as u64;
        self.last_flush = Instant::now();

        match result {
            Ok(saved) => {
                let count = saved.len();
                self.samples.clear();
                self.metrics.set_buffered_samples(0);
                self.metrics.record_save(count, latency_us);
                debug!(
                    count = count,
                    road_state = %road_state,
                    backend = self.store.backend_type(),
                    latency_us = latency_us,
                    "batch_saved"
                );
                self.registry.publish_all(&saved);
                FlushOutcome::Saved(count)
            }
            Err(e) => {
                self.metrics.record_save_failure(latency_us);
                warn!(
                    error = %e,
                    retained = self.samples.len(),
                    backend = self.store.backend_type(),
                    "batch_save_failed_retained"
                );
                FlushOutcome::Retained(self.samples.len())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Log what is left at shutdown
    pub fn log_remaining(&self) {
        if !self.samples.is_empty() {
            warn!(retained = self.samples.len(), "batch_buffer_unsaved_at_shutdown");
        } else {
            info!("batch_buffer_drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::ProcessedRecord;
    use crate::domain::types::{AccelerometerSample, GpsSample, ParkingSample, UserId};
    use crate::error::StoreError;
    use crate::io::sqlite_store::SqliteStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// SQLite store that fails a configurable number of saves first
    struct FlakyStore {
        inner: SqliteStore,
        failures_left: AtomicUsize,
        save_sizes: Mutex<Vec<usize>>,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                failures_left: AtomicUsize::new(failures),
                save_sizes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StoreGateway for FlakyStore {
        async fn save(&self, records: &[NewRecord]) -> Result<Vec<ProcessedRecord>, StoreError> {
            self.save_sizes.lock().push(records.len());
            let fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(StoreError::Task("injected failure".to_string()));
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
            "Flaky"
        }
    }

    fn sample(x: f64) -> AggregatedData {
        let gps = GpsSample::new(50.45, 30.52);
        AggregatedData {
            accelerometer: AccelerometerSample::new(x, 0.0, 16500.0),
            gps,
            parking: ParkingSample::new(2.0, gps),
            captured_at: Utc::now(),
            user_id: UserId(7),
        }
    }

    fn policy(batch_size: usize, max_buffered: usize) -> BatchPolicy {
        BatchPolicy { batch_size, flush_interval: None, max_buffered }
    }

    fn buffer(
        policy: BatchPolicy,
        store: Arc<FlakyStore>,
        registry: Arc<SubscriptionRegistry>,
    ) -> BatchBuffer {
        let classifier = |_: &[AggregatedData]| "normal".to_string();
        BatchBuffer::new(policy, store, Arc::new(classifier), registry, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn test_no_save_below_threshold() {
        let store = Arc::new(FlakyStore::new(0));
        let mut buf = buffer(policy(3, 100), store.clone(), Arc::new(SubscriptionRegistry::new()));

        for x in 0..2 {
            buf.push(sample(x as f64)).unwrap();
            assert_eq!(buf.maybe_flush().await, FlushOutcome::Idle);
        }
        assert!(store.save_sizes.lock().is_empty());
        assert_eq!(buf.len(), 2);
    }

    #[tokio::test]
    async fn test_threshold_saves_in_push_order() {
        let store = Arc::new(FlakyStore::new(0));
        let mut buf = buffer(policy(3, 100), store.clone(), Arc::new(SubscriptionRegistry::new()));

        let mut outcome = FlushOutcome::Idle;
        for x in 1..=3 {
            buf.push(sample(x as f64)).unwrap();
            outcome = buf.maybe_flush().await;
        }

        assert_eq!(outcome, FlushOutcome::Saved(3));
        assert_eq!(*store.save_sizes.lock(), vec![3]);
        assert!(buf.is_empty());
        let xs: Vec<f64> = store.list().await.unwrap().iter().map(|r| r.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_failed_save_retains_and_resubmits_union() {
        let store = Arc::new(FlakyStore::new(1));
        let mut buf = buffer(policy(3, 100), store.clone(), Arc::new(SubscriptionRegistry::new()));

        for x in 1..=3 {
            buf.push(sample(x as f64)).unwrap();
            buf.maybe_flush().await;
        }
        assert_eq!(buf.len(), 3);

        buf.push(sample(4.0)).unwrap();
        assert_eq!(buf.maybe_flush().await, FlushOutcome::Saved(4));

        assert_eq!(*store.save_sizes.lock(), vec![3, 4]);
        let xs: Vec<f64> = store.list().await.unwrap().iter().map(|r| r.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_overflow_is_fatal() {
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let mut buf = buffer(policy(2, 4), store, Arc::new(SubscriptionRegistry::new()));

        for x in 0..4 {
            buf.push(sample(x as f64)).unwrap();
            buf.maybe_flush().await;
        }
        let err = buf.push(sample(9.0)).unwrap_err();
        assert!(matches!(err, PipelineError::BufferOverflow { buffered: 4, cap: 4 }));
        assert_eq!(buf.len(), 4);
    }

    #[tokio::test]
    async fn test_successful_save_publishes_each_record() {
        let store = Arc::new(FlakyStore::new(0));
        let registry = Arc::new(SubscriptionRegistry::new());
        let (listener, mut rx) = registry.listener(16);
        registry.subscribe(UserId(7), &listener);
        let mut buf = buffer(policy(2, 100), store, registry);

        buf.push(sample(1.0)).unwrap();
        buf.push(sample(2.0)).unwrap();
        buf.maybe_flush().await;

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!((first.x, second.x), (1.0, 2.0));
        assert!(second.id > first.id);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_save_publishes_nothing() {
        let store = Arc::new(FlakyStore::new(1));
        let registry = Arc::new(SubscriptionRegistry::new());
        let (listener, mut rx) = registry.listener(16);
        registry.subscribe(UserId(7), &listener);
        let mut buf = buffer(policy(1, 100), store, registry);

        buf.push(sample(1.0)).unwrap();
        assert_eq!(buf.maybe_flush().await, FlushOutcome::Retained(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_time_trigger_flushes_partial_batch() {
        let store = Arc::new(FlakyStore::new(0));
        let policy = BatchPolicy {
            batch_size: 100,
            flush_interval: Some(Duration::from_millis(200)),
            max_buffered: 1000,
        };
        let mut buf = buffer(policy, store.clone(), Arc::new(SubscriptionRegistry::new()));

        buf.push(sample(1.0)).unwrap();
        assert_eq!(buf.maybe_flush().await, FlushOutcome::Idle);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(buf.maybe_flush().await, FlushOutcome::Saved(1));
        assert_eq!(*store.save_sizes.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_classifier_label_attached_to_every_record() {
        let store = Arc::new(FlakyStore::new(0));
        let classifier = crate::services::classifier::ZAxisClassifier::new(16500.0, 1500.0, 4000.0);
        let mut buf = BatchBuffer::new(
            policy(2, 100),
            store.clone(),
            Arc::new(classifier),
            Arc::new(SubscriptionRegistry::new()),
            Arc::new(Metrics::new()),
        );

        buf.push(sample(1.0)).unwrap();
        let mut bump = sample(2.0);
        bump.accelerometer.z = 11000.0;
        buf.push(bump).unwrap();
        buf.maybe_flush().await;

        let states: Vec<String> =
            store.list().await.unwrap().into_iter().map(|r| r.road_state).collect();
        assert_eq!(states, vec!["pothole", "pothole"]);
    }
}

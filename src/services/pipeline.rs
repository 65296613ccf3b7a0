//! Producer pipeline - sources → aggregator → batch buffer
//!
//! Runs on its own schedule until shutdown is signalled or a fatal error
//! occurs. Either way the buffer gets one last flush attempt and the three
//! sources are closed before `run` returns.

use crate::error::PipelineError;
use crate::infra::metrics::Metrics;
use crate::services::aggregator::Aggregator;
use crate::services::batch_buffer::{BatchBuffer, FlushOutcome};
use std::fs::File;
use std::io::{Read, Seek};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub struct Pipeline<R = File> {
    aggregator: Aggregator<R>,
    buffer: BatchBuffer,
    metrics: Arc<Metrics>,
    tick_interval: Duration,
}

impl<R: Read + Seek> Pipeline<R> {
    /// `tick_interval` of zero runs back-to-back ticks, yielding between them
    pub fn new(
        aggregator: Aggregator<R>,
        buffer: BatchBuffer,
        metrics: Arc<Metrics>,
        tick_interval: Duration,
    ) -> Self {
        Self { aggregator, buffer, metrics, tick_interval }
    }

    /// One tick: read → push → maybe_flush
    pub async fn step(&mut self) -> Result<FlushOutcome, PipelineError> {
        let sample = self.aggregator.read()?;
        self.metrics.record_sample();
        self.buffer.push(sample)?;
        Ok(self.buffer.maybe_flush().await)
    }

    /// Tick until shutdown; returns the fatal error if one stopped the loop
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        info!(
            user_id = %self.aggregator.user_id(),
            tick_ms = self.tick_interval.as_millis() as u64,
            "pipeline_started"
        );

        let result = self.run_loop(&mut shutdown).await;
        if let Err(e) = &result {
            error!(error = %e, "pipeline_fatal_error");
        }

        let outcome = self.buffer.flush().await;
        self.buffer.log_remaining();
        self.aggregator.close();
        info!(final_flush = ?outcome, "pipeline_stopped");
        result
    }

    async fn run_loop(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), PipelineError> {
        if self.tick_interval.is_zero() {
            while !*shutdown.borrow() {
                self.step().await?;
                tokio::task::yield_now().await;
            }
            return Ok(());
        }

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.step().await?;
                }
                changed = shutdown.changed() => {
                    // Sender dropped counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::UserId;
    use crate::error::SourceError;
    use crate::io::csv_source::ReplayableSource;
    use crate::io::sqlite_store::SqliteStore;
    use crate::services::batch_buffer::BatchPolicy;
    use crate::services::store_gateway::StoreGateway;
    use crate::services::subscription::SubscriptionRegistry;
    use std::io::Cursor;

    fn cursor(text: &str) -> Cursor<Vec<u8>> {
        Cursor::new(text.as_bytes().to_vec())
    }

    fn aggregator(acc: &str) -> Aggregator<Cursor<Vec<u8>>> {
        Aggregator::new(
            ReplayableSource::from_reader(cursor(acc), "acc.csv").unwrap(),
            ReplayableSource::from_reader(cursor("lon,lat\n30.5,50.4\n30.6,50.5\n"), "gps.csv")
                .unwrap(),
            ReplayableSource::from_reader(cursor("empty_count\n3\n4\n"), "parking.csv").unwrap(),
            UserId(5),
        )
    }

    fn pipeline(
        acc: &str,
        store: Arc<SqliteStore>,
        tick: Duration,
    ) -> Pipeline<Cursor<Vec<u8>>> {
        let metrics = Arc::new(Metrics::new());
        let policy = BatchPolicy { batch_size: 2, flush_interval: None, max_buffered: 100 };
        let buffer = BatchBuffer::new(
            policy,
            store,
            Arc::new(|_: &[crate::domain::types::AggregatedData]| "normal".to_string()),
            Arc::new(SubscriptionRegistry::new()),
            metrics.clone(),
        );
        Pipeline::new(aggregator(acc), buffer, metrics, tick)
    }

    #[tokio::test]
    async fn test_steps_save_every_second_tick() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let acc = "x,y,z\n1,0,16500\n2,0,16500\n3,0,16500\n";
        let mut pipeline = pipeline(acc, store.clone(), Duration::ZERO);

        assert_eq!(pipeline.step().await.unwrap(), FlushOutcome::Idle);
        assert_eq!(pipeline.step().await.unwrap(), FlushOutcome::Saved(2));
        assert_eq!(pipeline.step().await.unwrap(), FlushOutcome::Idle);
        assert_eq!(pipeline.buffered(), 1);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remainder() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let pipeline = pipeline(
            "x,y,z\n1,0,16500\n2,0,16500\n3,0,16500\n",
            store.clone(),
            Duration::from_millis(5),
        );
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(pipeline.run(rx));
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // Every sample read before shutdown is persisted, including a partial batch
        let rows = store.list().await.unwrap();
        assert!(rows.len() >= 3);
        assert!(rows.iter().all(|r| r.user_id == UserId(5)));
    }

    #[tokio::test]
    async fn test_fatal_source_error_stops_run() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        // Single data row cannot survive the wraparound skip
        let pipeline = pipeline("x,y,z\n1,0,16500\n", store.clone(), Duration::ZERO);
        let (_tx, rx) = watch::channel(false);

        let err = pipeline.run(rx).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Source(SourceError::ExhaustedAfterSkip { stream: "accelerometer" })
        ));
        // The one sample read before the failure still gets saved
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}

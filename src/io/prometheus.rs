//! Prometheus text exposition of pipeline and live-feed metrics
//!
//! Served at `/metrics` by the HTTP API. Only monotonic counters, gauges and
//! the cumulative save-latency histogram are exposed, so scraping does not
//! disturb the periodic log report.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with agent label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    agent: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{agent=\"{agent}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    agent: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{agent=\"{agent}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{agent=\"{agent}\",le=\"+Inf\"}} {cumulative}");

    let _ = writeln!(output, "{name}_sum{{agent=\"{agent}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{agent=\"{agent}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(summary: &MetricsSummary, agent: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_pipeline_metrics(&mut output, agent, summary);
    write_store_metrics(&mut output, agent, summary);
    write_live_feed_metrics(&mut output, agent, summary);

    output
}

/// Snapshot `metrics` and format it
pub fn render(metrics: &Metrics, agent: &str) -> String {
    format_prometheus_metrics(&metrics.snapshot(), agent)
}

fn write_pipeline_metrics(output: &mut String, agent: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "telemetry_samples_total",
        "Aggregated samples pushed into the batch buffer",
        MetricType::Counter,
        agent,
        summary.samples_total,
    );
    write_metric(
        output,
        "telemetry_buffered_samples",
        "Samples currently held by the batch buffer",
        MetricType::Gauge,
        agent,
        summary.buffered_samples,
    );
}

fn write_store_metrics(output: &mut String, agent: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "telemetry_batches_saved_total",
        "Batches saved by the store gateway",
        MetricType::Counter,
        agent,
        summary.batches_saved,
    );
    write_metric(
        output,
        "telemetry_records_saved_total",
        "Records persisted by successful saves",
        MetricType::Counter,
        agent,
        summary.records_saved,
    );
    write_metric(
        output,
        "telemetry_save_failures_total",
        "Failed save attempts (batch retained)",
        MetricType::Counter,
        agent,
        summary.save_failures,
    );
    write_histogram(
        output,
        "telemetry_save_latency_us",
        "Store save call latency in microseconds",
        agent,
        &summary.save_latency_total_buckets,
        summary.save_latency_total_sum_us,
    );
    write_metric(
        output,
        "telemetry_submissions_accepted_total",
        "Submissions stored through the HTTP API",
        MetricType::Counter,
        agent,
        summary.submissions_accepted,
    );
    write_metric(
        output,
        "telemetry_submissions_rejected_total",
        "Submissions rejected by validation",
        MetricType::Counter,
        agent,
        summary.submissions_rejected,
    );
}

fn write_live_feed_metrics(output: &mut String, agent: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "telemetry_records_published_total",
        "Records offered to an identity with live listeners",
        MetricType::Counter,
        agent,
        summary.records_published,
    );
    write_metric(
        output,
        "telemetry_listener_send_failures_total",
        "Deliveries that failed and removed the listener",
        MetricType::Counter,
        agent,
        summary.listener_send_failures,
    );
    write_metric(
        output,
        "telemetry_active_listeners",
        "Connected live-feed listeners",
        MetricType::Gauge,
        agent,
        summary.active_listeners,
    );
    write_metric(
        output,
        "telemetry_live_sessions_total",
        "Live-feed sessions opened",
        MetricType::Counter,
        agent,
        summary.live_sessions_total,
    );
}

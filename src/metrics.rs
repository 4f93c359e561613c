//! Observability hooks.
//!
//! With the `metrics` feature a global [`METRICS`] registry counts
//! statements, failures, latency and eager-load batches through
//! OpenTelemetry with a Prometheus exporter. With the `tracing` feature
//! [`tracing_helpers`] provides the spans opened by drivers and the
//! eager-loading resolver.

#[cfg(feature = "metrics")]
pub use self::otel::{EntgraphMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
        KeyValue,
    };
    use opentelemetry_prometheus::PrometheusExporter;
    use std::time::Duration;

    pub static METRICS: Lazy<EntgraphMetrics> = Lazy::new(EntgraphMetrics::init);

    pub struct EntgraphMetrics {
        pub exporter: PrometheusExporter,
        pub statements_total: Counter<u64>,
        pub statement_errors_total: Counter<u64>,
        pub statement_duration: Histogram<f64>,
        pub eager_batches_total: Counter<u64>,
    }

    impl EntgraphMetrics {
        pub fn init() -> Self {
            let exporter = opentelemetry_prometheus::exporter()
                .build()
                .expect("failed to build prometheus exporter");
            let meter = global::meter("entgraph");

            let statements_total = meter
                .u64_counter("entgraph_statements_total")
                .with_description("Total statements executed")
                .build();

            let statement_errors_total = meter
                .u64_counter("entgraph_statement_errors_total")
                .with_description("Statements that returned an error")
                .build();

            let statement_duration = meter
                .f64_histogram("entgraph_statement_duration_seconds")
                .with_description("Duration of statements")
                .build();

            let eager_batches_total = meter
                .u64_counter("entgraph_eager_batches_total")
                .with_description("Batched edge loads issued by eager loading")
                .build();

            Self {
                exporter,
                statements_total,
                statement_errors_total,
                statement_duration,
                eager_batches_total,
            }
        }

        pub fn record_statement(&self, elapsed: Duration) {
            self.statements_total.add(1, &[]);
            self.statement_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_statement_error(&self) {
            self.statement_errors_total.add(1, &[]);
        }

        pub fn record_eager_batch(&self, edge: &'static str) {
            self.eager_batches_total.add(1, &[KeyValue::new("edge", edge)]);
        }
    }
}

/// Spans opened around driver calls and edge loads.
#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn execute_statement_span(sql: &str) -> Span {
        info_span!("entgraph.statement", db.statement = %sql)
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("entgraph.tx.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("entgraph.tx.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("entgraph.tx.rollback")
    }

    pub fn eager_load_span(edge: &str, parents: usize) -> Span {
        info_span!("entgraph.eager_load", edge = %edge, parents)
    }
}

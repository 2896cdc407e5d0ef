use actix_web::{HttpResponse, Responder};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, TextEncoder};

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help))
        .unwrap_or_else(|e| panic!("invalid metric opts for {name}: {e}"));
    if let Err(e) = prometheus::default_registry().register(Box::new(counter.clone())) {
        tracing::warn!("failed to register metric {}: {}", name, e);
    }
    counter
}

pub static MESSAGES_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "delivery_messages_submitted_total",
        "Messages accepted by the coordinator (validated, parties verified)",
    )
});

pub static MESSAGES_ACKNOWLEDGED: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "delivery_messages_acknowledged_total",
        "Messages confirmed by the broker and acknowledged to the caller",
    )
});

pub static MESSAGES_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "delivery_messages_failed_total",
        "Messages that ended in the Failed state",
    )
});

pub static PUBLISH_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "delivery_publish_retries_total",
        "Transient publish failures that were retried",
    )
});

pub static DUPLICATES_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "delivery_duplicates_skipped_total",
        "Inbound records skipped by the dispatcher dedup window",
    )
});

pub static RECORDS_DELIVERED: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "delivery_records_delivered_total",
        "Inbound records handed to the delivery callback successfully",
    )
});

pub static INFLIGHT_PUBLISHES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::with_opts(Opts::new(
        "delivery_inflight_publishes",
        "Publish attempts currently in flight (including retry waits)",
    ))
    .expect("valid metric opts for delivery_inflight_publishes");
    if let Err(e) = prometheus::default_registry().register(Box::new(gauge.clone())) {
        tracing::warn!("failed to register metric delivery_inflight_publishes: {}", e);
    }
    gauge
});

pub async fn metrics_handler() -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

use actix_web::{HttpResponse, Responder};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

pub static MESSAGES_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "chat_messages_sent_total",
        "Messages persisted by the delivery router",
    )
    .expect("failed to create chat_messages_sent_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_messages_sent_total");
    counter
});

pub static DELIVERY_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_delivery_errors_total",
            "Sends that ended in the Errored state",
        ),
        &["reason"],
    )
    .expect("failed to create chat_delivery_errors_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_delivery_errors_total");
    counter
});

pub static ONLINE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("chat_online_sessions", "Identities with a registered session")
        .expect("failed to create chat_online_sessions");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register chat_online_sessions");
    gauge
});

pub static QUEUE_PUBLISH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_queue_publish_total",
            "Queue publish attempts by outcome (ok, unavailable, failed)",
        ),
        &["outcome"],
    )
    .expect("failed to create chat_queue_publish_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_queue_publish_total");
    counter
});

pub static WS_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("chat_ws_events_total", "Inbound real-time events by name"),
        &["event"],
    )
    .expect("failed to create chat_ws_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_ws_events_total");
    counter
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

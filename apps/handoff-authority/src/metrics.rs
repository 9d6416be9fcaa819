use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static TOKENS_ISSUED: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "handoff_tokens_issued_total",
        "generate requests by outcome",
        "result",
    )
});

pub static REDEMPTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "handoff_redemptions_total",
        "continuation redemptions by outcome",
        "result",
    )
});

pub static STATUS_QUERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "handoff_status_queries_total",
        "status polls by reported status",
        "status",
    )
});

fn counter_vec(name: &str, help: &str, label: &str) -> IntCounterVec {
    let c = IntCounterVec::new(Opts::new(name, help), &[label])
        .unwrap_or_else(|err| panic!("invalid metric definition {name}: {err}"));
    REGISTRY.register(Box::new(c.clone())).ok();
    c
}

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "metrics encode error");
    }
    buffer
}

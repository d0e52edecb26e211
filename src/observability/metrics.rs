//! Metrics collection.
//!
//! # Metrics
//! - `http11_processors_created_total` (counter): processors built, by kind
//! - `http11_negotiation_lookups_total` (counter): ALPN/Upgrade lookups, by channel and result
//! - `http11_unreachable_protocols_total` (counter): protocols dead on their endpoint
//! - `http11_trailers_rejected_total` (counter): trailer fields dropped by the allow-list
//! - `http11_config_reloads_total` (counter): config file reloads, by result
//!
//! # Design Decisions
//! - No exporter is installed here; without a recorder these are no-ops
//! - Labels are small fixed sets

/// Record a newly built processor.
pub fn record_processor_created(kind: &'static str) {
    metrics::counter!("http11_processors_created_total", "kind" => kind).increment(1);
}

/// Record a negotiation lookup on `channel` (`alpn` or `upgrade`).
pub fn record_negotiation(channel: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!(
        "http11_negotiation_lookups_total",
        "channel" => channel,
        "result" => result
    )
    .increment(1);
}

pub fn record_unreachable_protocol() {
    metrics::counter!("http11_unreachable_protocols_total").increment(1);
}

pub fn record_trailers_rejected(count: usize) {
    metrics::counter!("http11_trailers_rejected_total").increment(count as u64);
}

/// Record a config file reload attempt (`applied` or `rejected`).
pub fn record_config_reload(result: &'static str) {
    metrics::counter!("http11_config_reloads_total", "result" => result).increment(1);
}

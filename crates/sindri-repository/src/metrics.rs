/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Metrics Module
//!
//! Prometheus metrics for the schedulers and the deployment engine.

use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder};
use sindri_utils::logging::prelude::*;

/// Global Prometheus registry for all repository metrics
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Scheduler tick counter
/// Labels: scheduler, outcome
pub static SCHEDULER_TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "sindri_scheduler_ticks_total",
        "Total number of scheduler ticks by scheduler and outcome",
    );
    let counter = CounterVec::new(opts, &["scheduler", "outcome"])
        .expect("Failed to create scheduler ticks counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register scheduler ticks counter");
    counter
});

/// Scheduler tick duration histogram
/// Labels: scheduler
pub static SCHEDULER_TICK_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "sindri_scheduler_tick_duration_seconds",
        "Scheduler tick latency distribution in seconds",
    )
    .buckets(vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]);
    let histogram = HistogramVec::new(opts, &["scheduler"])
        .expect("Failed to create scheduler tick duration histogram");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("Failed to register scheduler tick duration histogram");
    histogram
});

/// Tenants skipped because another node held the lock
/// Labels: scheduler
pub static SCHEDULER_LOCK_CONTENDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "sindri_scheduler_lock_contended_total",
        "Total number of tenant ticks skipped due to a held lock",
    );
    let counter = CounterVec::new(opts, &["scheduler"])
        .expect("Failed to create lock contention counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register lock contention counter");
    counter
});

/// Created actions
/// Labels: origin (manual, rollout, auto_assign)
pub static ACTIONS_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "sindri_actions_created_total",
        "Total number of actions created by origin",
    );
    let counter =
        CounterVec::new(opts, &["origin"]).expect("Failed to create actions created counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register actions created counter");
    counter
});

/// Rollout group status transitions
/// Labels: status
pub static ROLLOUT_GROUP_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "sindri_rollout_group_transitions_total",
        "Total number of rollout group transitions by target status",
    );
    let counter = CounterVec::new(opts, &["status"])
        .expect("Failed to create rollout group transitions counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register rollout group transitions counter");
    counter
});

/// Targets assigned through filter query bindings
pub static AUTO_ASSIGNED_TARGETS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "sindri_auto_assigned_targets_total",
        "Total number of targets assigned by auto-assignment",
    );
    let counter =
        IntCounter::with_opts(opts).expect("Failed to create auto assigned targets counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register auto assigned targets counter");
    counter
});

/// Records the outcome and duration of one scheduler tick
pub fn record_tick(scheduler: &str, outcome: &str, duration_secs: f64) {
    SCHEDULER_TICKS_TOTAL
        .with_label_values(&[scheduler, outcome])
        .inc();
    SCHEDULER_TICK_DURATION_SECONDS
        .with_label_values(&[scheduler])
        .observe(duration_secs);
}

pub fn record_lock_contended(scheduler: &str) {
    SCHEDULER_LOCK_CONTENDED_TOTAL
        .with_label_values(&[scheduler])
        .inc();
}

pub fn record_actions_created(origin: &str, count: usize) {
    if count > 0 {
        ACTIONS_CREATED_TOTAL
            .with_label_values(&[origin])
            .inc_by(count as f64);
    }
}

pub fn record_group_transition(status: &str) {
    ROLLOUT_GROUP_TRANSITIONS_TOTAL
        .with_label_values(&[status])
        .inc();
}

/// Encodes all registered metrics in Prometheus text format
///
/// # Returns
///
/// Returns a String containing all metrics in Prometheus exposition format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

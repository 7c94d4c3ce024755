/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Periodic schedulers for rollouts and auto-assignment.
//!
//! Each tick walks all tenants. A tenant is only processed while holding its
//! named lock (`{tenant}:rollout` or `{tenant}:autoassign`), so several nodes
//! sharing a lock registry never advance the same tenant at once. Work items
//! are listed as the tenant's system context and each one is then processed
//! in the context captured by its author.
//!
//! A failing item is logged and counted; it never aborts the tick.

use crate::context::CallerContext;
use crate::dal::DAL;
use crate::errors::Result;
use crate::metrics;
use crate::ql::Predicate;
use crate::store::lock::LockService;
use sindri_models::models::RolloutStatus;
use sindri_utils::config::ReloadableConfig;
use sindri_utils::telemetry::prelude::*;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

pub const ROLLOUT_SCHEDULER: &str = "rollout";
pub const AUTO_ASSIGN_SCHEDULER: &str = "autoassign";

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tenants: usize,
    pub processed: usize,
    pub failed: usize,
    /// Tenants whose lock was held elsewhere.
    pub skipped_tenants: usize,
}

/// Advances every active rollout of every tenant by one step.
pub fn run_rollout_tick(dal: &DAL, locks: &LockService) -> Result<TickReport> {
    let active = Predicate::in_values(
        "status",
        RolloutStatus::SCHEDULED.iter().map(|s| s.as_str()),
    )
    .and(Predicate::equals("deleted", false));

    for_each_tenant(ROLLOUT_SCHEDULER, dal, locks, |ctx, report| {
        let rollouts = dal.store.rollouts.find_all(ctx.tenant(), &active)?;
        let executor = dal.rollout_executor();
        for rollout in rollouts {
            let span = info_span!("rollout", tenant = %rollout.tenant, rollout_id = rollout.id);
            let _entered = span.enter();
            let outcome = executor.execute(&rollout);
            record_item(report, ROLLOUT_SCHEDULER, &format!("rollout {}", rollout.id), outcome);
        }
        Ok(())
    })
}

/// Evaluates every auto-assign binding of every tenant once.
pub fn run_auto_assign_tick(dal: &DAL, locks: &LockService) -> Result<TickReport> {
    for_each_tenant(AUTO_ASSIGN_SCHEDULER, dal, locks, |ctx, report| {
        let queries = dal.target_filter_queries(ctx).find_with_auto_assign()?;
        let checker = dal.auto_assign();
        for query in queries {
            let span = info_span!("auto_assign", tenant = %query.tenant, query_id = query.id);
            let _entered = span.enter();
            let outcome = checker.check_query(&query).map(|assigned| {
                if assigned > 0 {
                    debug!(assigned, "auto-assignment created actions");
                }
            });
            record_item(
                report,
                AUTO_ASSIGN_SCHEDULER,
                &format!("filter query {}", query.id),
                outcome,
            );
        }
        Ok(())
    })
}

/// Spawns the rollout scheduler loop, or returns `None` when it is disabled.
pub fn start_rollout_scheduler(
    dal: DAL,
    locks: LockService,
    config: ReloadableConfig,
) -> Option<JoinHandle<()>> {
    let task = config.static_config().scheduler.rollout.clone();
    if !task.enabled {
        info!("Rollout scheduler disabled");
        return None;
    }
    let locks = locks.with_ttl(chrono::Duration::milliseconds(task.lock_ttl_ms as i64));
    info!(
        "Starting rollout scheduler (interval: {}ms, lock ttl: {}ms)",
        config.rollout_interval_ms(),
        task.lock_ttl_ms
    );

    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(config.rollout_interval_ms())).await;
            log_tick(ROLLOUT_SCHEDULER, run_rollout_tick(&dal, &locks));
        }
    }))
}

/// Spawns the auto-assign scheduler loop, or returns `None` when it is disabled.
pub fn start_auto_assign_scheduler(
    dal: DAL,
    locks: LockService,
    config: ReloadableConfig,
) -> Option<JoinHandle<()>> {
    let task = config.static_config().scheduler.auto_assign.clone();
    if !task.enabled {
        info!("Auto-assign scheduler disabled");
        return None;
    }
    let locks = locks.with_ttl(chrono::Duration::milliseconds(task.lock_ttl_ms as i64));
    info!(
        "Starting auto-assign scheduler (interval: {}ms, lock ttl: {}ms)",
        config.auto_assign_interval_ms(),
        task.lock_ttl_ms
    );

    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(config.auto_assign_interval_ms())).await;
            log_tick(AUTO_ASSIGN_SCHEDULER, run_auto_assign_tick(&dal, &locks));
        }
    }))
}

/// Runs `work` for each tenant whose lock could be taken.
fn for_each_tenant<F>(
    scheduler: &'static str,
    dal: &DAL,
    locks: &LockService,
    mut work: F,
) -> Result<TickReport>
where
    F: FnMut(&CallerContext, &mut TickReport) -> Result<()>,
{
    let started = Instant::now();
    let mut report = TickReport::default();

    for tenant in dal.store.tenants()? {
        report.tenants += 1;
        let lock = match locks.try_lock(&tenant, scheduler) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                debug!(tenant = %tenant, scheduler, "lock held by another node, skipping tenant");
                metrics::record_lock_contended(scheduler);
                report.skipped_tenants += 1;
                continue;
            }
            Err(e) => {
                error!(tenant = %tenant, scheduler, "failed to acquire lock: {}", e);
                report.skipped_tenants += 1;
                continue;
            }
        };

        let ctx = CallerContext::system(&tenant);
        if let Err(e) = work(&ctx, &mut report) {
            error!(tenant = %tenant, scheduler, "failed to list work: {}", e);
            report.failed += 1;
        }
        if let Err(e) = lock.release() {
            warn!(tenant = %tenant, scheduler, "failed to release lock: {}", e);
        }
    }

    let outcome = if report.failed == 0 { "ok" } else { "partial" };
    metrics::record_tick(scheduler, outcome, started.elapsed().as_secs_f64());
    Ok(report)
}

fn record_item(report: &mut TickReport, scheduler: &str, item: &str, outcome: Result<()>) {
    match outcome {
        Ok(()) => report.processed += 1,
        Err(e) if e.is_retryable() => {
            report.failed += 1;
            warn!(scheduler, "{} hit a conflict, retry next tick: {}", item, e);
        }
        Err(e) => {
            report.failed += 1;
            error!(scheduler, "{} failed: {}", item, e);
        }
    }
}

fn log_tick(scheduler: &str, result: Result<TickReport>) {
    match result {
        Ok(report) if report.processed + report.failed > 0 => debug!(
            scheduler,
            tenants = report.tenants,
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped_tenants,
            "tick finished"
        ),
        Ok(_) => trace!(scheduler, "tick finished without work"),
        Err(e) => {
            metrics::record_tick(scheduler, "error", 0.0);
            error!(scheduler, "tick failed: {}", e);
        }
    }
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Test fixture for the repository integration tests.
//!
//! Every fixture owns a fresh in-memory store, a manual clock and a lock
//! service sharing that clock, so tests never interfere with each other.

use chrono::{TimeZone, Utc};
use sindri_models::models::{
    Action, ActionStatus, DistributionSet, DistributionSetType, NewDistributionSet,
    NewDistributionSetType, NewTarget, NewTargetType, Target, TargetType,
};
use sindri_repository::scheduler::{self, TickReport};
use sindri_repository::store::{InMemoryLockRegistry, LockService};
use sindri_repository::utils::ManualClock;
use sindri_repository::{CallerContext, Store, DAL};
use sindri_utils::config::Repository;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const TENANT: &str = "default";

pub struct TestFixture {
    pub dal: DAL,
    pub clock: Arc<ManualClock>,
    pub locks: LockService,
    pub system: CallerContext,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_settings(Repository::default())
    }

    pub fn with_settings(settings: Repository) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
        ));
        let dal = DAL::new(Store::in_memory(), clock.clone(), settings);
        let locks = LockService::new(
            Arc::new(InMemoryLockRegistry::new(clock.clone())),
            chrono::Duration::seconds(30),
        );
        TestFixture {
            dal,
            clock,
            locks,
            system: CallerContext::system(TENANT),
        }
    }

    /// A user context of the test tenant, grants written as `PERMISSION[/scope]`.
    pub fn user(&self, principal: &str, grants: &[&str]) -> CallerContext {
        CallerContext::user_with(TENANT, principal, grants).expect("Failed to build user context")
    }

    pub fn insert_ds_type(&self, key: &str) -> DistributionSetType {
        let new_type = NewDistributionSetType::new(
            key.to_string(),
            format!("{} type", key),
            BTreeSet::new(),
            BTreeSet::new(),
        )
        .expect("Failed to create NewDistributionSetType");
        self.dal
            .distribution_set_types(&self.system)
            .create(new_type)
            .expect("Failed to create distribution set type")
    }

    pub fn insert_distribution_set(&self, name: &str, ds_type_id: i64) -> DistributionSet {
        let new_set = NewDistributionSet::new(name.to_string(), "1.0".to_string(), ds_type_id)
            .expect("Failed to create NewDistributionSet");
        self.dal
            .distribution_sets(&self.system)
            .create(new_set)
            .expect("Failed to create distribution set")
    }

    pub fn insert_target_type(&self, key: &str, compatible: &[i64]) -> TargetType {
        let new_type = NewTargetType::new(key.to_string(), format!("{} devices", key))
            .expect("Failed to create NewTargetType")
            .with_compatible(compatible.iter().copied());
        self.dal
            .target_types(&self.system)
            .create(new_type)
            .expect("Failed to create target type")
    }

    pub fn insert_target(&self, controller_id: &str, target_type_id: Option<i64>) -> Target {
        let mut new_target =
            NewTarget::new(controller_id.to_string(), None).expect("Failed to create NewTarget");
        if let Some(type_id) = target_type_id {
            new_target = new_target.with_type(type_id);
        }
        self.dal
            .targets(&self.system)
            .create(new_target)
            .expect("Failed to create target")
    }

    /// Reports a final status for an action as the controller would.
    pub fn report(&self, action_id: i64, status: ActionStatus) -> Action {
        self.dal
            .deployment(&self.system)
            .add_status(action_id, status, vec!["reported".to_string()])
            .expect("Failed to add action status")
    }

    pub fn actions_of(&self, target_id: i64) -> Vec<Action> {
        self.dal
            .deployment(&self.system)
            .find_actions_by_target(target_id, &Default::default())
            .expect("Failed to find actions")
            .content
    }

    pub fn rollout_tick(&self) -> TickReport {
        scheduler::run_rollout_tick(&self.dal, &self.locks).expect("Rollout tick failed")
    }

    pub fn auto_assign_tick(&self) -> TickReport {
        scheduler::run_auto_assign_tick(&self.dal, &self.locks).expect("Auto-assign tick failed")
    }
}

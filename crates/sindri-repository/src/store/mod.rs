/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Entity store
//!
//! Storage backends implement [`EntityRepository`] per entity type. The
//! repository layer never touches rows directly: every query is a
//! [`Predicate`] evaluated inside the tenant's partition, and every write is
//! checked against the row's optimistic lock `version`.
//!
//! [`InMemoryRepository`] is the bundled backend used for single-node
//! deployments and tests.

use crate::errors::Result;
use crate::ql::Predicate;
use sindri_models::models::{
    Action, DistributionSet, DistributionSetType, Entity, Rollout, RolloutGroup, SoftwareModule,
    SoftwareModuleType, Target, TargetFilterQuery, TargetType,
};
use std::sync::Arc;

pub mod lock;
pub mod memory;

pub use lock::{InMemoryLockRegistry, Lock, LockRegistry, LockService};
pub use memory::InMemoryRepository;

/// Window into a result set, ordered by ascending id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pageable {
    pub offset: usize,
    pub limit: usize,
}

impl Pageable {
    pub fn new(offset: usize, limit: usize) -> Self {
        Pageable { offset, limit }
    }

    pub fn first(limit: usize) -> Self {
        Pageable { offset: 0, limit }
    }

    pub fn unpaged() -> Self {
        Pageable {
            offset: 0,
            limit: usize::MAX,
        }
    }
}

impl Default for Pageable {
    fn default() -> Self {
        Pageable::new(0, 50)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub content: Vec<T>,
    /// Number of matching rows ignoring the window.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            total: self.total,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

/// Tenant partitioned storage of one entity type.
pub trait EntityRepository<T: Entity>: Send + Sync {
    fn find(&self, tenant: &str, predicate: &Predicate, page: &Pageable) -> Result<Page<T>>;

    fn find_all(&self, tenant: &str, predicate: &Predicate) -> Result<Vec<T>> {
        Ok(self.find(tenant, predicate, &Pageable::unpaged())?.content)
    }

    fn get(&self, tenant: &str, id: i64) -> Result<Option<T>>;

    fn count(&self, tenant: &str, predicate: &Predicate) -> Result<usize>;

    /// Stores a new row; assigns `id` and sets `version` to 1.
    fn insert(&self, entity: T) -> Result<T>;

    /// Replaces a row if its stored version equals `entity.version()`.
    ///
    /// Fails with `Conflict` on a version mismatch and `NotFound` when the row
    /// is gone. Returns the row with its incremented version.
    fn save(&self, entity: T) -> Result<T>;

    /// Returns whether a row was removed.
    fn delete(&self, tenant: &str, id: i64) -> Result<bool>;

    /// Tenants owning at least one row.
    fn tenants(&self) -> Result<Vec<String>>;
}

/// One repository per entity type.
#[derive(Clone)]
pub struct Store {
    pub targets: Arc<dyn EntityRepository<Target>>,
    pub target_types: Arc<dyn EntityRepository<TargetType>>,
    pub distribution_sets: Arc<dyn EntityRepository<DistributionSet>>,
    pub distribution_set_types: Arc<dyn EntityRepository<DistributionSetType>>,
    pub software_modules: Arc<dyn EntityRepository<SoftwareModule>>,
    pub software_module_types: Arc<dyn EntityRepository<SoftwareModuleType>>,
    pub actions: Arc<dyn EntityRepository<Action>>,
    pub target_filter_queries: Arc<dyn EntityRepository<TargetFilterQuery>>,
    pub rollouts: Arc<dyn EntityRepository<Rollout>>,
    pub rollout_groups: Arc<dyn EntityRepository<RolloutGroup>>,
}

impl Store {
    pub fn in_memory() -> Self {
        Store {
            targets: Arc::new(InMemoryRepository::new()),
            target_types: Arc::new(InMemoryRepository::new()),
            distribution_sets: Arc::new(InMemoryRepository::new()),
            distribution_set_types: Arc::new(InMemoryRepository::new()),
            software_modules: Arc::new(InMemoryRepository::new()),
            software_module_types: Arc::new(InMemoryRepository::new()),
            actions: Arc::new(InMemoryRepository::new()),
            target_filter_queries: Arc::new(InMemoryRepository::new()),
            rollouts: Arc::new(InMemoryRepository::new()),
            rollout_groups: Arc::new(InMemoryRepository::new()),
        }
    }

    /// Tenants known to any scheduler-relevant repository.
    pub fn tenants(&self) -> Result<Vec<String>> {
        let mut tenants = self.rollouts.tenants()?;
        tenants.extend(self.target_filter_queries.tenants()?);
        tenants.extend(self.targets.tenants()?);
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }
}

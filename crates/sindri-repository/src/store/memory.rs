/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! In-memory [`EntityRepository`] backed by per-tenant ordered maps.

use super::{EntityRepository, Page, Pageable};
use crate::errors::{RepositoryError, Result};
use crate::ql::Predicate;
use sindri_models::models::Entity;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type Partitions<T> = HashMap<String, BTreeMap<i64, T>>;

pub struct InMemoryRepository<T> {
    rows: RwLock<Partitions<T>>,
    sequence: AtomicI64,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        InMemoryRepository {
            rows: RwLock::new(HashMap::new()),
            sequence: AtomicI64::new(0),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Partitions<T>>> {
        self.rows
            .read()
            .map_err(|e| RepositoryError::Store(format!("{} store poisoned: {}", T::KIND, e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Partitions<T>>> {
        self.rows
            .write()
            .map_err(|e| RepositoryError::Store(format!("{} store poisoned: {}", T::KIND, e)))
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityRepository<T> for InMemoryRepository<T> {
    fn find(&self, tenant: &str, predicate: &Predicate, page: &Pageable) -> Result<Page<T>> {
        let rows = self.read()?;
        let matching: Vec<&T> = rows
            .get(tenant)
            .map(|partition| partition.values().filter(|e| predicate.matches(*e)).collect())
            .unwrap_or_default();

        Ok(Page {
            total: matching.len(),
            content: matching
                .into_iter()
                .skip(page.offset)
                .take(page.limit)
                .cloned()
                .collect(),
            offset: page.offset,
            limit: page.limit,
        })
    }

    fn get(&self, tenant: &str, id: i64) -> Result<Option<T>> {
        Ok(self
            .read()?
            .get(tenant)
            .and_then(|partition| partition.get(&id))
            .cloned())
    }

    fn count(&self, tenant: &str, predicate: &Predicate) -> Result<usize> {
        Ok(self
            .read()?
            .get(tenant)
            .map(|partition| partition.values().filter(|e| predicate.matches(*e)).count())
            .unwrap_or(0))
    }

    fn insert(&self, mut entity: T) -> Result<T> {
        let mut rows = self.write()?;
        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        entity.set_id(id);
        entity.set_version(1);
        rows.entry(entity.tenant().to_string())
            .or_default()
            .insert(id, entity.clone());
        Ok(entity)
    }

    fn save(&self, mut entity: T) -> Result<T> {
        let mut rows = self.write()?;
        let stored = rows
            .get_mut(entity.tenant())
            .and_then(|partition| partition.get_mut(&entity.id()))
            .ok_or_else(|| RepositoryError::not_found(T::KIND, entity.id()))?;

        if stored.version() != entity.version() {
            return Err(RepositoryError::Conflict(format!(
                "{} {} was modified concurrently (stored version {}, given {})",
                T::KIND,
                entity.id(),
                stored.version(),
                entity.version()
            )));
        }

        entity.set_version(entity.version() + 1);
        *stored = entity.clone();
        Ok(entity)
    }

    fn delete(&self, tenant: &str, id: i64) -> Result<bool> {
        let mut rows = self.write()?;
        Ok(rows
            .get_mut(tenant)
            .map(|partition| partition.remove(&id).is_some())
            .unwrap_or(false))
    }

    fn tenants(&self) -> Result<Vec<String>> {
        let rows = self.read()?;
        let mut tenants: Vec<String> = rows
            .iter()
            .filter(|(_, partition)| !partition.is_empty())
            .map(|(tenant, _)| tenant.clone())
            .collect();
        tenants.sort();
        Ok(tenants)
    }
}

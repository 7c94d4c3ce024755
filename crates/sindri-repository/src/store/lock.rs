/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Named, lease based locks serializing scheduler work per tenant.
//!
//! Acquisition never blocks: a held lock yields `None` and the caller skips
//! its work until the next tick. Leases expire after their TTL so a crashed
//! holder cannot stall other nodes.

use crate::errors::{RepositoryError, Result};
use crate::utils::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use sindri_utils::logging::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Backend holding lock leases.
pub trait LockRegistry: Send + Sync {
    /// Takes or renews the lease on `key` for `holder`.
    ///
    /// Returns `false` while another holder's lease is unexpired.
    fn try_acquire(&self, key: &str, holder: Uuid, ttl: Duration) -> Result<bool>;

    /// Drops the lease if `holder` still owns it.
    fn release(&self, key: &str, holder: Uuid) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Lease {
    holder: Uuid,
    expires_at: DateTime<Utc>,
}

pub struct InMemoryLockRegistry {
    leases: Mutex<HashMap<String, Lease>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        InMemoryLockRegistry {
            leases: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn leases(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Lease>>> {
        self.leases
            .lock()
            .map_err(|e| RepositoryError::Store(format!("lock registry poisoned: {}", e)))
    }
}

impl LockRegistry for InMemoryLockRegistry {
    fn try_acquire(&self, key: &str, holder: Uuid, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut leases = self.leases()?;
        if let Some(lease) = leases.get(key) {
            if lease.holder != holder && lease.expires_at > now {
                return Ok(false);
            }
        }
        leases.insert(
            key.to_string(),
            Lease {
                holder,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    fn release(&self, key: &str, holder: Uuid) -> Result<()> {
        let mut leases = self.leases()?;
        if leases.get(key).map(|l| l.holder == holder).unwrap_or(false) {
            leases.remove(key);
        }
        Ok(())
    }
}

/// Hands out [`Lock`] guards named `{tenant}:{name}`.
#[derive(Clone)]
pub struct LockService {
    registry: Arc<dyn LockRegistry>,
    ttl: Duration,
}

impl LockService {
    pub fn new(registry: Arc<dyn LockRegistry>, ttl: Duration) -> Self {
        LockService { registry, ttl }
    }

    pub fn with_ttl(&self, ttl: Duration) -> Self {
        LockService {
            registry: self.registry.clone(),
            ttl,
        }
    }

    pub fn try_lock(&self, tenant: &str, name: &str) -> Result<Option<Lock>> {
        let key = format!("{}:{}", tenant, name);
        let holder = Uuid::new_v4();
        if !self.registry.try_acquire(&key, holder, self.ttl)? {
            return Ok(None);
        }
        Ok(Some(Lock {
            key,
            holder,
            registry: self.registry.clone(),
            released: false,
        }))
    }
}

/// A held lock, released explicitly or on drop.
pub struct Lock {
    key: String,
    holder: Uuid,
    registry: Arc<dyn LockRegistry>,
    released: bool,
}

impl Lock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.registry.release(&self.key, self.holder)
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.registry.release(&self.key, self.holder) {
                warn!("Failed to release lock {}: {}", self.key, e);
            }
        }
    }
}

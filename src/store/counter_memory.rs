//! In-process counter store.
//!
//! Backed by `DashMap`; every operation runs under the shard lock of its key,
//! which makes increments atomic across tasks in one process. Expiry is
//! evaluated lazily against the injected clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::{CounterStore, StoreError, StoreResult};
use crate::utils::{SharedClock, SystemClock};

#[derive(Debug, Clone)]
enum SlotValue {
    Counter(i64),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: SlotValue,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Counter store for single-process deployments and tests
#[derive(Debug)]
pub struct InMemoryCounterStore {
    slots: DashMap<String, Slot>,
    clock: SharedClock,
    offline: AtomicBool,
    stall_ms: AtomicU64,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
            offline: AtomicBool::new(false),
            stall_ms: AtomicU64::new(0),
        }
    }

    /// Simulate the store becoming unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Simulate a store that accepts connections but answers slowly; every
    /// operation waits `stall` before running
    pub fn set_stall(&self, stall: Duration) {
        self.stall_ms.store(stall.as_millis() as u64, Ordering::SeqCst);
    }

    async fn check_online(&self) -> StoreResult<()> {
        let stall_ms = self.stall_ms.load(Ordering::SeqCst);
        if stall_ms > 0 {
            tokio::time::sleep(Duration::from_millis(stall_ms)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn expiry(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(ttl)
            .ok()
            .map(|ttl| self.clock.now() + ttl)
    }

    fn malformed(key: &str, expected: &str) -> StoreError {
        StoreError::Malformed {
            key: key.to_string(),
            reason: format!("expected a {expected}"),
        }
    }

    /// Live slot for `key`, dropping it first when expired
    fn live_slot(&self, key: &str) -> Option<Slot> {
        let now = self.clock.now();
        self.slots.remove_if(key, |_, slot| slot.is_expired(now));
        self.slots.get(key).map(|slot| slot.clone())
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> StoreResult<Option<i64>> {
        self.check_online().await?;
        match self.live_slot(key) {
            None => Ok(None),
            Some(Slot {
                value: SlotValue::Counter(value),
                ..
            }) => Ok(Some(value)),
            Some(_) => Err(Self::malformed(key, "counter")),
        }
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        self.check_online().await?;
        let now = self.clock.now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.is_expired(now) {
                    *slot = Slot {
                        value: SlotValue::Counter(1),
                        expires_at: self.expiry(ttl),
                    };
                    return Ok(1);
                }
                match &mut slot.value {
                    SlotValue::Counter(value) => {
                        *value += 1;
                        Ok(*value)
                    }
                    SlotValue::Hash(_) => Err(Self::malformed(key, "counter")),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: SlotValue::Counter(1),
                    expires_at: self.expiry(ttl),
                });
                Ok(1)
            }
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.check_online().await?;
        let now = self.clock.now();
        Ok(self
            .live_slot(key)
            .and_then(|slot| slot.expires_at)
            .and_then(|at| (at - now).to_std().ok()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_online().await?;
        self.slots.remove(key);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.check_online().await?;
        match self.live_slot(key) {
            None => Ok(HashMap::new()),
            Some(Slot {
                value: SlotValue::Hash(fields),
                ..
            }) => Ok(fields),
            Some(_) => Err(Self::malformed(key, "hash")),
        }
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<()> {
        self.check_online().await?;
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: SlotValue::Hash(HashMap::new()),
            expires_at,
        });
        if slot.is_expired(now) {
            slot.value = SlotValue::Hash(HashMap::new());
        }
        match &mut slot.value {
            SlotValue::Hash(existing) => {
                existing.extend(fields.iter().cloned());
                slot.expires_at = expires_at;
                Ok(())
            }
            SlotValue::Counter(_) => Err(Self::malformed(key, "hash")),
        }
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64, ttl: Duration) -> StoreResult<i64> {
        self.check_online().await?;
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: SlotValue::Hash(HashMap::new()),
            expires_at,
        });
        if slot.is_expired(now) {
            slot.value = SlotValue::Hash(HashMap::new());
        }
        match &mut slot.value {
            SlotValue::Hash(fields) => {
                let current = match fields.get(field) {
                    Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::Malformed {
                        key: key.to_string(),
                        reason: format!("field {field} is not an integer"),
                    })?,
                    None => 0,
                };
                let next = current + by;
                fields.insert(field.to_string(), next.to_string());
                slot.expires_at = expires_at;
                Ok(next)
            }
            SlotValue::Counter(_) => Err(Self::malformed(key, "hash")),
        }
    }
}

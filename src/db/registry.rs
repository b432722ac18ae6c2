//! Registry of active units of work.
//!
//! The context owns one registry. Units are kept in creation order; command
//! construction asks it for the transaction to join, and units leave it
//! through `deregister` when they complete. Units whose transaction the
//! driver has already ended are skipped, and pruned on the next write. The
//! lock is a reader-writer lock and is never held across an await point.

use crate::config::ScopePolicy;
use crate::db::driver::TransactionHandle;
use crate::db::unit_of_work::UnitOfWorkId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Instant;
use tracing::debug;

struct RegisteredUnit<T> {
    id: UnitOfWorkId,
    transaction: T,
    registered_at: Instant,
}

/// Metadata about an active unit of work (for listing without exposing handles).
#[derive(Debug, Clone)]
pub struct UnitOfWorkMetadata {
    pub unit_of_work_id: UnitOfWorkId,
    pub transaction_id: String,
    /// When the unit of work was registered (absolute time)
    pub started_at: DateTime<Utc>,
    /// Seconds since the unit of work was registered
    pub duration_secs: u64,
}

pub struct UnitOfWorkRegistry<T> {
    units: RwLock<Vec<RegisteredUnit<T>>>,
    policy: ScopePolicy,
}

impl<T: TransactionHandle> UnitOfWorkRegistry<T> {
    pub fn new(policy: ScopePolicy) -> Self {
        Self {
            units: RwLock::new(Vec::new()),
            policy,
        }
    }

    pub fn policy(&self) -> ScopePolicy {
        self.policy
    }

    /// Register a unit of work at the tail.
    pub fn register(&self, id: UnitOfWorkId, transaction: T) {
        let mut units = self.units.write();
        units.retain(|unit| unit.transaction.is_active());
        debug!(
            unit_of_work_id = %id,
            transaction_id = %transaction.id(),
            active = units.len() + 1,
            "Unit of work registered"
        );
        units.push(RegisteredUnit {
            id,
            transaction,
            registered_at: Instant::now(),
        });
    }

    /// Remove a unit of work. Returns `false` if it was not registered.
    pub fn deregister(&self, id: &UnitOfWorkId) -> bool {
        let mut units = self.units.write();
        let found = match units.iter().position(|unit| &unit.id == id) {
            Some(pos) => {
                units.remove(pos);
                debug!(
                    unit_of_work_id = %id,
                    active = units.len(),
                    "Unit of work deregistered"
                );
                true
            }
            None => false,
        };
        units.retain(|unit| unit.transaction.is_active());
        found
    }

    /// Transaction an ad-hoc command must join, if any unit is active.
    ///
    /// `Oldest` selects the earliest-registered unit still active, `Newest`
    /// the most recent one.
    pub fn current(&self) -> Option<T> {
        let units = self.units.read();
        let mut active = units.iter().filter(|unit| unit.transaction.is_active());
        let unit = match self.policy {
            ScopePolicy::Oldest => active.next(),
            ScopePolicy::Newest => active.last(),
        };
        unit.map(|unit| unit.transaction.clone())
    }

    /// Get the number of active units of work.
    pub fn len(&self) -> usize {
        self.units
            .read()
            .iter()
            .filter(|unit| unit.transaction.is_active())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// List all active units of work in registration order.
    pub fn list_all(&self) -> Vec<UnitOfWorkMetadata> {
        let now = Instant::now();
        let wall_now = Utc::now();
        let units = self.units.read();
        units
            .iter()
            .filter(|unit| unit.transaction.is_active())
            .map(|unit| {
                let age = now.duration_since(unit.registered_at);
                let started_at = wall_now
                    - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
                UnitOfWorkMetadata {
                    unit_of_work_id: unit.id.clone(),
                    transaction_id: unit.transaction.id().to_string(),
                    started_at,
                    duration_secs: age.as_secs(),
                }
            })
            .collect()
    }
}

impl<T: TransactionHandle> std::fmt::Debug for UnitOfWorkRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkRegistry")
            .field("active", &self.len())
            .field("policy", &self.policy)
            .finish()
    }
}

//! Append-Only Audit Ledger
//!
//! The ledger is the foundation of the governance layer: every
//! state-changing operation writes exactly one entry here, and nothing
//! ever updates or deletes one. There is deliberately no mutation API
//! beyond `append` — compliance requires that the trail cannot be
//! rewritten, only archived externally once the advisory retention
//! period lapses.
//!
//! Reads and writes share a `parking_lot::RwLock`, so concurrent
//! appends never block readers for longer than the insert itself.

#![deny(unsafe_code)]

use approval_types::{AuditEntry, AuditEntryId, AuditPage, AuditQuery, EntityKind, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

/// Default advisory retention: 7 years
pub const DEFAULT_RETENTION_DAYS: i64 = 2555;

/// Storage seam for the audit trail.
///
/// The engine only depends on this trait; the in-memory implementation
/// below is the reference store, with persistent backends supplied by
/// the embedding service.
pub trait AuditStore: Send + Sync {
    /// Append one entry. The only mutation the trail supports.
    fn append(&self, entry: AuditEntry) -> Result<AuditEntryId, LedgerError>;

    /// Fetch a single entry by ID
    fn get(&self, id: &AuditEntryId) -> Result<Option<AuditEntry>, LedgerError>;

    /// Filtered, paginated query over the trail, newest first
    fn query(&self, query: &AuditQuery) -> Result<AuditPage, LedgerError>;

    /// Total entries appended so far
    fn entry_count(&self) -> usize;
}

/// In-memory audit ledger with entity and actor indexes
pub struct InMemoryAuditLedger {
    entries: RwLock<Vec<AuditEntry>>,
    entity_index: RwLock<HashMap<(EntityKind, String), Vec<usize>>>,
    actor_index: RwLock<HashMap<UserId, Vec<usize>>>,
    retention_days: i64,
}

impl InMemoryAuditLedger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            entity_index: RwLock::new(HashMap::new()),
            actor_index: RwLock::new(HashMap::new()),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    /// Advisory archival horizon; external archival processes enforce
    /// it, the ledger itself never drops entries
    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    fn matches(entry: &AuditEntry, query: &AuditQuery) -> bool {
        if let Some(kind) = query.entity_kind {
            if entry.entity.kind != kind {
                return false;
            }
        }
        if let Some(ref id) = query.entity_id {
            if entry.entity.id != *id {
                return false;
            }
        }
        if let Some(ref actor) = query.actor {
            if entry.actor.id != *actor {
                return false;
            }
        }
        if let Some(ref action) = query.action {
            if entry.action != *action {
                return false;
            }
        }
        if let Some(from) = query.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = query.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(level) = query.risk_level {
            if entry.risk_level != level {
                return false;
            }
        }
        if let Some(required) = query.approval_required {
            if entry.approval_required != required {
                return false;
            }
        }
        true
    }
}

impl Default for InMemoryAuditLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditStore for InMemoryAuditLedger {
    fn append(&self, entry: AuditEntry) -> Result<AuditEntryId, LedgerError> {
        let id = entry.id.clone();
        let mut entries = self.entries.write();
        let position = entries.len();

        self.entity_index
            .write()
            .entry((entry.entity.kind, entry.entity.id.clone()))
            .or_default()
            .push(position);
        self.actor_index
            .write()
            .entry(entry.actor.id.clone())
            .or_default()
            .push(position);

        tracing::debug!(entry_id = %id, action = %entry.action, "Audit entry appended");
        entries.push(entry);

        Ok(id)
    }

    fn get(&self, id: &AuditEntryId) -> Result<Option<AuditEntry>, LedgerError> {
        let entries = self.entries.read();
        Ok(entries.iter().find(|e| e.id == *id).cloned())
    }

    fn query(&self, query: &AuditQuery) -> Result<AuditPage, LedgerError> {
        let entries = self.entries.read();

        // Narrow the scan via an index when the query pins an entity or
        // actor; otherwise walk the whole trail.
        let candidates: Vec<usize> = if let (Some(kind), Some(ref id)) =
            (query.entity_kind, query.entity_id.as_ref())
        {
            self.entity_index
                .read()
                .get(&(kind, (*id).clone()))
                .cloned()
                .unwrap_or_default()
        } else if let Some(ref actor) = query.actor {
            self.actor_index
                .read()
                .get(actor)
                .cloned()
                .unwrap_or_default()
        } else {
            (0..entries.len()).collect()
        };

        let mut matched: Vec<&AuditEntry> = candidates
            .iter()
            .filter_map(|&i| entries.get(i))
            .filter(|e| Self::matches(e, query))
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let total = matched.len();

        let offset = query.offset.unwrap_or(0);
        let page: Vec<AuditEntry> = matched
            .into_iter()
            .skip(offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(AuditPage {
            entries: page,
            total,
        })
    }

    fn entry_count(&self) -> usize {
        self.entries.read().len()
    }
}

/// Ledger-related errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

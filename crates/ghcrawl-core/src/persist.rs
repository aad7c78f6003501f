//! Persistence seam: existence checks for the backlog, upserts for the writer

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{WorkItem, Workflow};

/// Relational store collaborator.
///
/// All writes are upserts keyed by primary identity and must be idempotent
/// under repeated identical calls.
pub trait Persistence: Send {
    /// True when `id` has already been fetched (in any status)
    fn has_entity(&self, workflow: Workflow, id: i64) -> Result<bool>;

    /// Record a fetch that produced no entity
    fn upsert_status(
        &mut self,
        workflow: Workflow,
        id: i64,
        name: &str,
        status: u16,
        fetched_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Record a fetched entity under its own reported identity.
    ///
    /// `item` is the request that produced it; membership lists are keyed by
    /// the requested organization because the list carries no identity.
    fn upsert_entity(
        &mut self,
        workflow: Workflow,
        item: &WorkItem,
        entity: &Value,
        status: u16,
        fetched_at: DateTime<Utc>,
    ) -> Result<()>;
}

//! Pipeline data model: workflows, work items, quota and fetch outcomes

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Placeholder identity for backlog rows whose numeric id is not known.
///
/// Items carrying it are always fetched, never reported as identity drift,
/// and never persisted as status-only records.
pub const UNKNOWN_ID: i64 = -123;

/// The three harvesting workflows sharing the pipeline engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Workflow {
    Repos,
    Users,
    Members,
}

impl Workflow {
    /// Parse CLI/config string into enum
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "repos" => Some(Self::Repos),
            "users" => Some(Self::Users),
            "members" => Some(Self::Members),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Repos => "repos",
            Self::Users => "users",
            Self::Members => "members",
        }
    }

    /// Filename prefix for archive and dead-letter files
    pub fn file_prefix(self) -> &'static str {
        match self {
            Self::Repos => "github_repos",
            Self::Users => "github_users",
            Self::Members => "github_members",
        }
    }

    /// Membership lists span several pages; single entities do not
    pub fn is_paginated(self) -> bool {
        matches!(self, Self::Members)
    }
}

impl std::fmt::Display for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One candidate entity to fetch. Immutable once queued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub external_id: i64,
    pub lookup_key: String,
}

impl WorkItem {
    pub fn new(external_id: i64, lookup_key: impl Into<String>) -> Self {
        Self {
            external_id,
            lookup_key: lookup_key.into(),
        }
    }

    pub fn has_known_id(&self) -> bool {
        self.external_id != UNKNOWN_ID
    }
}

/// API credential bound to exactly one fetch worker
#[derive(Clone)]
pub struct Credential {
    pub account: String,
    pub token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// Remaining call budget reported with the most recent response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaInfo {
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

impl QuotaInfo {
    /// Quota for responses without rate-limit headers; never triggers a sleep
    pub fn unknown() -> Self {
        Self {
            remaining: i64::MAX,
            reset_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// A single remote response
#[derive(Clone, Debug)]
pub struct Page {
    pub status: u16,
    pub quota: QuotaInfo,
    pub entity: Option<Value>,
    pub next_page: Option<u32>,
}

impl Page {
    /// 403/429 with an exhausted budget: wait for the reset instead of recording the status
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.status, 403 | 429) && self.quota.remaining == 0
    }
}

/// Result of fetching one work item, consumed exactly once by the writer
#[derive(Clone, Debug)]
pub struct FetchOutcome {
    pub status: u16,
    pub item: WorkItem,
    pub quota: QuotaInfo,
    pub entity: Option<Value>,
}

impl FetchOutcome {
    /// Identity the payload reports for itself, if the workflow has one
    pub fn reported_id(&self, workflow: Workflow) -> Option<i64> {
        if workflow == Workflow::Members {
            return None;
        }
        self.entity.as_ref()?.get("id")?.as_i64()
    }

    /// Requested identity differs from what the remote now resolves the key to
    pub fn has_identity_drift(&self, workflow: Workflow) -> bool {
        self.item.has_known_id()
            && self
                .reported_id(workflow)
                .is_some_and(|id| id != self.item.external_id)
    }

    /// JSON object written to the archive for a successful fetch
    pub fn archive_record(&self, workflow: Workflow) -> Option<Value> {
        let entity = self.entity.as_ref()?;
        match workflow {
            Workflow::Members => Some(serde_json::json!({
                "id": self.item.external_id,
                "login": self.item.lookup_key,
                "members": entity,
            })),
            Workflow::Repos | Workflow::Users => Some(entity.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome(id: i64, entity: Option<Value>) -> FetchOutcome {
        FetchOutcome {
            status: 200,
            item: WorkItem::new(id, "alice"),
            quota: QuotaInfo::unknown(),
            entity,
        }
    }

    #[test]
    fn from_name_valid() {
        assert_eq!(Workflow::from_name("repos"), Some(Workflow::Repos));
        assert_eq!(Workflow::from_name("users"), Some(Workflow::Users));
        assert_eq!(Workflow::from_name("members"), Some(Workflow::Members));
        assert_eq!(Workflow::from_name("Repos"), None);
        assert_eq!(Workflow::from_name(""), None);
    }

    #[test]
    fn only_members_paginate() {
        assert!(Workflow::Members.is_paginated());
        assert!(!Workflow::Repos.is_paginated());
        assert!(!Workflow::Users.is_paginated());
    }

    #[test]
    fn drift_detected_on_id_mismatch() {
        let o = outcome(7, Some(json!({"id": 9, "login": "alice"})));
        assert_eq!(o.reported_id(Workflow::Users), Some(9));
        assert!(o.has_identity_drift(Workflow::Users));
    }

    #[test]
    fn no_drift_for_unknown_id() {
        let o = outcome(UNKNOWN_ID, Some(json!({"id": 9})));
        assert!(!o.has_identity_drift(Workflow::Users));
    }

    #[test]
    fn no_drift_for_members() {
        let o = outcome(7, Some(json!([{"id": 1}, {"id": 2}])));
        assert_eq!(o.reported_id(Workflow::Members), None);
        assert!(!o.has_identity_drift(Workflow::Members));
    }

    #[test]
    fn members_archive_record_wraps_list() {
        let o = outcome(7, Some(json!([{"id": 1}])));
        let record = o.archive_record(Workflow::Members).unwrap();
        assert_eq!(record["id"], 7);
        assert_eq!(record["login"], "alice");
        assert_eq!(record["members"][0]["id"], 1);
    }

    #[test]
    fn rate_limited_needs_zero_remaining() {
        let mut page = Page {
            status: 403,
            quota: QuotaInfo {
                remaining: 0,
                reset_at: Utc::now(),
            },
            entity: None,
            next_page: None,
        };
        assert!(page.is_rate_limited());
        page.quota.remaining = 12;
        assert!(!page.is_rate_limited());
    }

    #[test]
    fn credential_debug_hides_token() {
        let c = Credential {
            account: "bot".into(),
            token: "ghp_secret".into(),
        };
        assert!(!format!("{c:?}").contains("ghp_secret"));
    }
}

//! Typed views of the GitHub payloads the store persists.
//!
//! Only the columns the schema keeps are decoded; everything else in the
//! payload is ignored (the archive keeps the full JSON).

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Timestamp layout bound into `CAST(? AS TIMESTAMP)`
const SQL_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub login: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoRecord {
    pub id: i64,
    pub full_name: Option<String>,
    pub language: Option<String>,
    pub description: Option<String>,
    pub size: Option<i64>,
    pub stargazers_count: Option<i64>,
    pub forks_count: Option<i64>,
    pub topics: Option<Vec<String>>,
    pub owner: Option<UserRecord>,
    pub parent: Option<Box<RepoRecord>>,
    pub created_at: Option<String>,
    pub pushed_at: Option<String>,
}

impl RepoRecord {
    /// Topics as a JSON array literal
    pub fn topics_json(&self) -> Option<String> {
        self.topics
            .as_ref()
            .and_then(|t| serde_json::to_string(t).ok())
    }
}

/// UTC wall-clock text for binding
pub fn sql_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(SQL_TIMESTAMP).to_string()
}

/// Convert an RFC 3339 API timestamp; unparsable values become NULL
pub fn api_timestamp(raw: Option<&str>) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(raw?).ok()?;
    Some(sql_timestamp(parsed.with_timezone(&Utc)))
}

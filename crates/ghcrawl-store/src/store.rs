//! DuckDB-backed persistence for fetched entities

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use duckdb::{Connection, params};
use ghcrawl_core::{Persistence, WorkItem, Workflow};
use serde_json::Value;

use crate::records::{RepoRecord, UserRecord, api_timestamp, sql_timestamp};
use crate::sql;

/// How a row was fetched; `None` marks a stub
type Fetch<'a> = Option<(i32, &'a str)>;

/// Row counts for the `status` report
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreCounts {
    pub repos: i64,
    pub repos_fetched: i64,
    pub users: i64,
    pub users_fetched: i64,
    pub organizations_fetched: i64,
    pub memberships: i64,
}

pub struct DuckDbStore {
    conn: Connection,
}

impl std::fmt::Debug for DuckDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbStore").finish_non_exhaustive()
    }
}

impl DuckDbStore {
    /// Open (or create) the database file and ensure the schema exists
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Cannot open database {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open DuckDB in-memory connection")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(sql::create_schema())
            .context("Failed to create schema")?;
        Ok(Self { conn })
    }

    /// Second connection to the same database
    pub fn try_clone(&self) -> Result<Self> {
        let conn = self
            .conn
            .try_clone()
            .context("Failed to open second connection")?;
        Ok(Self { conn })
    }

    /// Members backlog: organizations without a membership fetch, most-starred first
    pub fn pending_organizations(&self) -> Result<Vec<WorkItem>> {
        let mut stmt = self.conn.prepare(sql::pending_organizations())?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let login: Option<String> = row.get(1)?;
            Ok(WorkItem::new(id, login.unwrap_or_default()))
        })?;
        let items = rows
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query pending organizations")?;
        Ok(items.into_iter().filter(|i| !i.lookup_key.is_empty()).collect())
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        self.conn
            .query_row(sql::counts(), [], |row| {
                Ok(StoreCounts {
                    repos: row.get(0)?,
                    repos_fetched: row.get(1)?,
                    users: row.get(2)?,
                    users_fetched: row.get(3)?,
                    organizations_fetched: row.get(4)?,
                    memberships: row.get(5)?,
                })
            })
            .context("Failed to count rows")
    }

    /// Status code recorded for `id`, if any row exists
    pub fn status_of(&self, workflow: Workflow, id: i64) -> Result<Option<i32>> {
        let query = match workflow {
            Workflow::Repos => "SELECT statuscode FROM repos WHERE id = ?",
            Workflow::Users => "SELECT statuscode FROM users WHERE id = ?",
            Workflow::Members => {
                "SELECT statuscode FROM organization_fetches WHERE organization = ?"
            }
        };
        let mut stmt = self.conn.prepare_cached(query)?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    /// Member ids recorded for an organization
    pub fn members_of(&self, organization: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT member FROM organization_members WHERE organization = ? ORDER BY member",
        )?;
        let rows = stmt.query_map([organization], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<i64>, _>>()?)
    }
}

fn insert_user(conn: &Connection, user: &UserRecord, fetch: Fetch) -> Result<()> {
    match fetch {
        Some((status, fetched)) => {
            conn.prepare_cached(sql::upsert_user())?.execute(params![
                user.id,
                user.login,
                user.name,
                user.company,
                user.location,
                user.bio,
                user.email,
                user.kind,
                user.followers,
                user.following,
                api_timestamp(user.created_at.as_deref()),
                api_timestamp(user.updated_at.as_deref()),
                fetched,
                status,
            ])?;
        }
        None => {
            conn.prepare_cached(sql::insert_user_stub())?
                .execute(params![user.id, user.login, user.kind])?;
        }
    }
    Ok(())
}

fn insert_repo(conn: &Connection, repo: &RepoRecord, fetch: Fetch) -> Result<()> {
    if let Some(owner) = &repo.owner {
        insert_user(conn, owner, None)?;
    }
    if let Some(parent) = &repo.parent {
        insert_repo(conn, parent, None)?;
    }

    let statement = if fetch.is_some() {
        sql::upsert_repo()
    } else {
        sql::insert_repo_stub()
    };
    conn.prepare_cached(statement)?.execute(params![
        repo.id,
        repo.full_name,
        repo.language,
        repo.description,
        repo.size,
        repo.stargazers_count,
        repo.forks_count,
        repo.topics_json(),
        repo.parent.as_ref().map(|p| p.id),
        repo.owner.as_ref().map(|o| o.id),
        api_timestamp(repo.created_at.as_deref()),
        api_timestamp(repo.pushed_at.as_deref()),
        fetch.map(|(_, fetched)| fetched),
        fetch.map(|(status, _)| status),
    ])?;
    Ok(())
}

impl Persistence for DuckDbStore {
    fn has_entity(&self, workflow: Workflow, id: i64) -> Result<bool> {
        let count: i64 = self
            .conn
            .prepare_cached(sql::count_fetched(workflow))?
            .query_row([id], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn upsert_status(
        &mut self,
        workflow: Workflow,
        id: i64,
        name: &str,
        status: u16,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .prepare_cached(sql::upsert_status(workflow))?
            .execute(params![id, name, sql_timestamp(fetched_at), i32::from(status)])
            .with_context(|| format!("Failed to record {workflow} status for {name}"))?;
        Ok(())
    }

    fn upsert_entity(
        &mut self,
        workflow: Workflow,
        item: &WorkItem,
        entity: &Value,
        status: u16,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let fetched = sql_timestamp(fetched_at);
        let fetch = Some((i32::from(status), fetched.as_str()));

        match workflow {
            Workflow::Repos => {
                let repo: RepoRecord = serde_json::from_value(entity.clone())
                    .with_context(|| format!("Unexpected repository payload for {}", item.lookup_key))?;
                insert_repo(&self.conn, &repo, fetch)
            }
            Workflow::Users => {
                let user: UserRecord = serde_json::from_value(entity.clone())
                    .with_context(|| format!("Unexpected user payload for {}", item.lookup_key))?;
                insert_user(&self.conn, &user, fetch)
            }
            Workflow::Members => {
                if !item.has_known_id() {
                    bail!("Membership of {} has no organization id", item.lookup_key);
                }
                let members: Vec<UserRecord> = serde_json::from_value(entity.clone())
                    .with_context(|| format!("Unexpected member list for {}", item.lookup_key))?;

                let tx = self.conn.transaction()?;
                let mut ids = BTreeSet::new();
                for member in &members {
                    insert_user(&tx, member, None)?;
                    ids.insert(member.id);
                }
                tx.prepare_cached(sql::delete_members())?
                    .execute([item.external_id])?;
                {
                    let mut insert = tx.prepare_cached(sql::insert_member())?;
                    for id in &ids {
                        insert.execute([item.external_id, *id])?;
                    }
                }
                tx.prepare_cached(sql::upsert_organization_fetch())?.execute(params![
                    item.external_id,
                    item.lookup_key,
                    fetched,
                    i32::from(status),
                ])?;
                tx.commit()
                    .with_context(|| format!("Failed to commit members of {}", item.lookup_key))?;
                log::debug!("{}: {} members", item.lookup_key, ids.len());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store.conn.execute_batch(sql::create_schema()).unwrap();
    }

    #[test]
    fn status_row_counts_as_fetched() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        assert!(!store.has_entity(Workflow::Repos, 5).unwrap());
        store
            .upsert_status(Workflow::Repos, 5, "gone/repo", 404, now())
            .unwrap();
        assert!(store.has_entity(Workflow::Repos, 5).unwrap());
        assert_eq!(store.status_of(Workflow::Repos, 5).unwrap(), Some(404));
    }

    #[test]
    fn user_upsert_replaces_fields() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let item = WorkItem::new(3, "alice");
        store
            .upsert_entity(Workflow::Users, &item, &json!({"id": 3, "login": "alice", "followers": 1}), 200, now())
            .unwrap();
        store
            .upsert_entity(Workflow::Users, &item, &json!({"id": 3, "login": "alice", "followers": 2}), 200, now())
            .unwrap();
        let followers: i64 = store
            .conn
            .query_row("SELECT followers FROM users WHERE id = 3", [], |r| r.get(0))
            .unwrap();
        assert_eq!(followers, 2);
        assert_eq!(store.counts().unwrap().users, 1);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let err = store
            .upsert_entity(Workflow::Users, &WorkItem::new(1, "x"), &json!([1, 2]), 200, now())
            .unwrap_err();
        assert!(format!("{err:#}").contains("Unexpected user payload"));
    }
}

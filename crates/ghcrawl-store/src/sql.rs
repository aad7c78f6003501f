//! SQL for the harvest database.
//!
//! Every write is an upsert on the primary key. Stub rows (repo owners,
//! fork parents, organization members) use `DO NOTHING` so they never
//! overwrite a row that was fetched in its own right; a stub has
//! `fetched IS NULL`.
//!
//! Timestamps are bound as text and cast, in UTC.

use ghcrawl_core::Workflow;

/// Returns the SQL creating every table (idempotent).
pub fn create_schema() -> &'static str {
    "CREATE TABLE IF NOT EXISTS users (
        id BIGINT PRIMARY KEY,
        login VARCHAR,
        name VARCHAR,
        company VARCHAR,
        location VARCHAR,
        bio VARCHAR,
        email VARCHAR,
        type VARCHAR,
        followers BIGINT,
        following BIGINT,
        created TIMESTAMP,
        modified TIMESTAMP,
        fetched TIMESTAMP,
        statuscode INTEGER
    );
    CREATE TABLE IF NOT EXISTS repos (
        id BIGINT PRIMARY KEY,
        name VARCHAR,
        language VARCHAR,
        description VARCHAR,
        size BIGINT,
        stars BIGINT,
        forks BIGINT,
        topics VARCHAR,
        parentid BIGINT,
        ownerid BIGINT,
        created TIMESTAMP,
        modified TIMESTAMP,
        fetched TIMESTAMP,
        statuscode INTEGER
    );
    CREATE TABLE IF NOT EXISTS organization_fetches (
        organization BIGINT PRIMARY KEY,
        login VARCHAR,
        fetched TIMESTAMP,
        statuscode INTEGER
    );
    CREATE TABLE IF NOT EXISTS organization_members (
        organization BIGINT NOT NULL,
        member BIGINT NOT NULL
    );"
}

/// Existence check: one row counted when the entity was fetched
pub fn count_fetched(workflow: Workflow) -> &'static str {
    match workflow {
        Workflow::Repos => "SELECT count(*) FROM repos WHERE id = ? AND fetched IS NOT NULL",
        Workflow::Users => "SELECT count(*) FROM users WHERE id = ? AND fetched IS NOT NULL",
        Workflow::Members => {
            "SELECT count(*) FROM organization_fetches \
             WHERE organization = ? AND fetched IS NOT NULL"
        }
    }
}

/// Status-only upsert; params: id, name, fetched, statuscode
pub fn upsert_status(workflow: Workflow) -> &'static str {
    match workflow {
        Workflow::Repos => {
            "INSERT INTO repos (id, name, fetched, statuscode) \
             VALUES (?, ?, CAST(? AS TIMESTAMP), ?) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, \
             fetched = excluded.fetched, statuscode = excluded.statuscode"
        }
        // A user's login is left alone: the old id may be gone while the login moved on
        Workflow::Users => {
            "INSERT INTO users (id, login, fetched, statuscode) \
             VALUES (?, ?, CAST(? AS TIMESTAMP), ?) \
             ON CONFLICT (id) DO UPDATE SET \
             fetched = excluded.fetched, statuscode = excluded.statuscode"
        }
        Workflow::Members => upsert_organization_fetch(),
    }
}

/// Params: id, login, name, company, location, bio, email, type, followers,
/// following, created, modified, fetched, statuscode
pub fn upsert_user() -> &'static str {
    "INSERT INTO users (id, login, name, company, location, bio, email, type, followers, \
     following, created, modified, fetched, statuscode) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), \
     CAST(? AS TIMESTAMP), ?) \
     ON CONFLICT (id) DO UPDATE SET login = excluded.login, name = excluded.name, \
     company = excluded.company, location = excluded.location, bio = excluded.bio, \
     email = excluded.email, type = excluded.type, followers = excluded.followers, \
     following = excluded.following, created = excluded.created, \
     modified = excluded.modified, fetched = excluded.fetched, \
     statuscode = excluded.statuscode"
}

/// Params: id, login, type
pub fn insert_user_stub() -> &'static str {
    "INSERT INTO users (id, login, type) VALUES (?, ?, ?) ON CONFLICT (id) DO NOTHING"
}

/// Params: id, name, language, description, size, stars, forks, topics,
/// parentid, ownerid, created, modified, fetched, statuscode
pub fn upsert_repo() -> &'static str {
    "INSERT INTO repos (id, name, language, description, size, stars, forks, topics, \
     parentid, ownerid, created, modified, fetched, statuscode) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), \
     CAST(? AS TIMESTAMP), ?) \
     ON CONFLICT (id) DO UPDATE SET name = excluded.name, language = excluded.language, \
     description = excluded.description, size = excluded.size, stars = excluded.stars, \
     forks = excluded.forks, topics = excluded.topics, parentid = excluded.parentid, \
     ownerid = excluded.ownerid, created = excluded.created, \
     modified = excluded.modified, fetched = excluded.fetched, \
     statuscode = excluded.statuscode"
}

/// Same params as [`upsert_repo`]; fetched and statuscode are bound NULL
pub fn insert_repo_stub() -> &'static str {
    "INSERT INTO repos (id, name, language, description, size, stars, forks, topics, \
     parentid, ownerid, created, modified, fetched, statuscode) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), \
     CAST(? AS TIMESTAMP), ?) \
     ON CONFLICT (id) DO NOTHING"
}

/// Params: organization, login, fetched, statuscode
pub fn upsert_organization_fetch() -> &'static str {
    "INSERT INTO organization_fetches (organization, login, fetched, statuscode) \
     VALUES (?, ?, CAST(? AS TIMESTAMP), ?) \
     ON CONFLICT (organization) DO UPDATE SET login = excluded.login, \
     fetched = excluded.fetched, statuscode = excluded.statuscode"
}

pub fn delete_members() -> &'static str {
    "DELETE FROM organization_members WHERE organization = ?"
}

pub fn insert_member() -> &'static str {
    "INSERT INTO organization_members (organization, member) VALUES (?, ?)"
}

/// Organizations owning repositories whose membership was never fetched,
/// most-starred first
pub fn pending_organizations() -> &'static str {
    "SELECT users.id, users.login FROM users \
     INNER JOIN repos ON repos.ownerid = users.id \
     LEFT JOIN organization_fetches f ON f.organization = users.id \
     WHERE users.type = 'Organization' AND f.organization IS NULL \
     GROUP BY users.id, users.login \
     ORDER BY sum(repos.stars) DESC NULLS LAST, users.id"
}

pub fn counts() -> &'static str {
    "SELECT \
       (SELECT count(*) FROM repos), \
       (SELECT count(*) FROM repos WHERE fetched IS NOT NULL), \
       (SELECT count(*) FROM users), \
       (SELECT count(*) FROM users WHERE fetched IS NOT NULL), \
       (SELECT count(*) FROM organization_fetches), \
       (SELECT count(*) FROM organization_members)"
}

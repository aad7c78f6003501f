//! ghcrawl-store: relational persistence on embedded DuckDB
//!
//! Tables: `repos`, `users`, `organization_fetches`, `organization_members`.

mod records;
mod sql;
mod store;

pub use records::{RepoRecord, UserRecord};
pub use store::{DuckDbStore, StoreCounts};

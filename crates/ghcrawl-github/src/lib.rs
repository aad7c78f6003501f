//! GitHub REST v3 client for the ghcrawl pipeline

pub mod client;
pub mod headers;

pub use client::{ClientOptions, DEFAULT_BASE_URL, DEFAULT_USER_AGENT, GitHubClient};

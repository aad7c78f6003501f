//! Remote API seam used by fetch workers

use std::future::Future;

use crate::error::FetchError;
use crate::types::{Page, Workflow};

/// One authenticated client for the remote API. Each fetch worker owns exactly one.
///
/// Implementations must return non-2xx statuses as `Ok(Page)` and reserve
/// `Err` for calls that produced no usable response.
pub trait RemoteApi: Send + Sync + 'static {
    /// Label used in logs (credential account name)
    fn label(&self) -> &str;

    /// Fetch one page for `lookup_key`; `page` is the cursor from the previous
    /// response's `next_page`, `None` for the first request.
    fn fetch(
        &self,
        workflow: Workflow,
        lookup_key: &str,
        page: Option<u32>,
    ) -> impl Future<Output = Result<Page, FetchError>> + Send;
}

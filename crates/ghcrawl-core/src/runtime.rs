//! Process-wide tokio runtime shared by fetch workers and sync callers

use std::sync::LazyLock;

/// Shared multi-thread runtime; sync code reaches it through `handle().block_on`.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name("ghcrawl-rt")
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

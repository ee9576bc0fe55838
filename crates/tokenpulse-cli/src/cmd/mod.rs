pub mod config;
pub mod list;
pub mod run;
pub mod track;

use anyhow::Context;
use std::path::Path;
use tokenpulse_core::paths;
use tokenpulse_core::token_db::TokenDb;

/// Single-threaded runtime for the short-lived store commands.
pub(crate) fn block_on<F: std::future::Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(rt.block_on(fut))
}

pub(crate) fn open_token_db(root: &Path) -> anyhow::Result<TokenDb> {
    let path = paths::token_db_path(root);
    TokenDb::open(&path).with_context(|| format!("failed to open token store at {}", path.display()))
}

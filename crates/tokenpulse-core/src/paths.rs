use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const DATA_DIR: &str = ".tokenpulse";
pub const CONFIG_FILE: &str = ".tokenpulse/config.yaml";
pub const TOKEN_DB_FILE: &str = ".tokenpulse/tokens.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn data_dir(root: &Path) -> PathBuf {
    root.join(DATA_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn token_db_path(root: &Path) -> PathBuf {
    root.join(TOKEN_DB_FILE)
}

/// Resolve the working root.
///
/// Priority:
/// 1. `--root` flag / `TOKENPULSE_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.tokenpulse/`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut dir = cwd.clone();
    loop {
        if dir.join(DATA_DIR).is_dir() {
            return dir;
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => break,
        }
    }
    cwd
}

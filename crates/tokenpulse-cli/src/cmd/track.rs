use crate::cmd::{block_on, open_token_db};
use crate::output::print_json;
use std::path::Path;
use tokenpulse_core::store::{track_token, TokenStore};

pub fn track(root: &Path, ids: &[String], symbol: Option<String>, json: bool) -> anyhow::Result<()> {
    let db = open_token_db(root)?;
    let now = chrono::Utc::now();

    let tracked = block_on(async {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(track_token(&db, id.trim(), symbol.clone(), now).await?);
        }
        Ok::<_, tokenpulse_core::PulseError>(out)
    })??;

    if json {
        print_json(&tracked)?;
    } else {
        for t in &tracked {
            match &t.symbol {
                Some(sym) => println!("Tracking {} ({sym})", t.id),
                None => println!("Tracking {}", t.id),
            }
        }
    }
    Ok(())
}

pub fn untrack(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let db = open_token_db(root)?;
    let state = block_on(db.deactivate(id))??;

    if json {
        print_json(&state)?;
    } else {
        println!("Stopped tracking {}", state.id);
    }
    Ok(())
}

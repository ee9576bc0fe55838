use crate::cmd::{block_on, open_token_db};
use crate::output::{fmt_multiplier, print_json, print_table, Column};
use std::path::Path;
use tokenpulse_core::alert::format_market_cap;
use tokenpulse_core::store::TokenStore;
use tokenpulse_core::strategy::categorize;

pub fn run(root: &Path, all: bool, json: bool) -> anyhow::Result<()> {
    let db = open_token_db(root)?;
    let tokens = if all {
        block_on(db.list_all())??
    } else {
        block_on(db.list_active())??
    };
    let now = chrono::Utc::now();

    if json {
        let list: Vec<serde_json::Value> = tokens
            .iter()
            .map(|t| {
                serde_json::json!({
                    "id": t.id,
                    "symbol": t.symbol,
                    "active": t.active,
                    "category": categorize(t, now),
                    "current_market_cap": t.current_market_cap,
                    "multiplier": t.multiplier(),
                    "alert_watermark": t.alert_watermark,
                    "first_seen": t.first_seen,
                })
            })
            .collect();
        return print_json(&list);
    }

    if tokens.is_empty() {
        println!("No tokens tracked. Add one with `tokenpulse track <ID>`.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = tokens
        .iter()
        .map(|t| {
            let mut row = vec![
                t.id.clone(),
                t.symbol.clone().unwrap_or_else(|| "-".to_string()),
                categorize(t, now).to_string(),
                format_market_cap(t.current_market_cap),
                fmt_multiplier(t.multiplier()),
                format!("{}x", t.alert_watermark),
            ];
            if all {
                row.push(if t.active { "yes" } else { "no" }.to_string());
            }
            row
        })
        .collect();

    let mut columns = vec![
        Column::left("ID"),
        Column::left("SYMBOL"),
        Column::left("CATEGORY"),
        Column::right("MCAP"),
        Column::right("GROWTH"),
        Column::right("ALERTED"),
    ];
    if all {
        columns.push(Column::left("ACTIVE"));
    }
    print_table(&columns, &rows);
    Ok(())
}

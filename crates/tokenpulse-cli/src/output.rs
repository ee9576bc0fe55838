use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

/// One table column. Figures read best right-aligned.
#[derive(Debug, Clone, Copy)]
pub struct Column<'a> {
    pub title: &'a str,
    pub right: bool,
}

impl<'a> Column<'a> {
    pub fn left(title: &'a str) -> Self {
        Self { title, right: false }
    }

    pub fn right(title: &'a str) -> Self {
        Self { title, right: true }
    }
}

/// Render `rows` under `columns`, two spaces between columns and a dashed
/// rule under the titles. Cells beyond the last column are dropped.
pub fn render_table(columns: &[Column<'_>], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(col.title.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    out.push_str(&render_line(columns.iter().map(|c| c.title), columns, &widths));
    out.push('\n');
    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    out.push_str(&rule.join("  "));
    out.push('\n');
    for row in rows {
        out.push_str(&render_line(row.iter().map(String::as_str), columns, &widths));
        out.push('\n');
    }
    out
}

fn render_line<'c>(
    cells: impl Iterator<Item = &'c str>,
    columns: &[Column<'_>],
    widths: &[usize],
) -> String {
    let padded: Vec<String> = cells
        .zip(columns.iter().zip(widths))
        .map(|(cell, (col, &w))| {
            if col.right {
                format!("{cell:>w$}")
            } else {
                format!("{cell:<w$}")
            }
        })
        .collect();
    padded.join("  ").trim_end().to_string()
}

pub fn print_table(columns: &[Column<'_>], rows: &[Vec<String>]) {
    print!("{}", render_table(columns, rows));
}

/// `2.50x`, or `-` before a baseline exists.
pub fn fmt_multiplier(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |m| format!("{m:.2}x"))
}

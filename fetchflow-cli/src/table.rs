//! Plain-text rendering of a batch result.

use anyhow::{ensure, Result};
use fetchflow::core::BatchResult;

/// Fails unless `rank_by` is one of `columns`.
pub fn check_rank_column(columns: &[String], rank_by: &str) -> Result<()> {
    ensure!(
        columns.iter().any(|c| c == rank_by),
        "cannot rank by '{rank_by}': columns are {}",
        columns.join(", ")
    );
    Ok(())
}

/// Rows to print: the `top` rows ranked by `rank_by`, or all rows in order.
pub fn select(result: &BatchResult, top: Option<usize>, rank_by: &str) -> Result<BatchResult> {
    let Some(limit) = top else {
        return Ok(result.clone());
    };
    check_rank_column(result.columns(), rank_by)?;
    Ok(result.top_by(rank_by, limit))
}

/// Renders rows under a header, each column padded to its widest cell.
pub fn render(result: &BatchResult) -> String {
    let columns = result.columns();
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in result.rows() {
        for (width, value) in widths.iter_mut().zip(row.values()) {
            *width = (*width).max(value.chars().count());
        }
    }

    let mut out = String::new();
    push_line(&mut out, columns.iter().map(String::as_str), &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_line(&mut out, rule.iter().map(String::as_str), &widths);
    for row in result.rows() {
        push_line(&mut out, row.values().iter().map(String::as_str), &widths);
    }
    out
}

fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

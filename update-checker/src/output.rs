use crate::db::SavedRecord;
use crate::error::CheckerError;

const HEADERS: [&str; 3] = ["ID", "Full Name", "Latest Version"];

/// Persisted records as a bordered text table, sorted by identity.
pub fn render_table(records: &[SavedRecord]) -> String {
    let mut rows: Vec<[&str; 3]> = records
        .iter()
        .map(|record| {
            [
                record.id.as_str(),
                record.full_name.as_str(),
                record.info.latest_version().unwrap_or_default(),
            ]
        })
        .collect();
    rows.sort_by(|a, b| a[0].cmp(b[0]));

    let mut widths = HEADERS.map(|header| header.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = format!(
        "+{}+",
        widths.map(|width| "-".repeat(width)).join("+")
    );
    let line = |cells: &[&str; 3]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut out = vec![border.clone(), line(&HEADERS), border.clone()];
    out.extend(rows.iter().map(line));
    out.push(border);
    out.join("\n")
}

/// Persisted records as a JSON array using the stored column names.
pub fn render_json(records: &[SavedRecord]) -> Result<String, CheckerError> {
    Ok(serde_json::to_string(records)?)
}

//! Historical table scraping from raw page text.
//!
//! The HISTORICAL DATA page prints seven fixed-width tables. Text
//! extraction flattens them to one cell per line, so each table is read
//! by finding its title and then consuming `row_width` lines per row for
//! as long as the first cell is a quarter label such as `3Q 24`. Some
//! extractors keep a row on one line instead; a line holding a label and
//! exactly `row_width - 1` further tokens is read as a whole row.
//!
//! Titles are matched on cleaned text over a rolling window of the last
//! four lines, so a title wrapped over two or three lines still matches.

use crate::model::{BlockConfig, HistoricalData, QuarterLabel};
use crate::pipeline::document::LoadedDocument;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Marker of the page holding the tables.
pub const HISTORICAL_DATA_MARKER: &str = "HISTORICAL DATA";

const WINDOW: usize = 4;

static RE_CLEAN_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\s/]").unwrap());
static RE_CLEAN_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_CLEAN_SLASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*/\s*").unwrap());
static RE_INLINE_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\dQ \d{2})\s+(\S.*)$").unwrap());

/// Normalise a line for title matching.
pub fn clean_line(line: &str) -> String {
    let s = RE_CLEAN_CHARS.replace_all(line, "");
    let s = RE_CLEAN_WS.replace_all(&s, " ");
    let s = RE_CLEAN_SLASH.replace_all(&s, "/");
    s.to_lowercase().trim().to_string()
}

fn window_matches(window: &VecDeque<String>, keyword: &str) -> bool {
    (0..window.len()).any(|i| {
        let joined = window
            .iter()
            .skip(i)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        clean_line(&joined) == keyword
    })
}

/// Rows of one table, read from one page of text.
///
/// Rows keep document order. Reading stops for good when the text runs
/// out in the middle of a row; a row with a bad first cell is dropped
/// and the title search resumes after it.
pub fn extract_block(text: &str, config: &BlockConfig) -> Vec<Vec<String>> {
    let keyword = clean_line(config.keyword);
    let mut lines = text.split('\n').peekable();
    let mut window: VecDeque<String> = VecDeque::with_capacity(WINDOW + 1);
    let mut rows = Vec::new();

    'scan: while let Some(line) = lines.next() {
        window.push_back(clean_line(line.trim()));
        if window.len() > WINDOW {
            window.pop_front();
        }
        if !window_matches(&window, &keyword) {
            continue;
        }
        window.clear();

        loop {
            if let Some(row) = lines.peek().and_then(|l| inline_row(l, config.row_width)) {
                lines.next();
                rows.push(row);
                continue;
            }

            let mut row = Vec::with_capacity(config.row_width);
            for _ in 0..config.row_width {
                match lines.next() {
                    Some(cell) => row.push(cell.trim().to_string()),
                    None => break 'scan,
                }
            }
            if QuarterLabel::matches(&row[0]) {
                rows.push(row);
            } else {
                debug!(
                    "Block '{}' closed at '{}' after {} rows",
                    config.block_id,
                    row[0],
                    rows.len()
                );
                break;
            }
        }
    }
    rows
}

fn inline_row(line: &str, row_width: usize) -> Option<Vec<String>> {
    let caps = RE_INLINE_ROW.captures(line.trim())?;
    let rest: Vec<&str> = caps[2].split_whitespace().collect();
    if row_width < 2 || rest.len() != row_width - 1 {
        return None;
    }
    let mut row = Vec::with_capacity(row_width);
    row.push(caps[1].to_string());
    row.extend(rest.into_iter().map(str::to_string));
    Some(row)
}

/// Index of the first page containing the historical data marker.
pub fn find_historical_page(doc: &LoadedDocument) -> Option<usize> {
    doc.pages
        .iter()
        .position(|p| p.contains(HISTORICAL_DATA_MARKER))
}

/// Scrape every configured table from the submarket's historical page.
///
/// A document without that page yields all blocks empty.
pub fn extract_historical_data(doc: &LoadedDocument, configs: &[BlockConfig]) -> HistoricalData {
    let mut data = HistoricalData::empty();
    let Some(page) = find_historical_page(doc) else {
        warn!("HISTORICAL DATA page not found in {}", doc.path.display());
        return data;
    };
    let text = &doc.pages[page];
    for config in configs {
        let rows = extract_block(text, config);
        debug!("Block '{}': {} rows", config.block_id, rows.len());
        data.blocks.insert(config.block_id.to_string(), rows);
    }
    data
}

// ── CSV audit files ──────────────────────────────────────────────────────

/// Audit file name of a block: keyword with spaces and slashes as `_`.
pub fn csv_file_name(config: &BlockConfig) -> String {
    format!("{}.csv", config.keyword.replace([' ', '/'], "_"))
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render a header row plus data rows as CSV text.
pub fn to_csv(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    let header: Vec<String> = headers.iter().map(|h| csv_field(h)).collect();
    out.push_str(&header.join(","));
    out.push_str("\r\n");
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| csv_field(c)).collect();
        out.push_str(&cells.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Write one CSV per non-empty block into `dir`. Errors are logged.
pub fn write_audit_files(dir: &Path, data: &HistoricalData, configs: &[BlockConfig]) -> Vec<PathBuf> {
    let mut written = Vec::new();
    for config in configs {
        let rows = data.rows(config.block_id);
        if rows.is_empty() {
            continue;
        }
        let path = dir.join(csv_file_name(config));
        match std::fs::write(&path, to_csv(config.headers, rows)) {
            Ok(()) => {
                info!("Data saved to {}", path.display());
                written.push(path);
            }
            Err(e) => warn!("Cannot write {}: {}", path.display(), e),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BLOCK_CONFIGS, block_config};

    /// One cell per line, the way pdf text extraction lays these tables out.
    fn vertical_rows(labels: &[&str], width: usize) -> String {
        let mut out = String::new();
        for label in labels {
            out.push_str(label);
            out.push('\n');
            for c in 1..width {
                out.push_str(&format!("{}.{}%\n", 90 + c, c));
            }
        }
        out
    }

    const NINE: [&str; 9] = [
        "4Q 24", "3Q 24", "2Q 24", "1Q 24", "4Q 23", "3Q 23", "2Q 23", "1Q 23", "4Q 22",
    ];

    #[test]
    fn clean_line_rules() {
        assert_eq!(clean_line("  Supply / Demand  "), "supply/demand");
        assert_eq!(clean_line("Rent Per\tSquare-Foot"), "rent per squarefoot");
        assert_eq!(clean_line("Sample/Existing   Units:"), "sample/existing units");
    }

    #[test]
    fn nine_rows_then_a_notes_row() {
        let occupancy = block_config("occupancy").unwrap();
        let mut text = String::from("HISTORICAL DATA\nOccupancy\n");
        text.push_str(&vertical_rows(&NINE, 14));
        text.push_str(&vertical_rows(&["Notes"], 14));
        text.push_str("trailing\n");

        let rows = extract_block(&text, occupancy);
        assert_eq!(rows.len(), 9);
        assert_eq!(rows[0][0], "4Q 24");
        assert_eq!(rows[8][0], "4Q 22");
        assert!(rows.iter().all(|r| r.len() == 14));
    }

    #[test]
    fn single_line_rows() {
        let occupancy = block_config("occupancy").unwrap();
        let mut text = String::from("Occupancy\n");
        for label in NINE {
            text.push_str(label);
            for c in 1..14 {
                text.push_str(&format!(" {c}"));
            }
            text.push('\n');
        }
        text.push_str("Notes 1 2 3 4 5 6 7 8 9 10 11 12 13\n");
        text.push_str(&"x\n".repeat(14));

        let rows = extract_block(&text, occupancy);
        assert_eq!(rows.len(), 9);
        assert_eq!(rows[2], {
            let mut r = vec!["2Q 24".to_string()];
            r.extend((1..14).map(|c| c.to_string()));
            r
        });
    }

    #[test]
    fn wrapped_title_matches_through_the_window() {
        let sample = block_config("sample_existing_units").unwrap();
        let text = "Sample/\nExisting\nUnits\n3Q 24\n5,000\n4,000\n80%\nEnd\n";
        let rows = extract_block(text, sample);
        assert_eq!(rows, vec![vec!["3Q 24", "5,000", "4,000", "80%"]]);
    }

    #[test]
    fn exhausted_input_mid_row_keeps_complete_rows() {
        let sample = block_config("sample_existing_units").unwrap();
        let text = "Sample/Existing Units\n3Q 24\n1\n2\n3\n2Q 24\n9";
        let rows = extract_block(text, sample);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn missing_keyword_gives_empty_block() {
        let rent = block_config("monthly_rent").unwrap();
        assert!(extract_block("Occupancy\n3Q 24\n", rent).is_empty());
    }

    #[test]
    fn document_without_historical_page_is_all_empty() {
        let doc = LoadedDocument {
            path: PathBuf::from("a.txt"),
            pages: vec!["Occupancy\n3Q 24".into()],
        };
        let data = extract_historical_data(&doc, &BLOCK_CONFIGS);
        assert!(data.is_empty());
        assert_eq!(data.blocks.len(), BLOCK_CONFIGS.len());
    }

    #[test]
    fn csv_quoting_and_names() {
        let sd = block_config("supply_demand").unwrap();
        assert_eq!(csv_file_name(sd), "Supply_Demand.csv");
        let rows = vec![vec!["3Q 24".to_string(), "1,200".to_string(), "say \"x\"".to_string()]];
        assert_eq!(
            to_csv(&["Period", "Supply", "Note"], &rows),
            "Period,Supply,Note\r\n3Q 24,\"1,200\",\"say \"\"x\"\"\"\r\n"
        );
    }

    #[test]
    fn audit_files_only_for_non_empty_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = HistoricalData::empty();
        data.blocks.insert(
            "sample_existing_units".into(),
            vec![vec!["3Q 24".into(), "1".into(), "2".into(), "3".into()]],
        );
        let written = write_audit_files(dir.path(), &data, &BLOCK_CONFIGS);
        assert_eq!(written, vec![dir.path().join("Sample_Existing_Units.csv")]);
    }
}

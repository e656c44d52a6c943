//! Output inspection helpers for integration tests

use channel_dl::Event;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// One parsed CSV row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub title: String,
    pub username: String,
    pub id: i64,
    pub message: String,
    pub date: String,
    pub media_path: String,
}

/// Read the output file, checking the header and returning the data rows.
pub fn read_rows(path: &Path) -> Vec<Row> {
    let mut reader = csv::Reader::from_path(path).expect("output file should be readable");
    let header: Vec<String> = reader
        .headers()
        .expect("output file should have a header")
        .iter()
        .map(str::to_string)
        .collect();
    assert_eq!(
        header,
        channel_dl::sink::HEADER.to_vec(),
        "unexpected header in {}",
        path.display()
    );

    reader
        .records()
        .map(|record| {
            let record = record.expect("row should parse");
            Row {
                title: record[0].to_string(),
                username: record[1].to_string(),
                id: record[2].parse().expect("ID column should be numeric"),
                message: record[3].to_string(),
                date: record[4].to_string(),
                media_path: record[5].to_string(),
            }
        })
        .collect()
}

/// Every file under `dir`, sorted; temporary `.part` files included.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Drain every event already sent to `events`.
pub fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

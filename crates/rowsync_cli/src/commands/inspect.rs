//! Inspect command implementation.

use rowsync_protocol::{ChangeEntry, PeerId, Row, Version, Watermark};
use rowsync_store::Store;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Local peer ID.
    pub peer: PeerId,
    /// Highest local version assigned.
    pub high_version: Version,
    /// Lowest version still fully covered by the change tracker.
    pub retained_from: Version,
    /// Per-table contents.
    pub tables: Vec<TableContents>,
    /// Current change entry of every tracked row, by version.
    pub changes: Vec<ChangeEntry>,
    /// Watermarks of every known remote peer.
    pub watermarks: Vec<PeerWatermark>,
}

/// Rows of one table.
#[derive(Debug, Serialize)]
pub struct TableContents {
    /// Table name.
    pub name: String,
    /// Live rows in key order.
    pub rows: Vec<Row>,
}

/// Watermark pair for one remote peer.
#[derive(Debug, Serialize)]
pub struct PeerWatermark {
    /// Remote peer ID.
    pub peer: PeerId,
    /// Watermark pair.
    pub watermark: Watermark,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }

    let store = Store::open(path)?;
    let mut tables = Vec::new();
    for name in store.tables()? {
        let rows = store.rows(&name)?;
        tables.push(TableContents { name, rows });
    }
    let changes = store.changes()?;

    let result = InspectResult {
        path: path.display().to_string(),
        peer: store.peer_id(),
        high_version: store.high_version()?,
        retained_from: store.retained_from()?,
        tables,
        changes,
        watermarks: store
            .watermarks()?
            .into_iter()
            .map(|(peer, watermark)| PeerWatermark { peer, watermark })
            .collect(),
    };
    store.close()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!("Peer: {}", result.peer);
    println!("High version: {}", result.high_version);
    println!("Retained from: {}", result.retained_from);

    for table in &result.tables {
        println!();
        println!("Table {} ({} rows)", table.name, table.rows.len());
        for row in &table.rows {
            let columns: Vec<String> = row
                .columns
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("  {}: {}", row.key, columns.join(", "));
        }
    }

    println!();
    println!("Change tracker ({} entries)", result.changes.len());
    for change in &result.changes {
        println!(
            "  v{} {:?} {}/{} origin={}@{} ts={}",
            change.version,
            change.operation,
            change.table,
            change.key,
            change.origin,
            change.origin_version,
            change.timestamp
        );
    }

    println!();
    if result.watermarks.is_empty() {
        println!("No remote peers");
    }
    for entry in &result.watermarks {
        println!(
            "Peer {}: received {}, sent {}",
            entry.peer, entry.watermark.received, entry.watermark.sent
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{customer, customer_schema, CUSTOMER};

    #[test]
    fn inspects_a_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        {
            let store = Store::open(&path).unwrap();
            store.create_table(customer_schema()).unwrap();
            store
                .transaction(|txn| txn.insert(CUSTOMER, 1, customer("John", "Doe")))
                .unwrap();
            store.close().unwrap();
        }

        run(&path, "text").unwrap();
        run(&path, "json").unwrap();
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(&dir.path().join("absent.json"), "text").is_err());
    }
}

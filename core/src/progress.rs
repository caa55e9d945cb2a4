//! Progress snapshot codec.
//!
//! A snapshot is a CSV document prefixed with one raw line:
//!
//! ```text
//! sortedCount,low,high
//! <original columns...>,_rank_status,_rank_source_row,_rank_sorted_pos,_rank_pending_pos,_rank_comparisons
//! ...one row per original item, in original load order...
//! ```
//!
//! Every row carries its original load-order index, so reconstruction
//! never matches rows by field values and duplicate records survive the
//! round trip. Import tolerates arbitrary row reordering.

use std::str::FromStr;

use crate::engine::{EngineParts, RankingEngine};
use crate::store::{ItemStore, Record};
use crate::RankError;

const STATUS_SORTED: &str = "sorted";
const STATUS_CURRENT: &str = "current";
const STATUS_UNSORTED: &str = "unsorted";

const COL_STATUS: &str = "_rank_status";
const COL_SOURCE_ROW: &str = "_rank_source_row";
const COL_SORTED_POS: &str = "_rank_sorted_pos";
const COL_PENDING_POS: &str = "_rank_pending_pos";
const COL_COMPARISONS: &str = "_rank_comparisons";

const ANNOTATION_COLUMNS: [&str; 5] = [
    COL_STATUS,
    COL_SOURCE_ROW,
    COL_SORTED_POS,
    COL_PENDING_POS,
    COL_COMPARISONS,
];

/// Serialize the full engine state against its store. The result is both
/// a human-inspectable table and an exact resume point.
pub fn export(store: &ItemStore, engine: &RankingEngine) -> Result<String, RankError> {
    let total = store.len();
    let (low, high) = engine.bracket();

    // Per-item annotations, indexed by original load order.
    let mut status = vec![STATUS_UNSORTED; total];
    let mut sorted_pos = vec![None; total];
    let mut pending_pos = vec![None; total];
    for (pos, &item) in engine.sorted().iter().enumerate() {
        status[item] = STATUS_SORTED;
        sorted_pos[item] = Some(pos);
    }
    for (pos, item) in engine.pending().enumerate() {
        pending_pos[item] = Some(pos);
    }
    if let Some(item) = engine.candidate() {
        status[item] = STATUS_CURRENT;
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    let header: Vec<&str> = store
        .schema()
        .iter()
        .map(String::as_str)
        .chain(ANNOTATION_COLUMNS)
        .collect();
    writer.write_record(&header)?;

    for index in 0..total {
        let comparisons = match status[index] {
            STATUS_CURRENT => engine.comparison_count().to_string(),
            _ => String::new(),
        };
        let row: Vec<String> = store
            .get(index)
            .values()
            .iter()
            .cloned()
            .chain([
                status[index].to_string(),
                index.to_string(),
                sorted_pos[index].map(|p| p.to_string()).unwrap_or_default(),
                pending_pos[index].map(|p| p.to_string()).unwrap_or_default(),
                comparisons,
            ])
            .collect();
        writer.write_record(&row)?;
    }

    let body = writer
        .into_inner()
        .map_err(|err| RankError::Format(err.to_string()))?;
    let body = String::from_utf8(body).map_err(|err| RankError::Format(err.to_string()))?;

    Ok(format!("{},{low},{high}\n{body}", engine.sorted().len()))
}

/// One parsed body row.
struct SnapshotRow {
    values: Vec<String>,
    status: String,
    source_row: usize,
    sorted_pos: Option<usize>,
    pending_pos: Option<usize>,
    comparisons: Option<usize>,
}

/// Deserialize a snapshot into a store and an engine positioned exactly
/// where the exporting session stopped. No partial state is created on
/// failure.
pub fn import(snapshot: &[u8]) -> Result<(ItemStore, RankingEngine), RankError> {
    let text = std::str::from_utf8(snapshot)
        .map_err(|_| RankError::Format("snapshot is not valid UTF-8".into()))?;
    let text = text.trim_start_matches('\u{feff}');

    let (first_line, body) = text
        .split_once('\n')
        .ok_or_else(|| RankError::Format("snapshot has no body".into()))?;

    let header: Vec<&str> = first_line.trim_end_matches('\r').split(',').collect();
    if header.len() < 3 {
        return Err(RankError::Format(
            "first line must contain three integers: sortedCount,low,high".into(),
        ));
    }
    let sorted_count: usize = parse_int(header[0], "sortedCount")?;
    let low: usize = parse_int(header[1], "low")?;
    let high: usize = parse_int(header[2], "high")?;

    let (schema, rows) = parse_body(body)?;

    let total = rows.len();
    if !(low <= high && high <= sorted_count && sorted_count <= total) {
        return Err(RankError::Format(format!(
            "header values violate 0 <= low <= high <= sortedCount <= total \
             (low={low}, high={high}, sortedCount={sorted_count}, total={total})"
        )));
    }

    // Rebuild the store in original load order.
    let mut records: Vec<Option<Record>> = vec![None; total];
    for row in &rows {
        let slot = records
            .get_mut(row.source_row)
            .ok_or_else(|| RankError::Format(format!("source row {} out of range", row.source_row)))?;
        if slot.is_some() {
            return Err(RankError::Format(format!(
                "duplicate source row {}",
                row.source_row
            )));
        }
        *slot = Some(Record::new(row.values.clone()));
    }
    // `records` has `total` slots and `rows` filled each exactly once.
    let records: Vec<Record> = records.into_iter().map(|r| r.expect("slot filled")).collect();
    let store = ItemStore::new(schema, records)?;

    // Rebuild the three sequences from the per-row annotations.
    let mut sorted: Vec<(usize, usize)> = Vec::new();
    let mut pending: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for row in &rows {
        match row.status.as_str() {
            STATUS_SORTED => {
                let pos = row.sorted_pos.ok_or_else(|| {
                    RankError::Format(format!("sorted row {} lacks a position", row.source_row))
                })?;
                sorted.push((pos, row.source_row));
            }
            STATUS_UNSORTED => {
                let pos = row.pending_pos.ok_or_else(|| {
                    RankError::Format(format!("unsorted row {} lacks a position", row.source_row))
                })?;
                pending.push((pos, row.source_row));
            }
            STATUS_CURRENT => {
                if current.is_some() {
                    return Err(RankError::Format("more than one current row".into()));
                }
                current = Some((row.source_row, row.comparisons.unwrap_or(0)));
            }
            other => {
                return Err(RankError::Format(format!("unknown row status `{other}`")));
            }
        }
    }

    if sorted.len() != sorted_count {
        return Err(RankError::Format(format!(
            "header says {sorted_count} sorted rows, found {}",
            sorted.len()
        )));
    }

    let sorted = sequence_by_position(sorted, "sorted")?;
    let pending = sequence_by_position(pending, "pending")?;
    let (candidate, comparison_count) = match current {
        Some((item, count)) => (Some(item), count),
        None => (None, 0),
    };

    let engine = RankingEngine::from_parts(
        EngineParts {
            sorted,
            pending,
            candidate,
            low,
            high,
            comparison_count,
        },
        total,
    )?;

    Ok((store, engine))
}

/// Parse the CSV body into schema columns and annotated rows.
fn parse_body(body: &str) -> Result<(Vec<String>, Vec<SnapshotRow>), RankError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(body.as_bytes());

    let headers = reader.headers()?.clone();
    let mut annotation_index = [None; ANNOTATION_COLUMNS.len()];
    let mut schema_columns: Vec<(usize, String)> = Vec::new();
    for (index, name) in headers.iter().enumerate() {
        match ANNOTATION_COLUMNS.iter().position(|c| *c == name) {
            Some(a) => annotation_index[a] = Some(index),
            None => schema_columns.push((index, name.to_string())),
        }
    }

    if schema_columns.is_empty() {
        return Err(RankError::Format(
            "snapshot contains no original data columns".into(),
        ));
    }
    for (a, column) in ANNOTATION_COLUMNS.iter().enumerate() {
        if annotation_index[a].is_none() {
            return Err(RankError::Format(format!("missing column `{column}`")));
        }
    }

    let field = |row: &csv::StringRecord, a: usize| -> String {
        annotation_index[a]
            .and_then(|i| row.get(i))
            .unwrap_or_default()
            .to_string()
    };

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let values: Vec<String> = schema_columns
            .iter()
            .map(|&(i, _)| record.get(i).unwrap_or_default().to_string())
            .collect();

        rows.push(SnapshotRow {
            values,
            status: field(&record, 0),
            source_row: parse_int(&field(&record, 1), COL_SOURCE_ROW)?,
            sorted_pos: parse_opt_int(&field(&record, 2), COL_SORTED_POS)?,
            pending_pos: parse_opt_int(&field(&record, 3), COL_PENDING_POS)?,
            comparisons: parse_opt_int(&field(&record, 4), COL_COMPARISONS)?,
        });
    }

    let schema = schema_columns.into_iter().map(|(_, name)| name).collect();
    Ok((schema, rows))
}

/// Order items by their recorded positions and require the positions to
/// be exactly `0..len`.
fn sequence_by_position(
    mut entries: Vec<(usize, usize)>,
    what: &str,
) -> Result<Vec<usize>, RankError> {
    entries.sort_unstable();
    for (expected, &(pos, _)) in entries.iter().enumerate() {
        if pos != expected {
            return Err(RankError::Format(format!(
                "{what} positions are not contiguous from 0"
            )));
        }
    }
    Ok(entries.into_iter().map(|(_, item)| item).collect())
}

fn parse_int<T: FromStr>(value: &str, what: &str) -> Result<T, RankError> {
    value
        .trim()
        .parse()
        .map_err(|_| RankError::Format(format!("`{what}` is not a non-negative integer: `{value}`")))
}

fn parse_opt_int<T: FromStr>(value: &str, what: &str) -> Result<Option<T>, RankError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    parse_int(value, what).map(Some)
}

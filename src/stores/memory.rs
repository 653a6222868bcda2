//! An in-memory reference backend over [`std::collections::BTreeMap`],
//! one tree per table behind a [`RwLock`].
//!
//! It implements the whole record-store interface, including secondary
//! lookups, compound ranges and aggregations, by brute force over the tree.
//! That makes it slow and entirely unrepresentative as a system under test,
//! but exact: the integration tests drive workloads against it and check
//! what comes back.
//!
//! ## Configuration Format
//!
//! ```toml
//! [store]
//! name = "memory"
//! ```

use crate::stores::Registry;
use crate::{Backend, BackendHandle, FieldValue, GroupRow, Record, Reducer, Status};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

type Table = BTreeMap<String, Record>;

#[derive(Clone)]
pub struct MemoryBackend {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn new_backend(_opt: &toml::Table) -> Arc<dyn Backend> {
        Arc::new(Self::new())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn handle(&self) -> Box<dyn BackendHandle> {
        Box::new(self.clone())
    }
}

fn project(record: &Record, fields: Option<&[String]>) -> Record {
    match fields {
        None => record.clone(),
        Some(fields) => fields
            .iter()
            .filter_map(|f| record.get(f).map(|v| (f.clone(), v.clone())))
            .collect(),
    }
}

fn in_range(value: &FieldValue, lower: &FieldValue, upper: &FieldValue) -> bool {
    lower <= value && value <= upper
}

/// Fold the `intkey` amounts of one group with the configured reducer. The
/// reduced field is this adapter's choice, mirroring what a real document
/// store would be told to sum over.
fn reduce(reducer: Reducer, amounts: &[f64]) -> f64 {
    match reducer {
        Reducer::Sum => amounts.iter().sum(),
        Reducer::Avg => amounts.iter().sum::<f64>() / amounts.len() as f64,
        Reducer::First => amounts[0],
        Reducer::Last => amounts[amounts.len() - 1],
        Reducer::Min => amounts.iter().copied().fold(f64::INFINITY, f64::min),
        Reducer::Max => amounts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Reducer::Count => amounts.len() as f64,
    }
}

impl BackendHandle for MemoryBackend {
    fn insert(&mut self, table: &str, key: &str, record: Record) -> Status {
        let mut tables = self.tables.write();
        tables
            .entry_ref(table)
            .or_default()
            .insert(key.to_string(), record);
        Status::OK
    }

    fn read(&mut self, table: &str, key: &str, fields: Option<&[String]>) -> (Status, Record) {
        let tables = self.tables.read();
        match tables.get(table).and_then(|t| t.get(key)) {
            Some(record) => (Status::OK, project(record, fields)),
            None => (Status::ERROR, Record::new()),
        }
    }

    fn read_by(
        &mut self,
        table: &str,
        field: &str,
        value: &FieldValue,
        fields: Option<&[String]>,
    ) -> (Status, Record) {
        let tables = self.tables.read();
        let hit = tables
            .get(table)
            .and_then(|t| t.values().find(|r| r.get(field) == Some(value)));
        match hit {
            Some(record) => (Status::OK, project(record, fields)),
            None => (Status::ERROR, Record::new()),
        }
    }

    fn read_range(
        &mut self,
        table: &str,
        eq_field: &str,
        eq_value: &FieldValue,
        range_field: &str,
        lower: &FieldValue,
        upper: &FieldValue,
        fields: Option<&[String]>,
    ) -> (Status, Record) {
        let tables = self.tables.read();
        let hit = tables.get(table).and_then(|t| {
            t.values().find(|r| {
                r.get(eq_field) == Some(eq_value)
                    && r.get(range_field)
                        .map(|v| in_range(v, lower, upper))
                        .unwrap_or(false)
            })
        });
        match hit {
            Some(record) => (Status::OK, project(record, fields)),
            None => (Status::ERROR, Record::new()),
        }
    }

    fn update(&mut self, table: &str, key: &str, record: Record) -> Status {
        let mut tables = self.tables.write();
        match tables.get_mut(table).and_then(|t| t.get_mut(key)) {
            Some(existing) => {
                existing.extend(record);
                Status::OK
            }
            None => Status::ERROR,
        }
    }

    fn scan(
        &mut self,
        table: &str,
        start_key: &str,
        count: usize,
        fields: Option<&[String]>,
    ) -> (Status, Vec<Record>) {
        let tables = self.tables.read();
        let rows = match tables.get(table) {
            Some(t) => t
                .range(start_key.to_string()..)
                .take(count)
                .map(|(_, r)| project(r, fields))
                .collect(),
            None => Vec::new(),
        };
        (Status::OK, rows)
    }

    fn scan_by(
        &mut self,
        table: &str,
        field: &str,
        start: &FieldValue,
        count: usize,
        fields: Option<&[String]>,
    ) -> (Status, Vec<Record>) {
        let tables = self.tables.read();
        let rows = match tables.get(table) {
            Some(t) => {
                let mut rows: Vec<&Record> = t
                    .values()
                    .filter(|r| r.get(field).map(|v| v >= start).unwrap_or(false))
                    .collect();
                rows.sort_by(|a, b| a[field].cmp(&b[field]));
                rows.into_iter()
                    .take(count)
                    .map(|r| project(r, fields))
                    .collect()
            }
            None => Vec::new(),
        };
        (Status::OK, rows)
    }

    fn scan_range(
        &mut self,
        table: &str,
        eq_field: &str,
        eq_value: &FieldValue,
        range_field: &str,
        lower: &FieldValue,
        upper: &FieldValue,
        count: usize,
        fields: Option<&[String]>,
    ) -> (Status, Vec<Record>) {
        let tables = self.tables.read();
        let rows = match tables.get(table) {
            Some(t) => {
                let mut rows: Vec<&Record> = t
                    .values()
                    .filter(|r| {
                        r.get(eq_field) == Some(eq_value)
                            && r.get(range_field)
                                .map(|v| in_range(v, lower, upper))
                                .unwrap_or(false)
                    })
                    .collect();
                rows.sort_by(|a, b| a[range_field].cmp(&b[range_field]));
                rows.into_iter()
                    .take(count)
                    .map(|r| project(r, fields))
                    .collect()
            }
            None => Vec::new(),
        };
        (Status::OK, rows)
    }

    fn group(&mut self, table: &str, group_field: &str, limit: usize) -> (Status, Vec<GroupRow>) {
        let tables = self.tables.read();
        let mut counts: BTreeMap<FieldValue, u64> = BTreeMap::new();
        if let Some(t) = tables.get(table) {
            for record in t.values().take(limit) {
                if let Some(value) = record.get(group_field) {
                    *counts.entry(value.clone()).or_insert(0) += 1;
                }
            }
        }
        let rows = counts
            .into_iter()
            .map(|(key, count)| GroupRow {
                key,
                value: count as f64,
            })
            .collect();
        (Status::OK, rows)
    }

    fn group_filtered(
        &mut self,
        table: &str,
        match_field: &str,
        lower: &FieldValue,
        upper: &FieldValue,
        limit: usize,
        group_field: &str,
        reducer: Reducer,
        top_n: usize,
    ) -> (Status, Vec<GroupRow>) {
        let tables = self.tables.read();
        let mut amounts: BTreeMap<FieldValue, Vec<f64>> = BTreeMap::new();
        if let Some(t) = tables.get(table) {
            let matched = t
                .values()
                .filter(|r| {
                    r.get(match_field)
                        .map(|v| in_range(v, lower, upper))
                        .unwrap_or(false)
                })
                .take(limit);
            for record in matched {
                let Some(group) = record.get(group_field) else {
                    continue;
                };
                let Some(FieldValue::Integer(amount)) = record.get("intkey") else {
                    continue;
                };
                amounts
                    .entry(group.clone())
                    .or_default()
                    .push(*amount as f64);
            }
        }
        let mut rows: Vec<GroupRow> = amounts
            .into_iter()
            .map(|(key, amounts)| GroupRow {
                key,
                value: reduce(reducer, &amounts),
            })
            .collect();
        rows.sort_by(|a, b| b.value.total_cmp(&a.value));
        rows.truncate(top_n);
        (Status::OK, rows)
    }
}

inventory::submit! {
    Registry::new("memory", MemoryBackend::new_backend)
}

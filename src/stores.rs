//! Adapters for built-in and external storage backends.
//!
//! ## Built-in Stores
//!
//! - `null`: accepts every operation and returns nothing. Useful to measure
//!   the overhead of the workload engine itself.
//! - `memory`: a lock-protected in-memory table that implements the whole
//!   record-store interface, including secondary lookups and aggregations.
//!   Used by the integration tests and handy for smoke runs.
//!
//! ## Registering New Stores
//!
//! To benchmark your own storage backend, implement [`Backend`] and
//! [`BackendHandle`] for it, write a constructor function with a signature
//! of `fn(&toml::Table) -> Arc<dyn Backend>`, and register it with
//! [`inventory`]: `inventory::submit! { Registry::new("name",
//! constructor_fn) };`. The built-in stores are small examples of the whole
//! process.

use crate::Backend;
use hashbrown::HashMap;
use log::debug;
use serde::Deserialize;
use std::sync::Arc;
use toml::Table;

/// The centralized registry that maps a backend name to its constructor.
///
/// A user-defined adapter can use the [`inventory::submit!`] macro to make
/// its store available to benchmark configurations.
pub struct Registry<'a> {
    pub(crate) name: &'a str,
    constructor: fn(&Table) -> Arc<dyn Backend>,
}

impl<'a> Registry<'a> {
    pub const fn new(name: &'a str, constructor: fn(&Table) -> Arc<dyn Backend>) -> Self {
        Self { name, constructor }
    }
}

inventory::collect!(Registry<'static>);

/// The `[store]` section of a configuration: the adapter's registered name
/// plus whatever extra options that adapter understands.
#[derive(Deserialize, Clone, Debug)]
pub(crate) struct StoreOpt {
    name: String,
    #[serde(flatten)]
    opt: Table,
}

pub(crate) fn new_backend(opt: &StoreOpt) -> Arc<dyn Backend> {
    let mut registered: HashMap<&'static str, fn(&Table) -> Arc<dyn Backend>> = HashMap::new();
    for r in inventory::iter::<Registry> {
        debug!("Adding supported store: {}", r.name);
        assert!(registered.insert(r.name, r.constructor).is_none());
    }
    let f = registered.get(opt.name.as_str()).unwrap_or_else(|| {
        panic!("store {} not found in registry", opt.name);
    });
    f(&opt.opt)
}

pub mod memory;
pub mod null;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldValue, Record, Reducer};

    fn record(fields: &[(&str, FieldValue)]) -> Record {
        fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn int(v: i64) -> FieldValue {
        FieldValue::Integer(v)
    }

    fn text(v: &str) -> FieldValue {
        FieldValue::Text(v.to_string())
    }

    fn bytes(v: &[u8]) -> FieldValue {
        FieldValue::Bytes(v.into())
    }

    fn seeded_memory() -> Box<dyn crate::BackendHandle> {
        let map = memory::MemoryBackend::new();
        let mut handle = map.handle();
        for i in 0..10i64 {
            let rec = record(&[
                ("field0", bytes(&[i as u8])),
                ("intkey", int(i % 3)),
                ("stringkey", text(if i < 5 { "amy" } else { "bob" })),
            ]);
            assert!(handle.insert("t", &format!("user{}", i), rec).is_ok());
        }
        handle
    }

    #[test]
    fn memory_read_and_update() {
        let mut handle = seeded_memory();
        let (status, rec) = handle.read("t", "user3", None);
        assert!(status.is_ok());
        assert_eq!(rec["intkey"], int(0));

        // subset projection
        let fields = vec!["field0".to_string()];
        let (status, rec) = handle.read("t", "user3", Some(&fields));
        assert!(status.is_ok());
        assert_eq!(rec.len(), 1);

        assert!(handle
            .update("t", "user3", record(&[("intkey", int(42))]))
            .is_ok());
        let (_, rec) = handle.read("t", "user3", None);
        assert_eq!(rec["intkey"], int(42));
        // untouched fields survive an update
        assert_eq!(rec["field0"], bytes(&[3]));

        let (status, _) = handle.read("t", "user99", None);
        assert!(!status.is_ok());
        assert!(!handle
            .update("t", "user99", record(&[("intkey", int(1))]))
            .is_ok());
    }

    #[test]
    fn memory_secondary_read() {
        let mut handle = seeded_memory();
        let (status, rec) = handle.read_by("t", "intkey", &int(2), None);
        assert!(status.is_ok());
        assert_eq!(rec["intkey"], int(2));
        let (status, _) = handle.read_by("t", "intkey", &int(9), None);
        assert!(!status.is_ok());
    }

    #[test]
    fn memory_compound_read() {
        let mut handle = seeded_memory();
        let (status, rec) = handle.read_range(
            "t",
            "stringkey",
            &text("bob"),
            "intkey",
            &int(1),
            &int(2),
            None,
        );
        assert!(status.is_ok());
        assert_eq!(rec["stringkey"], text("bob"));
        let (status, _) = handle.read_range(
            "t",
            "stringkey",
            &text("carol"),
            "intkey",
            &int(0),
            &int(2),
            None,
        );
        assert!(!status.is_ok());
    }

    #[test]
    fn memory_scans() {
        let mut handle = seeded_memory();
        // key order: user0, user1, ... user9 (lexicographic on these keys)
        let (status, rows) = handle.scan("t", "user3", 4, None);
        assert!(status.is_ok());
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0]["field0"], bytes(&[3]));

        let (_, rows) = handle.scan("t", "user8", 10, None);
        assert_eq!(rows.len(), 2);

        let (_, rows) = handle.scan_by("t", "intkey", &int(2), 100, None);
        assert!(rows.iter().all(|r| r["intkey"] == int(2)));
        assert_eq!(rows.len(), 3);

        let (_, rows) = handle.scan_range(
            "t",
            "stringkey",
            &text("amy"),
            "intkey",
            &int(0),
            &int(1),
            100,
            None,
        );
        assert_eq!(rows.len(), 4);
        // ordered by the range field
        assert!(rows.windows(2).all(|w| w[0]["intkey"] <= w[1]["intkey"]));
    }

    #[test]
    fn memory_aggregates() {
        let mut handle = seeded_memory();
        let (status, groups) = handle.group("t", "intkey", 10);
        assert!(status.is_ok());
        // intkeys 0, 1, 2 with counts 4, 3, 3
        assert_eq!(groups.len(), 3);
        let total: f64 = groups.iter().map(|g| g.value).sum();
        assert_eq!(total, 10.0);

        let (status, groups) = handle.group_filtered(
            "t",
            "intkey",
            &int(0),
            &int(2),
            100,
            "stringkey",
            Reducer::Sum,
            20,
        );
        assert!(status.is_ok());
        assert_eq!(groups.len(), 2);
        // descending by reduced value: amy = 0+1+2+0+1 = 4, bob = 2+0+1+2 = 5
        assert!(groups[0].value >= groups[1].value);
        assert_eq!(groups[0].key, text("bob"));
        assert_eq!(groups[0].value, 5.0);

        let (_, groups) = handle.group_filtered(
            "t",
            "intkey",
            &int(0),
            &int(2),
            100,
            "stringkey",
            Reducer::Count,
            1,
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].value, 5.0);
    }

    #[test]
    fn memory_tables_are_independent() {
        let map = memory::MemoryBackend::new();
        let mut handle = map.handle();
        assert!(handle.insert("a", "k", record(&[("intkey", int(1))])).is_ok());
        let (status, _) = handle.read("b", "k", None);
        assert!(!status.is_ok());
    }

    #[test]
    fn null_returns_nothing() {
        let map = null::NullBackend::new();
        let mut handle = map.handle();
        assert!(handle.insert("t", "user0", Record::new()).is_ok());
        let (status, rec) = handle.read("t", "user0", None);
        assert!(status.is_ok());
        assert!(rec.is_empty());
        let (status, rows) = handle.scan("t", "user0", 10, None);
        assert!(status.is_ok());
        assert!(rows.is_empty());
    }
}

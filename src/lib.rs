//! A benchmark framework for record stores, driving statistically controlled
//! synthetic workloads against pluggable storage backends.
//!
//! With `docbench`, a benchmark is defined in TOML: the proportions of mixed
//! operations (point reads, secondary and compound-range lookups, updates,
//! inserts, scans, aggregations and read-modify-writes), the key access
//! pattern (uniform, zipfian, hotspot, latest or exponential), the shape of
//! the records written, and the phases to run. One shared workload engine is
//! driven concurrently by any number of worker threads; a load phase
//! populates the store and run phases issue transactions against it.
//!
//! You can also incorporate `docbench` into your own storage adapter crate.
//! All you need is implementing the [`Backend`] and [`BackendHandle`] traits
//! for your store. After registering the store, simply reuse the exported
//! [`cmdline()`] in your `main` function and it will work seamlessly with
//! your own adapter.
//!
//! A few key design choices include:
//!
//! - Records are maps from field names to tagged values ([`FieldValue`]):
//!   opaque byte payloads for the bulk fields, plus typed integer/string/date
//!   fields used by secondary and compound lookups. Consumers pattern-match;
//!   there are no untyped values.
//! - The storage backend and the benchmark configurations are black boxes,
//!   created dynamically from a TOML file and dynamically dispatched.
//! - Backend adapters can be registered from users' own crates without
//!   touching the source code of this crate.
//!
//! More detailed usage could be found in the module-level rustdocs:
//!
//! - [`mod@bench`] for the config format of a benchmark.
//! - [`mod@stores`] for the config format of a built-in storage backend.
//! - [`cmdline()`] for the usage of the default command line interface.

use chrono::NaiveDate;
use hashbrown::HashMap;

/// A single field value in a record.
///
/// The bulk `field<i>` payloads are always [`FieldValue::Bytes`]. When
/// extended fields are enabled, records additionally carry an `intkey`
/// ([`FieldValue::Integer`]), a `stringkey` ([`FieldValue::Text`]) and a
/// `datekey` ([`FieldValue::Date`]) used by secondary lookups, range filters
/// and aggregations.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldValue {
    Bytes(Box<[u8]>),
    Integer(i64),
    Text(String),
    Date(NaiveDate),
}

/// A record stored under a single key: a mapping from field name to value.
pub type Record = HashMap<String, FieldValue>;

/// The status code returned by every backend operation. Zero is success;
/// anything else is a backend-defined error. The engine never retries on a
/// non-zero status and never turns one into a panic, the codes are plain
/// data to be counted by whoever drives the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const ERROR: Status = Status(-1);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }
}

/// The function applied to each group during a complex aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reducer {
    Sum,
    Avg,
    First,
    Last,
    Min,
    Max,
    Count,
}

impl Reducer {
    /// Parse a reducer from its configuration name. An unknown name is a
    /// misconfiguration and aborts the run at init.
    pub fn parse(name: &str) -> Self {
        match name {
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "first" => Self::First,
            "last" => Self::Last,
            "min" => Self::Min,
            "max" => Self::Max,
            "count" => Self::Count,
            _ => panic!("unknown group function: {}", name),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::First => "first",
            Self::Last => "last",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }
}

/// One group produced by an aggregation: the grouping value and the reduced
/// numeric result for that group.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupRow {
    pub key: FieldValue,
    pub value: f64,
}

/// A synchronous, thread-safe storage backend.
///
/// This trait is used for owned backends, with which a per-thread handle can
/// be created. For most adapters this is just a cheap clone behind an `Arc`.
pub trait Backend: Send + Sync + 'static {
    /// Create a handle that can be moved into a worker thread.
    fn handle(&self) -> Box<dyn BackendHandle>;
}

/// A per-thread handle that references a [`Backend`].
///
/// The handle is the real object that exposes the record-store interface the
/// workload engine drives. All operations are synchronous and return a
/// [`Status`]; lookups also return whatever rows the backend produced. A
/// `fields` argument of `None` selects all fields of each matched record.
pub trait BackendHandle {
    /// Adding a new record under a key. The record may mix byte payloads and
    /// typed values; adapters decide how each variant is encoded.
    fn insert(&mut self, table: &str, key: &str, record: Record) -> Status;

    /// Retrieving a single record by its primary key.
    fn read(&mut self, table: &str, key: &str, fields: Option<&[String]>) -> (Status, Record);

    /// Retrieving the first record whose `field` equals `value`.
    fn read_by(
        &mut self,
        table: &str,
        field: &str,
        value: &FieldValue,
        fields: Option<&[String]>,
    ) -> (Status, Record);

    /// Retrieving the first record matching an equality on one field and a
    /// closed `[lower, upper]` range on another.
    #[allow(clippy::too_many_arguments)]
    fn read_range(
        &mut self,
        table: &str,
        eq_field: &str,
        eq_value: &FieldValue,
        range_field: &str,
        lower: &FieldValue,
        upper: &FieldValue,
        fields: Option<&[String]>,
    ) -> (Status, Record);

    /// Blindly updating the given fields of an existing record.
    fn update(&mut self, table: &str, key: &str, record: Record) -> Status;

    /// Forward range read of at most `count` records starting from the first
    /// key greater than or equal to `start_key`.
    fn scan(
        &mut self,
        table: &str,
        start_key: &str,
        count: usize,
        fields: Option<&[String]>,
    ) -> (Status, Vec<Record>);

    /// Forward range read of at most `count` records ordered by `field`,
    /// starting from the first value greater than or equal to `start`.
    fn scan_by(
        &mut self,
        table: &str,
        field: &str,
        start: &FieldValue,
        count: usize,
        fields: Option<&[String]>,
    ) -> (Status, Vec<Record>);

    /// Bounded read of records matching an equality plus a range filter,
    /// ordered by the range field.
    #[allow(clippy::too_many_arguments)]
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
    ) -> (Status, Vec<Record>);

    /// Group the first `limit` records by `group_field` and count each group.
    fn group(&mut self, table: &str, group_field: &str, limit: usize) -> (Status, Vec<GroupRow>);

    /// Filter at most `limit` records whose `match_field` falls in
    /// `[lower, upper]`, group them by `group_field`, reduce each group with
    /// `reducer`, and return the `top_n` groups by reduced value, descending.
    #[allow(clippy::too_many_arguments)]
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
    ) -> (Status, Vec<GroupRow>);
}

pub mod bench;
mod cmdline;
pub mod generator;
pub mod measurement;
pub mod stores;
pub mod workload;

pub use cmdline::cmdline;

pub extern crate inventory;
pub extern crate toml;

//! The workload engine: what operation to run, which records it touches,
//! and what data gets written.
//!
//! A [`Workload`] is built once from a [`WorkloadOpt`] and then shared by
//! every worker thread of a run. Each call to [`Workload::do_insert`] or
//! [`Workload::do_transaction`] produces exactly one storage operation:
//! the engine samples an operation kind from the configured mix, resolves
//! the key or key range it targets through the configured distribution,
//! synthesizes the payload, and hands everything to the backend handle the
//! worker owns. Operation outcomes are the backend's business; the engine
//! never retries and never fails a call.
//!
//! ## Configuration Format
//!
//! A workload is a TOML dictionary named `[workload]`. Only `record_count`
//! is mandatory; everything else has the defaults documented on
//! [`WorkloadOpt`]. For example:
//!
//! ```toml
//! [workload]
//! record_count = 100000
//! operation_count = 500000
//! read_proportion = 0.7
//! update_proportion = 0.1
//! insert_proportion = 0.1
//! read_modify_write_proportion = 0.1
//! request_dist = "zipfian"
//! ```

use crate::generator::{
    scramble, Counter, Discrete, Exponential, Histogram, Hotspot, Latest, NumberGenerator,
    Scrambled, Zipfian,
};
use crate::measurement::{MeasurementSink, READ_MODIFY_WRITE_EVENT};
use crate::{BackendHandle, FieldValue, Record, Reducer};
use chrono::NaiveDate;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use quanta::Instant;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;

/// The closed set of operations a transaction can be. The mix sampler only
/// ever yields members of this set, so dispatch is an exhaustive match with
/// no fallback arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    SecondaryRead,
    ComplexRead,
    Update,
    Insert,
    Scan,
    SecondaryScan,
    ComplexScan,
    Aggregate,
    ReadModifyWrite,
}

/// Which extended field secondary reads and scans look records up by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SecondaryField {
    IntKey,
    StringKey,
    DateKey,
}

impl SecondaryField {
    fn parse(name: &str) -> Self {
        match name {
            "intkey" => Self::IntKey,
            "stringkey" => Self::StringKey,
            "datekey" => Self::DateKey,
            _ => panic!("unknown secondary read field: {}", name),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::IntKey => "intkey",
            Self::StringKey => "stringkey",
            Self::DateKey => "datekey",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AggregateKind {
    Simple,
    Complex,
}

impl AggregateKind {
    fn parse(name: &str) -> Self {
        match name {
            "simple" => Self::Simple,
            "complex" => Self::Complex,
            _ => panic!("unknown aggregate type: {}", name),
        }
    }
}

/// Complex aggregations return only this many top groups.
const TOP_GROUPS: usize = 20;

/// A structure that can be deserialized from a TOML string, configuring one
/// workload. Every option except `record_count` is optional.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct WorkloadOpt {
    /// Name of the table all operations run against. Default: "records".
    pub table: Option<String>,

    /// Number of records the load phase inserts; also the initial keyspace
    /// bound for the transaction phase. Mandatory.
    pub record_count: Option<u64>,

    /// Expected number of operations in the run. Only used to size the
    /// zipfian key chooser's headroom for insert-heavy runs. Default: 0.
    pub operation_count: Option<u64>,

    /// Number of `field<i>` byte payload fields per record. Default: 10.
    pub field_count: Option<usize>,

    /// Field payload length (or its maximum, depending on the length
    /// distribution). Default: 100.
    pub field_length: Option<u64>,

    /// Distribution of payload lengths: "constant", "uniform", "zipfian"
    /// (favoring short payloads) or "histogram". Default: "constant".
    pub field_length_dist: Option<String>,

    /// Path of the histogram file, only used when `field_length_dist` is
    /// "histogram".
    pub field_length_histogram: Option<String>,

    /// Whether reads fetch all fields (true) or one random field (false).
    /// Default: true.
    pub read_all_fields: Option<bool>,

    /// Whether updates and read-modify-writes rewrite all fields (true) or
    /// one random field (false). Default: false.
    pub write_all_fields: Option<bool>,

    /// Section of the operation mix. Proportions are relative weights and
    /// need not sum to one. Defaults: reads 0.95, updates 0.05, rest 0.
    pub read_proportion: Option<f64>,
    pub secondary_read_proportion: Option<f64>,
    pub complex_read_proportion: Option<f64>,
    pub update_proportion: Option<f64>,
    pub insert_proportion: Option<f64>,
    pub scan_proportion: Option<f64>,
    pub secondary_scan_proportion: Option<f64>,
    pub complex_scan_proportion: Option<f64>,
    pub aggregate_proportion: Option<f64>,
    pub read_modify_write_proportion: Option<f64>,

    /// Distribution of requests across the keyspace: "uniform", "zipfian",
    /// "latest", "hotspot" or "exponential". Default: "uniform".
    pub request_dist: Option<String>,

    /// Hotspot parameters: the share of the keyspace that is hot and the
    /// share of operations that target it. Defaults: 0.2 and 0.8.
    pub hotspot_data_fraction: Option<f64>,
    pub hotspot_opn_fraction: Option<f64>,

    /// Exponential parameters: `exponential_percentile` percent of requests
    /// fall within the most recent `exponential_frac` share of the keyspace.
    /// Defaults: 95.0 and 0.8571428571.
    pub exponential_percentile: Option<f64>,
    pub exponential_frac: Option<f64>,

    /// Scan length bound and its distribution, "uniform" or "zipfian"
    /// (favoring short scans). Defaults: 1000 and "uniform".
    pub max_scan_length: Option<u64>,
    pub scan_length_dist: Option<String>,

    /// Whether records are inserted in "hashed" or "ordered" key order.
    /// Default: "hashed".
    pub insert_order: Option<String>,

    /// First key-number the load phase hands out. Default: 0.
    pub insert_start: Option<u64>,

    /// Whether records carry the typed `intkey`/`stringkey`/`datekey`
    /// fields that secondary, complex and aggregate operations rely on.
    /// Default: true.
    pub extended_fields: Option<bool>,

    /// Which extended field secondary reads/scans look up by: "intkey",
    /// "stringkey" or "datekey". Default: "intkey".
    pub secondary_read_field: Option<String>,

    /// Aggregation shape ("simple" or "complex"), the max records an
    /// aggregation touches, and the group reducer for complex aggregations
    /// (sum/avg/first/last/min/max/count). Defaults: "simple", 1000, "sum".
    pub aggregate_type: Option<String>,
    pub aggregate_record_count: Option<usize>,
    pub group_function: Option<String>,

    /// Distribution of the extended-field value domains ("uniform" or
    /// "zipfian") and the number of distinct values per domain.
    /// Defaults: "uniform" and 500 each.
    pub secondary_key_dist: Option<String>,
    pub distinct_int_keys: Option<u64>,
    pub distinct_string_keys: Option<u64>,
    pub distinct_date_keys: Option<u64>,
}

/// Generators for the typed extended fields, independent of the primary key
/// distribution. Only constructed when extended fields are enabled.
struct ExtendedFields {
    int_keys: NumberGenerator,
    string_keys: NumberGenerator,
    day_offsets: NumberGenerator,
    lb_day_offsets: NumberGenerator,
    ub_day_offsets: NumberGenerator,
    distinct_date_keys: u64,
}

/// All dates are day offsets from this fixed epoch, spread on both sides of
/// it so range filters exercise dates before and after.
fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2012, 2, 1).unwrap()
}

const FIRST_NAMES: [&str; 20] = [
    "james", "mary", "robert", "patricia", "john", "jennifer", "michael", "linda", "david",
    "elizabeth", "william", "barbara", "richard", "susan", "joseph", "jessica", "thomas", "karen",
    "charles", "sarah",
];

const LAST_NAMES: [&str; 25] = [
    "smith", "johnson", "williams", "brown", "jones", "garcia", "miller", "davis", "rodriguez",
    "martinez", "hernandez", "lopez", "gonzalez", "wilson", "anderson", "thomas", "taylor",
    "moore", "jackson", "martin", "lee", "perez", "thompson", "white", "harris",
];

/// Render a drawn seed as a pseudo-name. Seeds below
/// `FIRST_NAMES.len() * LAST_NAMES.len()` map to distinct names, which
/// covers the default distinct-value domain exactly.
fn pseudo_name(seed: u64) -> String {
    let first = FIRST_NAMES[(seed as usize) % FIRST_NAMES.len()];
    let last = LAST_NAMES[(seed as usize / FIRST_NAMES.len()) % LAST_NAMES.len()];
    format!("{} {}", first, last)
}

impl ExtendedFields {
    fn new(opt: &WorkloadOpt) -> Self {
        let dist = opt.secondary_key_dist.as_deref().unwrap_or("uniform");
        let int_keys = Self::domain(dist, opt.distinct_int_keys.unwrap_or(500));
        let string_keys = Self::domain(dist, opt.distinct_string_keys.unwrap_or(500));
        let distinct_date_keys = opt.distinct_date_keys.unwrap_or(500);
        assert!(
            distinct_date_keys >= 2,
            "distinct_date_keys should be at least 2"
        );
        // range bounds draw from the bottom 40% and top 40% of the offset
        // domain, so a drawn lower bound always precedes a drawn upper bound
        let lb_max = ((distinct_date_keys as f64 * 0.40) as u64).max(1);
        let ub_min = 1 + (distinct_date_keys as f64 * 0.60) as u64;
        Self {
            int_keys,
            string_keys,
            day_offsets: NumberGenerator::uniform(1, distinct_date_keys),
            lb_day_offsets: NumberGenerator::uniform(1, lb_max),
            ub_day_offsets: NumberGenerator::uniform(ub_min, distinct_date_keys),
            distinct_date_keys,
        }
    }

    fn domain(dist: &str, distinct: u64) -> NumberGenerator {
        match dist {
            "uniform" => NumberGenerator::uniform(1, distinct),
            "zipfian" => NumberGenerator::Zipfian(Zipfian::new(1, distinct, Zipfian::DEFAULT_THETA)),
            _ => panic!("distribution {} not allowed for secondary keys", dist),
        }
    }

    /// Offsets in the lower half of the domain map to dates before the
    /// epoch, the upper half after it.
    fn date_for(&self, offset: u64) -> NaiveDate {
        let days = if offset < self.distinct_date_keys / 2 {
            offset as i64 - self.distinct_date_keys as i64
        } else {
            offset as i64
        };
        base_date() + chrono::Duration::days(days)
    }

    fn int_value(&self, rng: &mut impl Rng) -> FieldValue {
        FieldValue::Integer(self.int_keys.next(rng) as i64)
    }

    fn string_value(&self, rng: &mut impl Rng) -> FieldValue {
        FieldValue::Text(pseudo_name(self.string_keys.next(rng)))
    }

    fn date_value(&self, rng: &mut impl Rng) -> FieldValue {
        FieldValue::Date(self.date_for(self.day_offsets.next(rng)))
    }

    fn date_lower_bound(&self, rng: &mut impl Rng) -> FieldValue {
        FieldValue::Date(self.date_for(self.lb_day_offsets.next(rng)))
    }

    fn date_upper_bound(&self, rng: &mut impl Rng) -> FieldValue {
        FieldValue::Date(self.date_for(self.ub_day_offsets.next(rng)))
    }
}

/// The workload engine. One instance per run, shared by all workers; every
/// piece of configuration is fixed at construction and the only mutable
/// state is the pair of insert counters and the generators' internals.
pub struct Workload {
    table: String,
    record_count: u64,
    field_count: usize,
    field_len: NumberGenerator,
    read_all_fields: bool,
    write_all_fields: bool,
    mix: Discrete<OperationKind>,
    key_chooser: NumberGenerator,
    key_sequence: Counter,
    txn_insert_sequence: Arc<Counter>,
    scan_len: NumberGenerator,
    hashed_keys: bool,
    extended: Option<ExtendedFields>,
    secondary_field: SecondaryField,
    aggregate_kind: AggregateKind,
    aggregate_record_count: usize,
    reducer: Reducer,
    sink: Arc<dyn MeasurementSink>,
}

impl Workload {
    pub fn new(opt: &WorkloadOpt, sink: Arc<dyn MeasurementSink>) -> Self {
        let record_count = opt.record_count.expect("record_count should be specified");
        assert!(record_count > 0, "record_count should be positive");
        let field_count = opt.field_count.unwrap_or(10);
        assert!(field_count > 0, "field_count should be positive");

        let field_len = Self::field_length_generator(opt);

        let read_proportion = opt.read_proportion.unwrap_or(0.95);
        let secondary_read_proportion = opt.secondary_read_proportion.unwrap_or(0.0);
        let complex_read_proportion = opt.complex_read_proportion.unwrap_or(0.0);
        let update_proportion = opt.update_proportion.unwrap_or(0.05);
        let insert_proportion = opt.insert_proportion.unwrap_or(0.0);
        let scan_proportion = opt.scan_proportion.unwrap_or(0.0);
        let secondary_scan_proportion = opt.secondary_scan_proportion.unwrap_or(0.0);
        let complex_scan_proportion = opt.complex_scan_proportion.unwrap_or(0.0);
        let aggregate_proportion = opt.aggregate_proportion.unwrap_or(0.0);
        let read_modify_write_proportion = opt.read_modify_write_proportion.unwrap_or(0.0);

        let mix = Discrete::new(&[
            (read_proportion, OperationKind::Read),
            (secondary_read_proportion, OperationKind::SecondaryRead),
            (complex_read_proportion, OperationKind::ComplexRead),
            (update_proportion, OperationKind::Update),
            (insert_proportion, OperationKind::Insert),
            (scan_proportion, OperationKind::Scan),
            (secondary_scan_proportion, OperationKind::SecondaryScan),
            (aggregate_proportion, OperationKind::Aggregate),
            (complex_scan_proportion, OperationKind::ComplexScan),
            (read_modify_write_proportion, OperationKind::ReadModifyWrite),
        ]);

        let extended = match opt.extended_fields.unwrap_or(true) {
            true => Some(ExtendedFields::new(opt)),
            false => {
                let typed = secondary_read_proportion
                    + complex_read_proportion
                    + secondary_scan_proportion
                    + complex_scan_proportion
                    + aggregate_proportion;
                assert!(
                    typed == 0.0,
                    "secondary, complex and aggregate operations require extended_fields"
                );
                None
            }
        };

        // transaction-phase inserts always append past the loaded keyspace,
        // and this counter is the authoritative bound on what exists
        let txn_insert_sequence = Arc::new(Counter::new(record_count));

        let key_chooser = match opt.request_dist.as_deref().unwrap_or("uniform") {
            "uniform" => NumberGenerator::uniform(0, record_count - 1),
            "zipfian" => {
                // the chooser is sized against a predicted final keyspace so
                // that growth during the run does not shift which keys are
                // popular; out-of-range picks are rejected in next_keynum
                let operation_count = opt.operation_count.unwrap_or(0);
                let expected_new =
                    (operation_count as f64 * insert_proportion * 2.0) as u64;
                NumberGenerator::Scrambled(Scrambled::new(0, record_count + expected_new - 1))
            }
            "latest" => NumberGenerator::Latest(Latest::new(txn_insert_sequence.clone())),
            "hotspot" => NumberGenerator::Hotspot(Hotspot::new(
                0,
                record_count - 1,
                opt.hotspot_data_fraction.unwrap_or(0.2),
                opt.hotspot_opn_fraction.unwrap_or(0.8),
            )),
            "exponential" => NumberGenerator::Exponential(Exponential::new(
                opt.exponential_percentile.unwrap_or(95.0),
                record_count as f64 * opt.exponential_frac.unwrap_or(0.8571428571),
            )),
            dist => panic!("unknown request distribution: {}", dist),
        };

        let max_scan_length = opt.max_scan_length.unwrap_or(1000);
        let scan_len = match opt.scan_length_dist.as_deref().unwrap_or("uniform") {
            "uniform" => NumberGenerator::uniform(1, max_scan_length),
            "zipfian" => {
                NumberGenerator::Zipfian(Zipfian::new(1, max_scan_length, Zipfian::DEFAULT_THETA))
            }
            dist => panic!("distribution {} not allowed for scan length", dist),
        };

        let hashed_keys = match opt.insert_order.as_deref().unwrap_or("hashed") {
            "hashed" => true,
            "ordered" => false,
            order => panic!("insert order should be one of: ordered, hashed, got {}", order),
        };

        Self {
            table: opt.table.clone().unwrap_or_else(|| "records".to_string()),
            record_count,
            field_count,
            field_len,
            read_all_fields: opt.read_all_fields.unwrap_or(true),
            write_all_fields: opt.write_all_fields.unwrap_or(false),
            mix,
            key_chooser,
            key_sequence: Counter::new(opt.insert_start.unwrap_or(0)),
            txn_insert_sequence,
            scan_len,
            hashed_keys,
            extended,
            secondary_field: SecondaryField::parse(
                opt.secondary_read_field.as_deref().unwrap_or("intkey"),
            ),
            aggregate_kind: AggregateKind::parse(opt.aggregate_type.as_deref().unwrap_or("simple")),
            aggregate_record_count: opt.aggregate_record_count.unwrap_or(1000),
            reducer: Reducer::parse(opt.group_function.as_deref().unwrap_or("sum")),
            sink,
        }
    }

    /// Build a workload from a TOML string, with environment variables
    /// allowed to override any option. Measurements go nowhere; use
    /// [`Workload::new`] to attach a real sink.
    pub fn new_from_toml_str(text: &str) -> Self {
        let opt: WorkloadOpt = Figment::new()
            .merge(Toml::string(text))
            .merge(Env::raw())
            .extract()
            .unwrap();
        Self::new(&opt, Arc::new(crate::measurement::NullSink))
    }

    fn field_length_generator(opt: &WorkloadOpt) -> NumberGenerator {
        let field_length = opt.field_length.unwrap_or(100);
        match opt.field_length_dist.as_deref().unwrap_or("constant") {
            "constant" => NumberGenerator::Constant(field_length),
            "uniform" => NumberGenerator::uniform(1, field_length),
            "zipfian" => {
                NumberGenerator::Zipfian(Zipfian::new(1, field_length, Zipfian::DEFAULT_THETA))
            }
            "histogram" => {
                let path = opt
                    .field_length_histogram
                    .as_deref()
                    .expect("field_length_histogram should be specified");
                NumberGenerator::Histogram(Histogram::from_file(path))
            }
            dist => panic!("unknown field length distribution: {}", dist),
        }
    }

    /// The number of records the load phase is expected to insert.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Map a key-number to its record key. Pure: the same key-number always
    /// renders the same key within a run.
    pub fn key_name(&self, keynum: u64) -> String {
        let keynum = match self.hashed_keys {
            true => scramble(keynum),
            false => keynum,
        };
        format!("user{}", keynum)
    }

    fn extended_fields(&self) -> &ExtendedFields {
        // checked at init; reaching this without them is a defect
        self.extended
            .as_ref()
            .expect("extended fields are disabled")
    }

    fn random_field_name(&self, rng: &mut impl Rng) -> String {
        format!("field{}", rng.gen_range(0..self.field_count))
    }

    fn field_subset(&self, rng: &mut impl Rng) -> Option<Vec<String>> {
        match self.read_all_fields {
            true => None,
            false => Some(vec![self.random_field_name(rng)]),
        }
    }

    fn random_payload(&self, rng: &mut impl Rng) -> FieldValue {
        let len = self.field_len.next(rng) as usize;
        let mut buf = vec![0u8; len];
        rng.fill(&mut buf[..]);
        FieldValue::Bytes(buf.into_boxed_slice())
    }

    /// A full record: every byte payload field, plus the typed extended
    /// fields when enabled.
    fn build_record(&self, rng: &mut impl Rng) -> Record {
        let mut record = Record::with_capacity(self.field_count + 3);
        if let Some(ext) = &self.extended {
            record.insert("intkey".to_string(), ext.int_value(rng));
            record.insert("stringkey".to_string(), ext.string_value(rng));
            record.insert("datekey".to_string(), ext.date_value(rng));
        }
        for i in 0..self.field_count {
            record.insert(format!("field{}", i), self.random_payload(rng));
        }
        record
    }

    /// A single-field update targeting one uniformly chosen payload field.
    fn build_update(&self, rng: &mut impl Rng) -> Record {
        let mut record = Record::with_capacity(1);
        record.insert(self.random_field_name(rng), self.random_payload(rng));
        record
    }

    fn secondary_value(&self, rng: &mut impl Rng) -> FieldValue {
        let ext = self.extended_fields();
        match self.secondary_field {
            SecondaryField::IntKey => ext.int_value(rng),
            SecondaryField::StringKey => ext.string_value(rng),
            SecondaryField::DateKey => ext.date_value(rng),
        }
    }

    /// A key-number that is guaranteed to reference an already inserted
    /// record. The exponential chooser draws an offset counted back from the
    /// newest insert; every other chooser is rejection-sampled against the
    /// current keyspace bound, since it may be configured over a predicted
    /// larger keyspace.
    fn next_keynum(&self, rng: &mut impl Rng) -> u64 {
        let bound = self.txn_insert_sequence.last();
        if let NumberGenerator::Exponential(_) = self.key_chooser {
            loop {
                let offset = self.key_chooser.next(rng);
                if offset <= bound {
                    return bound - offset;
                }
            }
        }
        loop {
            let keynum = self.key_chooser.next(rng);
            if keynum <= bound {
                return keynum;
            }
        }
    }

    /// Do one insert operation of the load phase. Thread-safe; each call
    /// claims a fresh key-number. Returns whether the backend accepted it.
    pub fn do_insert(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) -> bool {
        let keynum = self.key_sequence.next();
        let key = self.key_name(keynum);
        let record = self.build_record(rng);
        db.insert(&self.table, &key, record).is_ok()
    }

    /// Do one transaction operation. Thread-safe. Always returns true:
    /// per-operation failures live in the backend's status codes, not in
    /// this engine's control flow.
    pub fn do_transaction(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) -> bool {
        match self.mix.next(rng) {
            OperationKind::Read => self.transaction_read(db, rng),
            OperationKind::SecondaryRead => self.transaction_secondary_read(db, rng),
            OperationKind::ComplexRead => self.transaction_complex_read(db, rng),
            OperationKind::Update => self.transaction_update(db, rng),
            OperationKind::Insert => self.transaction_insert(db, rng),
            OperationKind::Scan => self.transaction_scan(db, rng),
            OperationKind::SecondaryScan => self.transaction_secondary_scan(db, rng),
            OperationKind::ComplexScan => self.transaction_complex_scan(db, rng),
            OperationKind::Aggregate => self.transaction_aggregate(db, rng),
            OperationKind::ReadModifyWrite => self.transaction_read_modify_write(db, rng),
        }
        true
    }

    fn transaction_read(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) {
        let key = self.key_name(self.next_keynum(rng));
        let fields = self.field_subset(rng);
        let _ = db.read(&self.table, &key, fields.as_deref());
    }

    fn transaction_secondary_read(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) {
        let fields = self.field_subset(rng);
        let value = self.secondary_value(rng);
        let _ = db.read_by(
            &self.table,
            self.secondary_field.name(),
            &value,
            fields.as_deref(),
        );
    }

    fn transaction_complex_read(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) {
        let fields = self.field_subset(rng);
        let ext = self.extended_fields();
        let eq_value = ext.int_value(rng);
        let lower = ext.date_lower_bound(rng);
        let upper = ext.date_upper_bound(rng);
        let _ = db.read_range(
            &self.table,
            "intkey",
            &eq_value,
            "datekey",
            &lower,
            &upper,
            fields.as_deref(),
        );
    }

    fn transaction_update(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) {
        let key = self.key_name(self.next_keynum(rng));
        let record = match self.write_all_fields {
            true => self.build_record(rng),
            false => self.build_update(rng),
        };
        let _ = db.update(&self.table, &key, record);
    }

    fn transaction_insert(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) {
        let keynum = self.txn_insert_sequence.next();
        let key = self.key_name(keynum);
        let record = self.build_record(rng);
        let _ = db.insert(&self.table, &key, record);
    }

    fn transaction_scan(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) {
        let key = self.key_name(self.next_keynum(rng));
        let len = self.scan_len.next(rng) as usize;
        let fields = self.field_subset(rng);
        let _ = db.scan(&self.table, &key, len, fields.as_deref());
    }

    fn transaction_secondary_scan(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) {
        let len = self.scan_len.next(rng) as usize;
        let fields = self.field_subset(rng);
        let start = self.secondary_value(rng);
        let _ = db.scan_by(
            &self.table,
            self.secondary_field.name(),
            &start,
            len,
            fields.as_deref(),
        );
    }

    fn transaction_complex_scan(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) {
        let len = self.scan_len.next(rng) as usize;
        let fields = self.field_subset(rng);
        let ext = self.extended_fields();
        let eq_value = ext.int_value(rng);
        let lower = ext.date_lower_bound(rng);
        let upper = ext.date_upper_bound(rng);
        let _ = db.scan_range(
            &self.table,
            "intkey",
            &eq_value,
            "datekey",
            &lower,
            &upper,
            len,
            fields.as_deref(),
        );
    }

    fn transaction_aggregate(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) {
        match self.aggregate_kind {
            AggregateKind::Simple => {
                // distinct intkeys over a randomly sized record window
                let limit = self.scan_len.next(rng) as usize;
                let _ = db.group(&self.table, "intkey", limit);
            }
            AggregateKind::Complex => {
                // per-name rollup of intkey over a random date range
                let ext = self.extended_fields();
                let lower = ext.date_lower_bound(rng);
                let upper = ext.date_upper_bound(rng);
                let _ = db.group_filtered(
                    &self.table,
                    "datekey",
                    &lower,
                    &upper,
                    self.aggregate_record_count,
                    "stringkey",
                    self.reducer,
                    TOP_GROUPS,
                );
            }
        }
    }

    fn transaction_read_modify_write(&self, db: &mut dyn BackendHandle, rng: &mut impl Rng) {
        let key = self.key_name(self.next_keynum(rng));
        let fields = self.field_subset(rng);
        let record = match self.write_all_fields {
            true => self.build_record(rng),
            false => self.build_update(rng),
        };

        let start = Instant::now();
        let _ = db.read(&self.table, &key, fields.as_deref());
        let _ = db.update(&self.table, &key, record);
        let elapsed = start.elapsed();

        self.sink
            .record(READ_MODIFY_WRITE_EVENT, elapsed.as_micros() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::LatencyRecorder;
    use crate::{GroupRow, Status};

    /// Records every call the engine makes, so tests can check operation
    /// shapes without a real store.
    #[derive(Default)]
    struct TraceBackend {
        inserts: Vec<String>,
        reads: Vec<(String, Option<usize>)>,
        reads_by: Vec<String>,
        reads_range: Vec<(String, String)>,
        updates: Vec<(String, usize)>,
        scans: Vec<(String, usize)>,
        scans_by: Vec<String>,
        scans_range: Vec<String>,
        groups: Vec<usize>,
        groups_filtered: Vec<(FieldValue, FieldValue)>,
    }

    impl BackendHandle for TraceBackend {
        fn insert(&mut self, _table: &str, key: &str, _record: Record) -> Status {
            self.inserts.push(key.to_string());
            Status::OK
        }

        fn read(&mut self, _t: &str, key: &str, fields: Option<&[String]>) -> (Status, Record) {
            self.reads.push((key.to_string(), fields.map(|f| f.len())));
            (Status::OK, Record::new())
        }

        fn read_by(
            &mut self,
            _t: &str,
            field: &str,
            _value: &FieldValue,
            _fields: Option<&[String]>,
        ) -> (Status, Record) {
            self.reads_by.push(field.to_string());
            (Status::OK, Record::new())
        }

        fn read_range(
            &mut self,
            _t: &str,
            eq_field: &str,
            _eq: &FieldValue,
            range_field: &str,
            lower: &FieldValue,
            upper: &FieldValue,
            _fields: Option<&[String]>,
        ) -> (Status, Record) {
            assert!(lower < upper);
            self.reads_range
                .push((eq_field.to_string(), range_field.to_string()));
            (Status::OK, Record::new())
        }

        fn update(&mut self, _t: &str, key: &str, record: Record) -> Status {
            self.updates.push((key.to_string(), record.len()));
            Status::OK
        }

        fn scan(
            &mut self,
            _t: &str,
            start_key: &str,
            count: usize,
            _fields: Option<&[String]>,
        ) -> (Status, Vec<Record>) {
            self.scans.push((start_key.to_string(), count));
            (Status::OK, Vec::new())
        }

        fn scan_by(
            &mut self,
            _t: &str,
            field: &str,
            _start: &FieldValue,
            _count: usize,
            _fields: Option<&[String]>,
        ) -> (Status, Vec<Record>) {
            self.scans_by.push(field.to_string());
            (Status::OK, Vec::new())
        }

        fn scan_range(
            &mut self,
            _t: &str,
            eq_field: &str,
            _eq: &FieldValue,
            _range_field: &str,
            lower: &FieldValue,
            upper: &FieldValue,
            _count: usize,
            _fields: Option<&[String]>,
        ) -> (Status, Vec<Record>) {
            assert!(lower < upper);
            self.scans_range.push(eq_field.to_string());
            (Status::OK, Vec::new())
        }

        fn group(&mut self, _t: &str, _field: &str, limit: usize) -> (Status, Vec<GroupRow>) {
            self.groups.push(limit);
            (Status::OK, Vec::new())
        }

        fn group_filtered(
            &mut self,
            _t: &str,
            _match_field: &str,
            lower: &FieldValue,
            upper: &FieldValue,
            _limit: usize,
            _group_field: &str,
            _reducer: Reducer,
            _top_n: usize,
        ) -> (Status, Vec<GroupRow>) {
            self.groups_filtered.push((lower.clone(), upper.clone()));
            (Status::OK, Vec::new())
        }
    }

    fn opt(toml: &str) -> WorkloadOpt {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .unwrap()
    }

    #[test]
    fn mix_follows_proportions() {
        let mut rng = rand::thread_rng();
        let workload = Workload::new_from_toml_str(
            r#"record_count = 100
               read_proportion = 0.5
               update_proportion = 0.3
               scan_proportion = 0.2"#,
        );
        let mut reads = 0u64;
        let mut updates = 0u64;
        let mut scans = 0u64;
        const N: u64 = 100_000;
        for _ in 0..N {
            match workload.mix.next(&mut rng) {
                OperationKind::Read => reads += 1,
                OperationKind::Update => updates += 1,
                OperationKind::Scan => scans += 1,
                kind => panic!("unexpected operation {:?}", kind),
            }
        }
        for (count, expected) in [(reads, 0.5), (updates, 0.3), (scans, 0.2)] {
            let freq = count as f64 / N as f64;
            assert!((freq - expected).abs() < 0.02, "freq {}", freq);
        }
    }

    #[test]
    fn key_name_is_pure() {
        let ordered = Workload::new_from_toml_str(
            r#"record_count = 10
               insert_order = "ordered""#,
        );
        assert_eq!(ordered.key_name(7), "user7");
        assert_eq!(ordered.key_name(7), ordered.key_name(7));

        let hashed = Workload::new_from_toml_str("record_count = 10");
        assert_eq!(hashed.key_name(0), hashed.key_name(0));
        assert_ne!(hashed.key_name(0), hashed.key_name(1));
        // scrambled, not the identity
        assert_ne!(hashed.key_name(0), "user0");
    }

    #[test]
    fn record_shape_with_extended_fields() {
        let mut rng = rand::thread_rng();
        let workload = Workload::new_from_toml_str(
            r#"record_count = 10
               field_count = 4
               field_length = 32"#,
        );
        let record = workload.build_record(&mut rng);
        assert_eq!(record.len(), 7);
        for i in 0..4 {
            match &record[&format!("field{}", i)] {
                FieldValue::Bytes(b) => assert_eq!(b.len(), 32),
                v => panic!("field{} should be bytes, got {:?}", i, v),
            }
        }
        assert!(matches!(record["intkey"], FieldValue::Integer(_)));
        assert!(matches!(record["stringkey"], FieldValue::Text(_)));
        assert!(matches!(record["datekey"], FieldValue::Date(_)));
    }

    #[test]
    fn record_shape_plain() {
        let mut rng = rand::thread_rng();
        let workload = Workload::new_from_toml_str(
            r#"record_count = 10
               field_count = 3
               extended_fields = false"#,
        );
        let record = workload.build_record(&mut rng);
        assert_eq!(record.len(), 3);
        assert!(record.values().all(|v| matches!(v, FieldValue::Bytes(_))));
    }

    #[test]
    fn update_targets_one_field() {
        let mut rng = rand::thread_rng();
        let workload = Workload::new_from_toml_str(
            r#"record_count = 10
               field_count = 5"#,
        );
        for _ in 0..100 {
            let update = workload.build_update(&mut rng);
            assert_eq!(update.len(), 1);
            let name = update.keys().next().unwrap();
            let index: usize = name.strip_prefix("field").unwrap().parse().unwrap();
            assert!(index < 5);
        }
    }

    #[test]
    fn dates_straddle_the_epoch() {
        let mut rng = rand::thread_rng();
        let ext = ExtendedFields::new(&opt("record_count = 10"));
        let mut before = false;
        let mut after = false;
        for _ in 0..1000 {
            match ext.date_value(&mut rng) {
                FieldValue::Date(d) if d < base_date() => before = true,
                FieldValue::Date(_) => after = true,
                _ => unreachable!(),
            }
            let (lb, ub) = (ext.date_lower_bound(&mut rng), ext.date_upper_bound(&mut rng));
            assert!(lb < ub);
        }
        assert!(before && after, "dates should spread on both sides");
    }

    #[test]
    fn pseudo_names_are_distinct() {
        let names: std::collections::HashSet<String> = (1..=500).map(pseudo_name).collect();
        assert_eq!(names.len(), 500);
    }

    #[test]
    fn keynum_respects_keyspace_bound() {
        let mut rng = rand::thread_rng();
        for dist in ["uniform", "zipfian", "latest", "hotspot", "exponential"] {
            let workload = Workload::new_from_toml_str(&format!(
                r#"record_count = 100
                   operation_count = 1000
                   insert_proportion = 0.5
                   read_proportion = 0.5
                   request_dist = "{}""#,
                dist
            ));
            for _ in 0..10_000 {
                let keynum = workload.next_keynum(&mut rng);
                assert!(keynum < 100, "{} produced {}", dist, keynum);
            }
        }
    }

    #[test]
    fn read_only_run_issues_primary_reads() {
        let mut rng = rand::thread_rng();
        let mut db = TraceBackend::default();
        let workload = Workload::new_from_toml_str(
            r#"record_count = 10
               field_count = 3
               read_proportion = 1.0
               update_proportion = 0.0
               insert_order = "ordered""#,
        );

        for _ in 0..10 {
            assert!(workload.do_insert(&mut db, &mut rng));
        }
        let expected: Vec<String> = (0..10).map(|i| format!("user{}", i)).collect();
        assert_eq!(db.inserts, expected);

        for _ in 0..100 {
            assert!(workload.do_transaction(&mut db, &mut rng));
        }
        assert_eq!(db.reads.len(), 100);
        for (key, fields) in &db.reads {
            let keynum: u64 = key.strip_prefix("user").unwrap().parse().unwrap();
            assert!(keynum < 10);
            // read_all_fields defaults to true: no field subset
            assert_eq!(*fields, None);
        }
    }

    #[test]
    fn transaction_inserts_append_to_keyspace() {
        let mut rng = rand::thread_rng();
        let mut db = TraceBackend::default();
        let workload = Workload::new_from_toml_str(
            r#"record_count = 10
               insert_proportion = 1.0
               read_proportion = 0.0
               update_proportion = 0.0
               insert_order = "ordered""#,
        );
        for _ in 0..5 {
            workload.do_transaction(&mut db, &mut rng);
        }
        let expected: Vec<String> = (10..15).map(|i| format!("user{}", i)).collect();
        assert_eq!(db.inserts, expected);
        assert_eq!(workload.txn_insert_sequence.last(), 14);
    }

    #[test]
    fn every_operation_kind_reaches_the_backend() {
        let mut rng = rand::thread_rng();
        let mut db = TraceBackend::default();
        let workload = Workload::new_from_toml_str(
            r#"record_count = 100
               read_proportion = 0.1
               secondary_read_proportion = 0.1
               complex_read_proportion = 0.1
               update_proportion = 0.1
               insert_proportion = 0.1
               scan_proportion = 0.1
               secondary_scan_proportion = 0.1
               complex_scan_proportion = 0.1
               aggregate_proportion = 0.1
               read_modify_write_proportion = 0.1
               max_scan_length = 50"#,
        );
        for _ in 0..2000 {
            workload.do_transaction(&mut db, &mut rng);
        }
        assert!(!db.reads.is_empty());
        assert!(!db.reads_by.is_empty());
        assert!(!db.reads_range.is_empty());
        assert!(!db.updates.is_empty());
        assert!(!db.inserts.is_empty());
        assert!(!db.scans.is_empty());
        assert!(!db.scans_by.is_empty());
        assert!(!db.scans_range.is_empty());
        assert!(!db.groups.is_empty());
        for (_, len) in &db.scans {
            assert!((1..=50).contains(len));
        }
        for field in &db.reads_by {
            assert_eq!(field, "intkey");
        }
    }

    #[test]
    fn complex_aggregate_draws_a_date_range() {
        let mut rng = rand::thread_rng();
        let mut db = TraceBackend::default();
        let workload = Workload::new_from_toml_str(
            r#"record_count = 100
               aggregate_proportion = 1.0
               read_proportion = 0.0
               update_proportion = 0.0
               aggregate_type = "complex"
               group_function = "avg""#,
        );
        for _ in 0..10 {
            workload.do_transaction(&mut db, &mut rng);
        }
        assert_eq!(db.groups_filtered.len(), 10);
        for (lower, upper) in &db.groups_filtered {
            assert!(lower < upper);
        }
    }

    #[test]
    fn read_modify_write_reports_latency() {
        let mut rng = rand::thread_rng();
        let mut db = TraceBackend::default();
        let sink = Arc::new(LatencyRecorder::new());
        let opt = opt(
            r#"record_count = 10
               read_modify_write_proportion = 1.0
               read_proportion = 0.0
               update_proportion = 0.0"#,
        );
        let workload = Workload::new(&opt, sink.clone());
        for _ in 0..20 {
            workload.do_transaction(&mut db, &mut rng);
        }
        assert_eq!(db.reads.len(), 20);
        assert_eq!(db.updates.len(), 20);
        assert!(!sink.is_empty());
        assert!(sink.summaries()[0].starts_with("event READ-MODIFY-WRITE count 20"));
    }

    #[test]
    fn single_field_reads_when_not_all_fields() {
        let mut rng = rand::thread_rng();
        let mut db = TraceBackend::default();
        let workload = Workload::new_from_toml_str(
            r#"record_count = 10
               read_all_fields = false
               read_proportion = 1.0
               update_proportion = 0.0"#,
        );
        for _ in 0..50 {
            workload.do_transaction(&mut db, &mut rng);
        }
        assert!(db.reads.iter().all(|(_, fields)| *fields == Some(1)));
    }

    #[test]
    #[should_panic(expected = "record_count should be specified")]
    fn missing_record_count() {
        let _ = Workload::new_from_toml_str("field_count = 3");
    }

    #[test]
    #[should_panic(expected = "unknown request distribution")]
    fn invalid_request_dist() {
        let _ = Workload::new_from_toml_str(
            r#"record_count = 10
               request_dist = "gaussian""#,
        );
    }

    #[test]
    #[should_panic(expected = "not allowed for scan length")]
    fn invalid_scan_length_dist() {
        let _ = Workload::new_from_toml_str(
            r#"record_count = 10
               scan_length_dist = "latest""#,
        );
    }

    #[test]
    #[should_panic(expected = "unknown group function")]
    fn invalid_group_function() {
        let _ = Workload::new_from_toml_str(
            r#"record_count = 10
               group_function = "median""#,
        );
    }

    #[test]
    #[should_panic(expected = "unknown secondary read field")]
    fn invalid_secondary_field() {
        let _ = Workload::new_from_toml_str(
            r#"record_count = 10
               secondary_read_field = "floatkey""#,
        );
    }

    #[test]
    #[should_panic(expected = "require extended_fields")]
    fn secondary_ops_need_extended_fields() {
        let _ = Workload::new_from_toml_str(
            r#"record_count = 10
               extended_fields = false
               secondary_read_proportion = 0.5"#,
        );
    }
}

//! The core benchmark functionality.
//!
//! A benchmark in this crate is a group of **phases** run sequentially
//! against one shared workload engine and one storage backend: typically a
//! `load` phase that populates the store, followed by one or more `run`
//! phases that issue transactions. Because the engine is shared, the
//! keyspace grown by one phase carries over to the next, which is exactly
//! what insert-heavy run phases rely on.
//!
//! ## Configuration Format
//!
//! A benchmark configuration file is formatted in TOML. It consists of the
//! `[store]` section selecting a backend adapter, the `[workload]` section
//! (see [`WorkloadOpt`](crate::workload::WorkloadOpt)), an optional
//! `[global]` section, and one `[[benchmark]]` dictionary per phase:
//!
//! ```toml
//! [store]
//! name = "memory"
//!
//! [workload]
//! record_count = 100000
//! read_proportion = 0.95
//! update_proportion = 0.05
//!
//! [global]
//! threads = 4
//!
//! [[benchmark]]
//! mode = "load"
//!
//! [[benchmark]]
//! mode = "run"
//! timeout = 10.0
//! latency = true
//! ```
//!
//! Options in `[global]` override the missing fields of each phase, and any
//! option can in turn be overridden via environment variables without
//! changing the file.
//!
//! ## Output Format
//!
//! All outputs are in plain text, one line per repeat and a final line per
//! phase, easy to process with shell tools and gnuplot:
//!
//! ```txt
//! phase 0 repeat 0 duration 1.00 elapsed 1.00 total 1000000 mops 1.00
//! phase 0 finish . duration 1.00 elapsed 1.00 total 1000000 mops 1.00
//! ```
//!
//! With `latency = true` the finish line carries latency metrics
//! (`min_us`/`max_us`/`avg_us`/`p50_us`/`p95_us`/`p99_us`/`p999_us`), and
//! with `cdf = true` the full latency CDF follows as `<us> <percentile>`
//! pairs. Composite events reported by the engine (read-modify-write
//! timings) are printed once at the end of the whole group as `event ...`
//! lines.

use crate::measurement::LatencyRecorder;
use crate::stores::{new_backend, StoreOpt};
use crate::workload::{Workload, WorkloadOpt};
use crate::Backend;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use hdrhistogram::Histogram;
use log::debug;
use parking_lot::Mutex;
use quanta::Instant;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

// {{{ benchmark

/// What a phase's workers do: populate the keyspace or issue transactions.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Mode {
    Load,
    Run,
}

/// Length determines when a phase should stop: after a per-worker operation
/// count, after a timeout, or (load phases) when the keyspace is fully
/// populated.
#[derive(Clone, Debug, PartialEq)]
enum Length {
    Count(u64),
    Timeout(Duration),
    Exhaust,
}

/// How the results are printed out.
/// "hidden": no results
/// "repeat": only each repeat's own metrics
/// "finish": only the finish metrics
/// "all": equals to repeat + finish
#[derive(Debug, PartialEq)]
enum ReportMode {
    Hidden,
    Repeat,
    Finish,
    All,
}

/// The configuration of a single benchmark phase deserialized from a TOML
/// string. Except for `mode`, the fields are optional to ease parsing, as
/// there can be global parameters that are set for them.
#[derive(Deserialize, Clone, Debug)]
pub struct BenchmarkOpt {
    /// "load" or "run".
    pub mode: String,

    /// Number of worker threads that drive this phase.
    ///
    /// Default: 1.
    pub threads: Option<usize>,

    /// How many times a run phase will be repeated. Useful to plot a
    /// performance trend over time within one phase.
    ///
    /// Default: 1.
    pub repeat: Option<usize>,

    /// How long a run phase lasts, in seconds. If this option is given, the
    /// `ops` option must not be.
    pub timeout: Option<f32>,

    /// How many operations each worker of a run phase will execute. A run
    /// phase needs either `ops` or `timeout`; a load phase accepts neither,
    /// it always ends when the configured record count is inserted.
    pub ops: Option<u64>,

    /// Report mode:
    ///
    /// - "hidden": not reported.
    /// - "repeat": after each repeat, the metrics for that repeat is printed.
    /// - "finish": after all repeats are finished, the metrics of the whole
    ///   phase is printed.
    /// - "all": equals to "repeat" + "finish".
    pub report: Option<String>,

    /// Whether to record per-operation latency. Measuring time is of extra
    /// cost, so enabling this usually affects the throughput metrics.
    ///
    /// Default: false.
    pub latency: Option<bool>,

    /// Whether to print the latency CDF at the end of the phase. Requires
    /// `latency` to be true.
    ///
    /// Default: false.
    pub cdf: Option<bool>,
}

impl BenchmarkOpt {
    /// Called after global options are applied and all fields are set. This
    /// tests whether the opt can be a valid phase, not the workload's own
    /// configuration, which is checked when the engine is created.
    fn sanity(&self) {
        match self.mode.as_str() {
            "load" | "run" => {}
            _ => panic!("mode should be one of: load, run"),
        }
        assert!(
            *self.threads.as_ref().unwrap() > 0,
            "threads should be positive if given"
        );
        assert!(
            *self.repeat.as_ref().unwrap() > 0,
            "repeat should be positive if given"
        );
        match self.report.as_ref().unwrap().as_str() {
            "hidden" | "repeat" | "finish" | "all" => {}
            _ => panic!("report mode should be one of: hidden, repeat, finish, all"),
        }
        if let Some(true) = self.cdf {
            assert!(
                *self.latency.as_ref().unwrap(),
                "when cdf is true, latency must also be true"
            );
        }
        if self.mode == "load" {
            assert!(
                self.ops.is_none() && self.timeout.is_none(),
                "load phases run until the keyspace is populated, drop ops/timeout"
            );
            assert!(
                *self.repeat.as_ref().unwrap() == 1,
                "load phases cannot repeat"
            );
        }
    }
}

/// The configuration of one benchmark phase, parsed from user's input.
#[derive(Debug, PartialEq)]
pub struct Benchmark {
    mode: Mode,
    threads: usize,
    repeat: usize,
    len: Length,
    report: ReportMode,
    latency: bool,
    cdf: bool,
}

const TIME_CHECK_INTERVAL: u64 = 32;

impl Benchmark {
    /// The constructor of Benchmark expects all fields have their values,
    /// either the phase's own or the global defaults.
    fn new(opt: &BenchmarkOpt) -> Self {
        opt.sanity();
        let mode = match opt.mode.as_str() {
            "load" => Mode::Load,
            _ => Mode::Run,
        };
        let len = match mode {
            Mode::Load => Length::Exhaust,
            Mode::Run => {
                if let Some(t) = opt.timeout {
                    assert!(
                        opt.ops.is_none(),
                        "timeout and ops cannot be provided at the same time"
                    );
                    Length::Timeout(Duration::from_secs_f32(t))
                } else if let Some(c) = opt.ops {
                    Length::Count(c)
                } else {
                    panic!("run phases need either ops or timeout");
                }
            }
        };
        let report = match opt.report.as_ref().unwrap().as_str() {
            "hidden" => ReportMode::Hidden,
            "repeat" => ReportMode::Repeat,
            "finish" => ReportMode::Finish,
            _ => ReportMode::All,
        };
        Self {
            mode,
            threads: opt.threads.unwrap(),
            repeat: opt.repeat.unwrap(),
            len,
            report,
            latency: opt.latency.unwrap(),
            cdf: opt.cdf.unwrap(),
        }
    }
}

// }}} benchmark

// {{{ benchmarkgroup

/// The global options that go to the `[global]` section.
///
/// They will override missing fields in each `[[benchmark]]` section. For
/// the usage of each option, please refer to [`BenchmarkOpt`].
#[derive(Deserialize, Clone, Debug, Default)]
pub struct GlobalOpt {
    pub threads: Option<usize>,
    pub repeat: Option<usize>,
    pub report: Option<String>,
    pub latency: Option<bool>,
    pub cdf: Option<bool>,
}

impl GlobalOpt {
    fn apply(&self, opt: &mut BenchmarkOpt) {
        opt.threads = opt.threads.or_else(|| Some(self.threads.unwrap_or(1)));
        opt.repeat = opt.repeat.or_else(|| Some(self.repeat.unwrap_or(1)));
        opt.report = opt
            .report
            .clone()
            .or_else(|| Some(self.report.clone().unwrap_or("all".to_string())));
        opt.latency = opt.latency.or_else(|| Some(self.latency.unwrap_or(false)));
        opt.cdf = opt.cdf.or_else(|| Some(self.cdf.unwrap_or(false)));
    }
}

/// The whole configuration of a benchmark group: one store, one workload,
/// global defaults, and the phases.
#[derive(Deserialize, Clone, Debug)]
struct BenchGroupOpt {
    store: StoreOpt,

    workload: WorkloadOpt,

    global: Option<GlobalOpt>,

    benchmark: Vec<BenchmarkOpt>,
}

// }}} benchmarkgroup

// {{{ bencher

/// Everything a benchmark group needs to run: the backend, the shared
/// workload engine, the composite-event sink, and the parsed phases.
pub struct Bencher {
    backend: Arc<dyn Backend>,
    workload: Arc<Workload>,
    sink: Arc<LatencyRecorder>,
    phases: Vec<Arc<Benchmark>>,
}

/// Parse a full configuration and construct the backend, the engine and the
/// phases. All misconfiguration panics happen in here, before any worker
/// thread exists.
pub fn init(text: &str) -> Bencher {
    let opt: BenchGroupOpt = Figment::new()
        .merge(Toml::string(text))
        .merge(Env::raw())
        .extract()
        .unwrap();
    debug!("Creating benchmark group with the following configurations: {:?}", opt);
    let global = opt.global.clone().unwrap_or_default();
    let mut bopts: Vec<BenchmarkOpt> = opt.benchmark.to_vec();
    for bopt in bopts.iter_mut() {
        global.apply(bopt);
    }
    debug!("Global options applied to benchmarks: {:?}", bopts);

    let sink = Arc::new(LatencyRecorder::new());
    let workload = Arc::new(Workload::new(&opt.workload, sink.clone()));
    let backend = new_backend(&opt.store);
    let phases = bopts.iter().map(|o| Arc::new(Benchmark::new(o))).collect();
    Bencher {
        backend,
        workload,
        sink,
        phases,
    }
}

impl Bencher {
    /// Run all phases in order against the shared engine.
    pub fn bench(&self) {
        let since = Instant::now();
        for (i, phase) in self.phases.iter().enumerate() {
            bench_phase(
                self.backend.clone(),
                self.workload.clone(),
                phase.clone(),
                i,
                since,
            );
        }
        let report = self.phases.iter().any(|p| p.report != ReportMode::Hidden);
        if report && !self.sink.is_empty() {
            for line in self.sink.summaries() {
                println!("{}", line);
            }
        }
    }

    pub fn phases(&self) -> &[Arc<Benchmark>] {
        &self.phases
    }
}

/// A per-worker, per-repeat operation counter. The worker owns the value
/// and publishes it with plain stores; the master thread reads it loosely
/// while aggregating time-limited repeats.
struct OpCounter(AtomicU64);

impl OpCounter {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn publish(&self, count: u64) {
        self.0.store(count, Ordering::Relaxed);
    }
}

/// Per-worker latency histogram (nanoseconds), merged once at the end of a
/// phase.
struct Latency {
    hdr: Histogram<u64>,
}

impl Latency {
    fn new() -> Self {
        Self {
            hdr: Histogram::new(3).unwrap(),
        }
    }

    fn record(&mut self, duration: Duration) {
        let ns = duration.as_nanos() as u64;
        assert!(self.hdr.record(ns).is_ok());
    }

    fn merge(&mut self, other: &Latency) {
        assert!(self.hdr.add(&other.hdr).is_ok());
    }
}

/// The main metrics for each worker thread in the same phase.
struct Measurement {
    /// Per-repeat counters, actively published by the worker and loosely
    /// read by the master thread.
    counters: Vec<OpCounter>,

    /// Per-worker latency, shared among repeats, merged at phase end.
    latency: Mutex<Latency>,

    /// The duration of each repeat as observed by the worker itself. In a
    /// time-limited run the master may read a repeat's counter before the
    /// worker finishes; a missing entry then means "still running" and the
    /// master falls back to its own clock.
    durations: Vec<Mutex<Option<Duration>>>,
}

impl Measurement {
    fn new(repeat: usize) -> Self {
        Self {
            counters: (0..repeat).map(|_| OpCounter::new()).collect(),
            latency: Mutex::new(Latency::new()),
            durations: (0..repeat).map(|_| Mutex::new(None)).collect(),
        }
    }
}

struct WorkerContext {
    /// The phase the current worker belongs to.
    benchmark: Arc<Benchmark>,

    /// The very beginning of all phases in the group, for the elapsed column.
    since: Instant,

    /// Index of this phase in the group.
    phase: usize,

    /// Measurements of all workers; worker 0 aggregates and prints.
    measurements: Vec<Arc<Measurement>>,

    /// Barrier that syncs all workers of the phase.
    barrier: Arc<Barrier>,

    /// `(worker_id, nr_threads)` pair.
    thread_info: (usize, usize),

    /// For load phases: how many inserts this worker performs.
    load_share: u64,
}

fn phase_should_break(len: &Length, done: u64, start: &Instant, load_share: u64) -> bool {
    match len {
        Length::Count(c) => done >= *c,
        Length::Timeout(duration) => {
            // only checks after a certain interval
            done % TIME_CHECK_INTERVAL == 0 && start.elapsed() >= *duration
        }
        Length::Exhaust => done >= load_share,
    }
}

fn pin_worker(id: usize) {
    if let Some(cores) = core_affinity::get_core_ids() {
        if !cores.is_empty() {
            core_affinity::set_for_current(cores[id % cores.len()]);
        }
    }
}

fn bench_worker(backend: Arc<dyn Backend>, workload: Arc<Workload>, context: WorkerContext) {
    let WorkerContext {
        benchmark,
        since,
        phase,
        measurements,
        barrier,
        thread_info,
        load_share,
    } = context;

    let id = thread_info.0;
    pin_worker(id);

    // if recording latency, take the lock guard of this worker's histogram
    // until all repeats are done
    let mut latency = match benchmark.latency {
        true => Some(measurements[id].latency.lock()),
        false => None,
    };

    let mut handle = backend.handle();
    let mut rng = rand::thread_rng();
    let group_start = Instant::now(); // for worker 0's finish line
    for i in 0..benchmark.repeat {
        let counter = &measurements[id].counters[i];
        // start the repeat at roughly the same time on all workers
        barrier.wait();
        let start = Instant::now();
        let mut done = 0u64;
        loop {
            if phase_should_break(&benchmark.len, done, &start, load_share) {
                break;
            }
            let op_start = latency.as_ref().map(|_| Instant::now());
            match benchmark.mode {
                Mode::Load => {
                    let _ = workload.do_insert(&mut *handle, &mut rng);
                }
                Mode::Run => {
                    let _ = workload.do_transaction(&mut *handle, &mut rng);
                }
            }
            if let Some(ref mut l) = latency {
                l.record(op_start.unwrap().elapsed());
            }
            done += 1;
            counter.publish(done);
        }

        // the counter is final now, so record the duration the worker saw
        let end = Instant::now();
        *measurements[id].durations[i].lock() = Some(end.duration_since(start));

        // non time-limited repeats sync before aggregation; time-limited
        // ones are evaluated loosely while stragglers drain
        if !matches!(benchmark.len, Length::Timeout(_)) {
            barrier.wait();
        }

        if id == 0 {
            bench_stat_repeat(&benchmark, phase, i, since, start, end, thread_info, &measurements);
        }
    }

    drop(latency);

    // every worker syncs on this
    barrier.wait();

    if id == 0 {
        let end = Instant::now();
        bench_stat_final(&benchmark, phase, since, group_start, end, thread_info, &measurements);
    }
}

#[allow(clippy::too_many_arguments)]
fn bench_stat_repeat(
    benchmark: &Arc<Benchmark>,
    phase: usize,
    repeat: usize,
    since: Instant,
    start: Instant,
    end: Instant,
    thread_info: (usize, usize),
    measurements: &[Arc<Measurement>],
) {
    assert!(thread_info.0 == 0);
    let mut total = 0u64;
    let mut throughput = 0.0f64;
    for m in measurements.iter() {
        let d = match *m.durations[repeat].lock() {
            Some(d) => d,
            None => {
                // only happens in time-limited phases
                assert!(matches!(benchmark.len, Length::Timeout(_)));
                start.elapsed()
            }
        };
        let ops = m.counters[repeat].read();
        total += ops;
        throughput += ops as f64 / d.as_secs_f64() / 1_000_000.0;
    }

    let duration = (end - start).as_secs_f64();
    let elapsed = (end - since).as_secs_f64();

    if benchmark.report == ReportMode::Repeat || benchmark.report == ReportMode::All {
        println!(
            "phase {} repeat {} duration {:.2} elapsed {:.2} total {} mops {:.2}",
            phase, repeat, duration, elapsed, total, throughput,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn bench_stat_final(
    benchmark: &Arc<Benchmark>,
    phase: usize,
    since: Instant,
    start: Instant,
    end: Instant,
    thread_info: (usize, usize),
    measurements: &[Arc<Measurement>],
) {
    assert!(thread_info.0 == 0);
    let mut total = 0u64;
    let mut latency = Latency::new();
    for m in measurements.iter() {
        for counter in m.counters.iter() {
            total += counter.read();
        }
        latency.merge(&m.latency.lock());
    }

    let duration = (end - start).as_secs_f64();
    let elapsed = (end - since).as_secs_f64();
    let throughput = total as f64 / duration / 1_000_000.0;

    if benchmark.report == ReportMode::Finish || benchmark.report == ReportMode::All {
        print!(
            "phase {} finish . duration {:.2} elapsed {:.2} total {} mops {:.2}",
            phase, duration, elapsed, total, throughput,
        );
        if benchmark.latency {
            let hdr = &latency.hdr;
            assert_eq!(total, hdr.len());
            print!(
                " min_us {:.2} max_us {:.2} avg_us {:.2} \
                 p50_us {:.2} p95_us {:.2} p99_us {:.2} p999_us {:.2}",
                hdr.min() as f64 / 1000.0,
                hdr.max() as f64 / 1000.0,
                hdr.mean() / 1000.0,
                hdr.value_at_quantile(0.50) as f64 / 1000.0,
                hdr.value_at_quantile(0.95) as f64 / 1000.0,
                hdr.value_at_quantile(0.99) as f64 / 1000.0,
                hdr.value_at_quantile(0.999) as f64 / 1000.0,
            );
            if benchmark.cdf {
                print!(" cdf_us percentile");
                let mut seen = 0;
                for v in hdr.iter_linear(1000) {
                    let ns = v.value_iterated_to();
                    seen += v.count_since_last_iteration();
                    print!(" {} {:.2}", (ns + 1) / 1000, seen as f64 * 100.0 / total as f64);
                    if ns >= hdr.max() {
                        break;
                    }
                }
                assert_eq!(seen, total);
            }
        }
        println!();
    }
}

fn bench_phase(
    backend: Arc<dyn Backend>,
    workload: Arc<Workload>,
    benchmark: Arc<Benchmark>,
    phase: usize,
    since: Instant,
) {
    let nr_threads = benchmark.threads;
    let barrier = Arc::new(Barrier::new(nr_threads));
    let measurements: Vec<Arc<Measurement>> = (0..nr_threads)
        .map(|_| Arc::new(Measurement::new(benchmark.repeat)))
        .collect();

    // load phases split the record count across workers, remainder to the
    // last one; the key-numbers themselves come from the shared counter
    let record_count = workload.record_count();
    let share = record_count / nr_threads as u64;

    let mut handles = Vec::new();
    for t in 0..nr_threads {
        let load_share = match t == nr_threads - 1 {
            true => share + record_count % nr_threads as u64,
            false => share,
        };
        let context = WorkerContext {
            benchmark: benchmark.clone(),
            since,
            phase,
            measurements: measurements.clone(),
            barrier: barrier.clone(),
            thread_info: (t, nr_threads),
            load_share,
        };
        let backend = backend.clone();
        let workload = workload.clone();
        handles.push(std::thread::spawn(move || {
            bench_worker(backend, workload, context);
        }));
    }

    for handle in handles {
        assert!(handle.join().is_ok());
    }
}

// }}} bencher

// {{{ tests


// }}} tests

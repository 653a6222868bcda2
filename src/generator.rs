//! Random sequence generators that pick the records a workload touches.
//!
//! Every generator here is shared by all worker threads of a run, so `next`
//! takes `&self` and the caller's own RNG. Internal state is either immutable
//! tables precomputed at construction, a lock-free atomic (the counters), or
//! a small mutex scoped to one generator (the zipfian zeta cache used when
//! the domain grows). There is deliberately no cached "last value": anything
//! that needs to know how far the keyspace has grown reads a [`Counter`].

use parking_lot::Mutex;
use rand::distributions::{Distribution, Uniform as UniformDist, WeightedIndex};
use rand::Rng;
use rand_distr::Exp;
use rustc_hash::FxHasher;
use std::fs::read_to_string;
use std::hash::{BuildHasher, BuildHasherDefault};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Deterministic scramble of an integer, used both for hashed key order and
/// for decorrelating zipfian ranks from physical key order.
pub fn scramble(n: u64) -> u64 {
    BuildHasherDefault::<FxHasher>::default().hash_one(n)
}

/// A concurrency-safe, strictly increasing sequence of integers.
///
/// `next` hands out each value exactly once no matter how many threads call
/// it; `last` observes the most recently issued value. A single atomic
/// carries both, so the two are consistent with each other under any
/// interleaving.
pub struct Counter {
    next: AtomicU64,
}

impl Counter {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Return the next value and advance the sequence.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The most recently issued value. Before any `next` this saturates at
    /// zero rather than wrapping.
    pub fn last(&self) -> u64 {
        self.next.load(Ordering::Relaxed).saturating_sub(1)
    }
}

/// A weighted categorical sampler over an ordered set of outcomes.
///
/// Outcomes keep their insertion order (the tie-break under a fixed seed),
/// weights need not sum to one, and non-positive weights are dropped at
/// construction. Building one with no positive weight at all is a
/// misconfiguration and panics.
pub struct Discrete<L> {
    labels: Vec<L>,
    dist: WeightedIndex<f64>,
}

impl<L: Copy> Discrete<L> {
    pub fn new(outcomes: &[(f64, L)]) -> Self {
        let positive: Vec<(f64, L)> = outcomes.iter().filter(|(w, _)| *w > 0.0).copied().collect();
        assert!(
            !positive.is_empty(),
            "at least one outcome should have a positive weight"
        );
        let dist = WeightedIndex::new(positive.iter().map(|(w, _)| *w)).unwrap();
        let labels = positive.iter().map(|(_, l)| *l).collect();
        Self { labels, dist }
    }

    pub fn next(&self, rng: &mut impl Rng) -> L {
        self.labels[self.dist.sample(rng)]
    }
}

/// The generalized harmonic sum normalizing the zipfian mass function,
/// extended incrementally from a previously computed prefix.
fn zeta_incr(from: u64, to: u64, theta: f64, base: f64) -> f64 {
    let mut sum = base;
    for i in from..to {
        sum += 1.0 / ((i + 1) as f64).powf(theta);
    }
    sum
}

fn zeta(n: u64, theta: f64) -> f64 {
    zeta_incr(0, n, theta, 0.0)
}

fn eta(n: u64, theta: f64, zeta2theta: f64, zetan: f64) -> f64 {
    (1.0 - (2.0 / n as f64).powf(1.0 - theta)) / (1.0 - zeta2theta / zetan)
}

struct ZetaCache {
    items: u64,
    zetan: f64,
}

/// Zipfian-distributed integers in `[min, max]`: rank `r` (counting from
/// `min`) is drawn with frequency proportional to `1/(r+1)^theta`, so values
/// near `min` dominate.
///
/// Each draw inverts the CDF in closed form and then corrects the lowest
/// ranks, whose cumulative brackets the closed-form approximation misses,
/// with constant-bounded checks. The normalization constant is precomputed
/// once; the growing-domain path used by [`Latest`] extends it incrementally
/// under this generator's own lock.
pub struct Zipfian {
    base: u64,
    items: u64,
    theta: f64,
    zeta2theta: f64,
    alpha: f64,
    zetan: f64,
    eta: f64,
    grown: Mutex<ZetaCache>,
}

impl Zipfian {
    pub const DEFAULT_THETA: f64 = 0.99;

    pub fn new(min: u64, max: u64, theta: f64) -> Self {
        let items = max - min + 1;
        Self::with_zetan(min, max, theta, zeta(items, theta))
    }

    /// Construct with a known normalization constant, skipping the harmonic
    /// sum. Used for fixed huge domains whose constant is known up front.
    pub fn with_zetan(min: u64, max: u64, theta: f64, zetan: f64) -> Self {
        assert!(max >= min, "zipfian max should be at least min");
        let items = max - min + 1;
        let zeta2theta = zeta(2, theta);
        let alpha = 1.0 / (1.0 - theta);
        let eta = eta(items, theta, zeta2theta, zetan);
        Self {
            base: min,
            items,
            theta,
            zeta2theta,
            alpha,
            zetan,
            eta,
            grown: Mutex::new(ZetaCache { items, zetan }),
        }
    }

    fn draw(&self, items: u64, zetan: f64, eta: f64, rng: &mut impl Rng) -> u64 {
        let u: f64 = rng.gen();
        let uz = u * zetan;
        // the closed-form inverse is only valid past the first two ranks;
        // their cumulative brackets are checked directly
        if uz < 1.0 {
            return self.base;
        }
        if uz < 1.0 + 0.5f64.powf(self.theta) {
            return self.base + 1;
        }
        self.base + ((items as f64) * (eta * u - eta + 1.0).powf(self.alpha)) as u64
    }

    /// Draw over the domain fixed at construction. Lock-free.
    pub fn next(&self, rng: &mut impl Rng) -> u64 {
        self.draw(self.items, self.zetan, self.eta, rng)
    }

    /// Draw over the first `items` ranks of a domain that may have grown
    /// since construction. The normalization sum only ever extends forward;
    /// a shrunken `items` reuses the larger constant, slightly overweighting
    /// low ranks rather than paying a recompute.
    pub fn next_count(&self, items: u64, rng: &mut impl Rng) -> u64 {
        let zetan = {
            let mut cache = self.grown.lock();
            if items > cache.items {
                cache.zetan = zeta_incr(cache.items, items, self.theta, cache.zetan);
                cache.items = items;
            }
            cache.zetan
        };
        let eta = eta(items, self.theta, self.zeta2theta, zetan);
        self.draw(items, zetan, eta, rng)
    }
}

/// The fixed internal rank domain of [`Scrambled`], and its precomputed
/// normalization constant for the default theta. Keeping the rank domain
/// constant keeps the skew shape stable no matter how large the mapped
/// keyspace is.
const SCRAMBLED_RANK_DOMAIN: u64 = 10_000_000_000;
const SCRAMBLED_ZETAN: f64 = 26.46902820178302;

/// Zipfian popularity without physical clustering: ranks are drawn from a
/// fixed-domain [`Zipfian`] and scrambled onto `[min, max]` with a
/// deterministic hash, so the hottest items land anywhere in the keyspace
/// instead of piling up at the low end.
///
/// The target interval may be sized larger than the live keyspace; callers
/// that need an existing record redraw when a sample lands past the current
/// bound.
pub struct Scrambled {
    base: u64,
    item_count: u64,
    zipfian: Zipfian,
}

impl Scrambled {
    pub fn new(min: u64, max: u64) -> Self {
        let zipfian = Zipfian::with_zetan(
            0,
            SCRAMBLED_RANK_DOMAIN - 1,
            Zipfian::DEFAULT_THETA,
            SCRAMBLED_ZETAN,
        );
        Self {
            base: min,
            item_count: max - min + 1,
            zipfian,
        }
    }

    pub fn next(&self, rng: &mut impl Rng) -> u64 {
        let rank = self.zipfian.next(rng);
        self.base + scramble(rank) % self.item_count
    }
}

/// Uniform over `[min, max]` with a configurable hot sub-range: a
/// `hot_opn_fraction` share of draws lands in the first
/// `hot_data_fraction` share of the interval, the rest in the remainder.
pub struct Hotspot {
    lower: u64,
    hot_interval: u64,
    cold_interval: u64,
    hot_opn_fraction: f64,
}

impl Hotspot {
    pub fn new(lower: u64, upper: u64, hot_data_fraction: f64, hot_opn_fraction: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&hot_data_fraction),
            "hotspot data fraction should be in [0, 1]"
        );
        assert!(
            (0.0..=1.0).contains(&hot_opn_fraction),
            "hotspot operation fraction should be in [0, 1]"
        );
        assert!(upper >= lower, "hotspot upper should be at least lower");
        let interval = upper - lower + 1;
        let hot_interval = (interval as f64 * hot_data_fraction) as u64;
        let cold_interval = interval - hot_interval;
        Self {
            lower,
            hot_interval,
            cold_interval,
            hot_opn_fraction,
        }
    }

    pub fn next(&self, rng: &mut impl Rng) -> u64 {
        let hot = rng.gen::<f64>() < self.hot_opn_fraction;
        if (hot && self.hot_interval > 0) || self.cold_interval == 0 {
            self.lower + rng.gen_range(0..self.hot_interval)
        } else {
            self.lower + self.hot_interval + rng.gen_range(0..self.cold_interval)
        }
    }
}

/// Skew towards the most recently inserted records: draws a zipfian offset
/// over the keyspace observed *now* and subtracts it from the newest
/// key-number, so the head of the keyspace is always the hot set even while
/// inserts keep growing it.
pub struct Latest {
    counter: Arc<Counter>,
    zipfian: Zipfian,
}

impl Latest {
    pub fn new(counter: Arc<Counter>) -> Self {
        let items = counter.last() + 1;
        Self {
            zipfian: Zipfian::new(0, items - 1, Zipfian::DEFAULT_THETA),
            counter,
        }
    }

    pub fn next(&self, rng: &mut impl Rng) -> u64 {
        let max = self.counter.last();
        max.saturating_sub(self.zipfian.next_count(max + 1, rng))
    }
}

/// Exponentially distributed offsets with the given `percentile` of mass
/// within `range` of the origin. The workload engine maps these to
/// key-numbers counted back from the newest insert.
pub struct Exponential {
    exp: Exp<f64>,
}

impl Exponential {
    pub fn new(percentile: f64, range: f64) -> Self {
        let gamma = -(1.0 - percentile / 100.0).ln() / range;
        Self {
            exp: Exp::new(gamma).expect("exponential rate should be positive and finite"),
        }
    }

    pub fn next(&self, rng: &mut impl Rng) -> u64 {
        self.exp.sample(rng) as u64
    }
}

/// Integer samples weighted by a histogram loaded from a file: one
/// whitespace-separated `<value> <weight>` pair per line, `#` comments and
/// blank lines ignored.
pub struct Histogram {
    values: Vec<u64>,
    dist: WeightedIndex<f64>,
}

impl Histogram {
    pub fn from_file(path: &str) -> Self {
        let text = read_to_string(path)
            .unwrap_or_else(|e| panic!("couldn't read histogram file {}: {}", path, e));
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &str) -> Self {
        let mut values = Vec::new();
        let mut weights = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let value: u64 = parts
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| panic!("malformed histogram line in {}: {}", path, line));
            let weight: f64 = parts
                .next()
                .and_then(|w| w.parse().ok())
                .unwrap_or_else(|| panic!("malformed histogram line in {}: {}", path, line));
            values.push(value);
            weights.push(weight);
        }
        assert!(
            !values.is_empty(),
            "histogram file {} should contain at least one bucket",
            path
        );
        let dist = WeightedIndex::new(weights)
            .unwrap_or_else(|_| panic!("histogram file {} should have positive weights", path));
        Self { values, dist }
    }

    pub fn next(&self, rng: &mut impl Rng) -> u64 {
        self.values[self.dist.sample(rng)]
    }
}

/// The closed set of integer sequence generators a workload can be
/// configured with. Dispatch is a compile-time-checked match; adding a
/// distribution means adding a variant here and an arm everywhere it is
/// routed.
pub enum NumberGenerator {
    Constant(u64),
    Uniform(UniformDist<u64>),
    Zipfian(Zipfian),
    Scrambled(Scrambled),
    Hotspot(Hotspot),
    Latest(Latest),
    Exponential(Exponential),
    Histogram(Histogram),
}

impl NumberGenerator {
    pub fn uniform(min: u64, max: u64) -> Self {
        Self::Uniform(UniformDist::new_inclusive(min, max))
    }

    pub fn next(&self, rng: &mut impl Rng) -> u64 {
        match self {
            Self::Constant(v) => *v,
            Self::Uniform(dist) => dist.sample(rng),
            Self::Zipfian(zipfian) => zipfian.next(rng),
            Self::Scrambled(scrambled) => scrambled.next(rng),
            Self::Hotspot(hotspot) => hotspot.next(rng),
            Self::Latest(latest) => latest.next(rng),
            Self::Exponential(exponential) => exponential.next(rng),
            Self::Histogram(histogram) => histogram.next(rng),
        }
    }
}

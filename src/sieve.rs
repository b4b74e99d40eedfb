use crate::bitset::BitSet;
use crate::error::{Error, Result};

/// Receives primes as they are sieved. `end` is called exactly once, after
/// the final prime of a successful run; it is never called when the run
/// fails, so downstream writers do not finalize on error.
pub trait Sink {
    fn accept(&mut self, prime: u64) -> Result<()>;

    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Supplies the seed primes for a warm sieve: every prime in `[2, start]`
/// in order, then `None`.
pub trait Source {
    fn next_value(&mut self) -> Result<Option<u64>>;
}

/// Adapts any `u64` iterator into a seed source.
pub struct IterSource<I>(pub I);

impl<I: Iterator<Item = u64>> Source for IterSource<I> {
    fn next_value(&mut self) -> Result<Option<u64>> {
        Ok(self.0.next())
    }
}

/// Invokes a list of sinks in order for every value.
pub struct FanOut<'a> {
    sinks: Vec<&'a mut dyn Sink>,
}

impl<'a> FanOut<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn push(&mut self, sink: &'a mut dyn Sink) {
        self.sinks.push(sink);
    }
}

impl Default for FanOut<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for FanOut<'_> {
    fn accept(&mut self, prime: u64) -> Result<()> {
        for sink in &mut self.sinks {
            sink.accept(prime)?;
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.end()?;
        }
        Ok(())
    }
}

/// Discards everything.
pub struct NullSink;

impl Sink for NullSink {
    fn accept(&mut self, _prime: u64) -> Result<()> {
        Ok(())
    }
}

/// Sieve every prime below `max`, starting cold from 2, and feed them to
/// `sink` in order. A non-negative `total` stops the run after that many
/// primes. Returns the last prime emitted (0 if none).
pub fn sieve(max: u64, sink: &mut dyn Sink, total: i64) -> Result<u64> {
    Sieve::cold(max, sink, total)?.run()
}

/// Continue sieving over `[start, max)` given a seed that supplies every
/// prime in `[2, start]`. Only primes above `start` are emitted. Returns
/// the last prime emitted (`start` if the window held none).
pub fn sieve_from(
    start: u64,
    seed: &mut dyn Source,
    sink: &mut dyn Sink,
    max: u64,
    total: i64,
) -> Result<u64> {
    Sieve::warm(start, seed, sink, max, total)?.run()
}

/// One sieve run over a window `[start, max)`. Bit `i` of the set means
/// `start + i` is still a candidate.
pub struct Sieve<'a> {
    set: BitSet,
    start: u64,
    max: u64,
    seed: Option<&'a mut dyn Source>,
    sink: &'a mut dyn Sink,
    total: i64,
}

impl<'a> Sieve<'a> {
    pub fn cold(max: u64, sink: &'a mut dyn Sink, total: i64) -> Result<Self> {
        let mut set = BitSet::new(max);
        if max > 2 {
            set.set_range(2, max);
        }
        Ok(Self {
            set,
            start: 0,
            max,
            seed: None,
            sink,
            total,
        })
    }

    pub fn warm(
        start: u64,
        seed: &'a mut dyn Source,
        sink: &'a mut dyn Sink,
        max: u64,
        total: i64,
    ) -> Result<Self> {
        if max <= start {
            return Err(Error::BadInput(format!(
                "max must exceed the start value: {} <= {}",
                max, start
            )));
        }
        let len = max - start;
        let mut set = BitSet::new(len);
        // Bit 0 is `start` itself, which the seed already produced.
        set.set_range(1, len);
        Ok(Self {
            set,
            start,
            max,
            seed: Some(seed),
            sink,
            total,
        })
    }

    /// Run to exhaustion (or until `total` primes have been emitted) and
    /// notify the sink that the stream ended.
    pub fn run(mut self) -> Result<u64> {
        if let Some(seed) = self.seed.take() {
            prepare(&mut self.set, self.start, self.max, seed)?;
        }
        if self.total == 0 {
            self.sink.end()?;
            return Ok(self.start);
        }

        let mut emitted = 0i64;
        let mut last = self.start;
        // The first candidate: 2 for a cold run, the bit after `start`
        // for a warm one.
        let mut candidate = self.set.next_set_bit(if self.start == 0 { 2 } else { 1 });
        while let Some(index) = candidate {
            let prime = self.start + index;
            self.sink.accept(prime)?;
            last = prime;
            emitted += 1;
            if self.total > 0 && emitted >= self.total {
                break;
            }
            self.cross_off(prime);
            candidate = self.set.next_set_bit(index + 1);
        }
        self.sink.end()?;
        Ok(last)
    }

    /// Clear every multiple of `prime` inside the window. The cold path
    /// steps by `2 * prime` and clears two bits per iteration, which halves
    /// the loop count; this also covers every even for `prime == 2` since
    /// consecutive `j` and `j + 2` span the even residues.
    fn cross_off(&mut self, prime: u64) {
        if self.start == 0 {
            let mut j = prime * 2;
            while j < self.max {
                self.set.clear(j);
                if j + prime < self.max {
                    self.set.clear(j + prime);
                }
                j += prime * 2;
            }
        } else {
            let mut j = prime * 2;
            while j < self.max {
                if j >= self.start {
                    self.set.clear(j - self.start);
                }
                j += prime;
            }
        }
    }
}

/// The preparation pass of a warm sieve: pull each seed prime and clear
/// its multiples inside `[start, max)`, validating the seed's shape.
fn prepare(set: &mut BitSet, start: u64, max: u64, seed: &mut dyn Source) -> Result<()> {
    let mut previous: Option<u64> = None;
    let mut index = 0u64;
    while let Some(current) = seed.next_value()? {
        if previous.is_none() && current != 2 {
            return Err(Error::BadSeed(format!(
                "the first seed prime must be 2, got {}; every prime up to \
                 the start value must be supplied or sieving will produce \
                 wrong results",
                current
            )));
        }
        // Cheap smoothness screen, not a primality test. The small primes
        // themselves pass because of the strict comparison.
        for small in [2u64, 3, 5, 7] {
            if current > small && current % small == 0 {
                return Err(Error::BadSeed(format!(
                    "seed contains the composite value {} at index {}",
                    current, index
                )));
            }
        }
        if current >= max {
            return Err(Error::BadSeed(format!(
                "seed value {} at index {} lies at or beyond the window end {}",
                current, index, max
            )));
        }
        if let Some(prev) = previous {
            if current <= prev {
                return Err(Error::BadSeed(format!(
                    "seed values must be strictly ascending: {} followed by {}",
                    prev, current
                )));
            }
        }

        // Clear multiples of this prime that land inside the window. The
        // lowest candidate is the first multiple at or above `start`.
        let quotient = start / current;
        let mut j = if quotient == 0 {
            current * 2
        } else {
            (quotient + 1) * current
        };
        while j < max {
            if j >= start {
                set.clear(j - start);
            }
            j += current;
        }

        previous = Some(current);
        index += 1;
    }
    match previous {
        None => Err(Error::BadSeed("seed supplied no values".to_string())),
        Some(last) if last != start => Err(Error::BadSeed(format!(
            "the start value is {} but the seed's last value was {}",
            start, last
        ))),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::primes_below;

    struct Collect(Vec<u64>, bool);

    impl Collect {
        fn new() -> Self {
            Collect(Vec::new(), false)
        }
    }

    impl Sink for Collect {
        fn accept(&mut self, prime: u64) -> Result<()> {
            assert!(!self.1, "value after end of stream");
            self.0.push(prime);
            Ok(())
        }
        fn end(&mut self) -> Result<()> {
            assert!(!self.1, "end signalled twice");
            self.1 = true;
            Ok(())
        }
    }

    #[test]
    fn tiny_cold_run() {
        let mut out = Collect::new();
        let last = sieve(30, &mut out, -1).unwrap();
        assert_eq!(out.0, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
        assert_eq!(last, 29);
        assert!(out.1);
    }

    #[test]
    fn cold_runs_match_trial_division() {
        for max in [2u64, 3, 4, 5, 10, 97, 100, 1000, 7920, 50_000] {
            let mut out = Collect::new();
            sieve(max, &mut out, -1).unwrap();
            assert_eq!(out.0, primes_below(max), "max {}", max);
            assert!(out.1);
        }
    }

    #[test]
    fn total_caps_emission() {
        let mut out = Collect::new();
        let last = sieve(1_000_000, &mut out, 10).unwrap();
        assert_eq!(out.0, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
        assert_eq!(last, 29);
        assert!(out.1, "end must still be signalled");
    }

    #[test]
    fn warm_continues_where_cold_stopped() {
        let mut seed_values = Collect::new();
        let last = sieve(1000, &mut seed_values, -1).unwrap();
        assert_eq!(last, 997);

        let mut out = Collect::new();
        let mut seed = IterSource(seed_values.0.clone().into_iter());
        let warm_last = sieve_from(997, &mut seed, &mut out, 2000, -1).unwrap();

        let expected: Vec<u64> = primes_below(2000)
            .into_iter()
            .filter(|&p| p > 997)
            .collect();
        assert_eq!(out.0, expected);
        assert_eq!(out.0.len(), 135);
        assert_eq!(out.0.first(), Some(&1009));
        assert_eq!(warm_last, 1999);
        assert!(out.1);
    }

    #[test]
    fn chained_windows_cover_the_range() {
        // Partition [0, 20_000) and check the union equals one big run.
        let mut seed_store = Vec::new();
        let mut all = Vec::new();
        let mut last = 0u64;
        for boundary in [5_000u64, 10_000, 15_000, 20_000] {
            let mut out = Collect::new();
            last = if seed_store.is_empty() {
                sieve(boundary, &mut out, -1).unwrap()
            } else {
                let mut seed = IterSource(seed_store.clone().into_iter());
                sieve_from(last, &mut seed, &mut out, boundary, -1).unwrap()
            };
            seed_store.extend(out.0.iter().copied());
            all.extend(out.0);
        }
        assert_eq!(all, primes_below(20_000));
    }

    #[test]
    fn warm_window_without_primes_returns_start() {
        // (113, 127) contains no primes.
        let seed_values = primes_below(114);
        let mut seed = IterSource(seed_values.into_iter());
        let mut out = Collect::new();
        let last = sieve_from(113, &mut seed, &mut out, 127, -1).unwrap();
        assert!(out.0.is_empty());
        assert_eq!(last, 113);
        assert!(out.1);
    }

    #[test]
    fn seed_missing_two_is_rejected() {
        let mut seed = IterSource(vec![3u64, 5, 7].into_iter());
        let mut out = Collect::new();
        let err = sieve_from(7, &mut seed, &mut out, 100, -1).unwrap_err();
        assert!(matches!(err, Error::BadSeed(_)));
        assert!(!out.1, "no end marker on failure");
    }

    #[test]
    fn seed_out_of_order_is_rejected() {
        let mut seed = IterSource(vec![2u64, 5, 3, 7].into_iter());
        let mut out = Collect::new();
        assert!(matches!(
            sieve_from(7, &mut seed, &mut out, 100, -1),
            Err(Error::BadSeed(_))
        ));
    }

    #[test]
    fn seed_with_composite_is_rejected() {
        let mut seed = IterSource(vec![2u64, 3, 5, 7, 9].into_iter());
        let mut out = Collect::new();
        assert!(matches!(
            sieve_from(9, &mut seed, &mut out, 100, -1),
            Err(Error::BadSeed(_))
        ));
    }

    #[test]
    fn small_primes_pass_the_smoothness_screen() {
        // 2, 3, 5 and 7 divide themselves; the screen must not reject them.
        let mut seed = IterSource(vec![2u64, 3, 5, 7].into_iter());
        let mut out = Collect::new();
        let last = sieve_from(7, &mut seed, &mut out, 30, -1).unwrap();
        assert_eq!(out.0, vec![11, 13, 17, 19, 23, 29]);
        assert_eq!(last, 29);
    }

    #[test]
    fn seed_ending_at_the_wrong_value_is_rejected() {
        let mut seed = IterSource(vec![2u64, 3, 5].into_iter());
        let mut out = Collect::new();
        assert!(matches!(
            sieve_from(7, &mut seed, &mut out, 100, -1),
            Err(Error::BadSeed(_))
        ));
    }

    #[test]
    fn empty_seed_is_rejected() {
        let mut seed = IterSource(Vec::new().into_iter());
        let mut out = Collect::new();
        assert!(matches!(
            sieve_from(7, &mut seed, &mut out, 100, -1),
            Err(Error::BadSeed(_))
        ));
    }

    #[test]
    fn seed_beyond_the_window_is_rejected() {
        // A seed that keeps going past the window end fails fast.
        let seed_values = primes_below(120);
        let mut seed = IterSource(seed_values.into_iter());
        let mut out = Collect::new();
        assert!(matches!(
            sieve_from(7, &mut seed, &mut out, 100, -1),
            Err(Error::BadSeed(_))
        ));
    }

    #[test]
    fn sink_failure_aborts_without_end() {
        struct FailAt(u64, bool);
        impl Sink for FailAt {
            fn accept(&mut self, prime: u64) -> Result<()> {
                if prime >= self.0 {
                    return Err(Error::BadInput("stop".to_string()));
                }
                Ok(())
            }
            fn end(&mut self) -> Result<()> {
                self.1 = true;
                Ok(())
            }
        }
        let mut out = FailAt(13, false);
        assert!(sieve(100, &mut out, -1).is_err());
        assert!(!out.1);
    }

    #[test]
    fn fan_out_feeds_every_sink() {
        let mut a = Collect::new();
        let mut b = Collect::new();
        {
            let mut fan = FanOut::new();
            fan.push(&mut a);
            fan.push(&mut b);
            sieve(50, &mut fan, -1).unwrap();
        }
        assert_eq!(a.0, b.0);
        assert_eq!(a.0, primes_below(50));
        assert!(a.1 && b.1);
    }
}

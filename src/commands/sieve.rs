use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use primal::header::{bits_required, bits_required_for_prime_offset};
use primal::{
    sieve, sieve_from, BatchSieve, FanOut, Mode, MultiSeqReader, SeqFile, SeqHeader,
    SequenceWriter, Sink,
};

use crate::commands::ConsoleList;

pub struct SieveArgs {
    pub max: u64,
    pub outfile: Option<String>,
    pub overwrite: bool,
    pub infile: Option<String>,
    pub bits: u8,
    pub offset_bits: u8,
    pub entries: u16,
    pub batch_size: u64,
    pub log: bool,
    pub stats: bool,
    pub total: i64,
}

pub fn run_sieve(args: SieveArgs) -> Result<()> {
    // Zero means "as far as the format can represent".
    let max = if args.max == 0 {
        i64::MAX as u64
    } else {
        args.max
    };
    let mut log = args.log;
    if args.outfile.is_none() && !log {
        eprintln!("No output file specified - will log to standard output");
        log = true;
    }

    let mut writer = match args.outfile {
        Some(ref outfile) => {
            let path = Path::new(outfile);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    bail!("Parent folder of {} does not exist", outfile);
                }
            }
            if path.exists() && !args.overwrite {
                bail!(
                    "{} exists and --overwrite not specified - will not clobber it",
                    outfile
                );
            }
            let bits = if args.bits == 0 {
                bits_required(max)
            } else {
                args.bits
            };
            let header = SeqHeader::new(args.offset_bits, bits, args.entries)?;
            let mode = if args.overwrite {
                Mode::Overwrite
            } else {
                Mode::Write
            };
            let file = SeqFile::open(path, mode, Some(header))
                .with_context(|| format!("Failed to create {}", outfile))?;
            Some(SequenceWriter::new(file)?)
        }
        None => None,
    };
    let mut log_sink = log.then(LogSink::new);
    let mut stats_sink = args.stats.then(|| StatsSink::new(max, args.total));

    let mut fan = FanOut::new();
    if let Some(w) = writer.as_mut() {
        fan.push(w);
    }
    if let Some(l) = log_sink.as_mut() {
        fan.push(l);
    }
    if let Some(s) = stats_sink.as_mut() {
        fan.push(s);
    }

    if let Some(ref infile) = args.infile {
        let paths: Vec<PathBuf> = infile.split(',').map(PathBuf::from).collect();
        let mut seed = MultiSeqReader::open(&paths)?;
        let start = seed.last()?;
        sieve_from(start, &mut seed, &mut fan, max, args.total)
            .context("sieving from the seed files failed")?;
    } else if max > args.batch_size {
        eprintln!(
            "Above the batch threshold - will sieve in windows of {} to \
             temporary files to avoid running out of memory",
            args.batch_size
        );
        BatchSieve::new(max, args.batch_size)?
            .total(args.total)
            .geometry(args.offset_bits, args.entries)
            .run(&mut fan)
            .context("batched sieving failed")?;
    } else {
        sieve(max, &mut fan, args.total).context("sieving failed")?;
    }

    drop(fan);
    if let Some(writer) = writer {
        // Only a clean run finalizes the header; failures above leave the
        // file recoverable by `primal repair`.
        let file = writer.finish()?;
        eprintln!(
            "Wrote {} primes to {}",
            file.header().count(),
            file.path().display()
        );
    }
    Ok(())
}

struct LogSink {
    list: ConsoleList,
}

impl LogSink {
    fn new() -> Self {
        Self {
            list: ConsoleList::new(),
        }
    }
}

impl Sink for LogSink {
    fn accept(&mut self, prime: u64) -> primal::Result<()> {
        self.list.push(&prime.to_string());
        Ok(())
    }

    fn end(&mut self) -> primal::Result<()> {
        self.list.finish();
        eprintln!("\nDone.");
        Ok(())
    }
}

const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Tracks throughput, bit requirements and the gap population, reporting
/// to standard error at a fixed interval and once more at the end.
struct StatsSink {
    started: Instant,
    next_log: Instant,
    count: u64,
    count_at_last_log: u64,
    previous: u64,
    max_bits: u8,
    max_gap: u64,
    gaps: HashSet<u64>,
    max: u64,
    total: i64,
}

impl StatsSink {
    fn new(max: u64, total: i64) -> Self {
        Self {
            started: Instant::now(),
            next_log: Instant::now() + STATS_INTERVAL,
            count: 0,
            count_at_last_log: 0,
            previous: 0,
            max_bits: 0,
            max_gap: 0,
            gaps: HashSet::new(),
            max,
            total,
        }
    }

    fn log_details(&self) {
        eprintln!("Bits required for values: {}", self.max_bits);
        eprintln!(
            "Bits required for gaps: {}; biggest gap: {}",
            bits_required_for_prime_offset(self.max_gap),
            self.max_gap
        );
        eprintln!("{} distinct prime-gaps seen.\n", self.gaps.len());
    }
}

impl Sink for StatsSink {
    fn accept(&mut self, prime: u64) -> primal::Result<()> {
        self.count += 1;
        self.max_bits = self.max_bits.max(bits_required(prime));
        if self.previous != 0 {
            let gap = prime - self.previous;
            self.max_gap = self.max_gap.max(gap);
            self.gaps.insert(gap);
        }
        self.previous = prime;

        if Instant::now() >= self.next_log {
            let elapsed = self.started.elapsed();
            let minutes = elapsed.as_secs_f64() / 60.0;
            let throughput = if minutes > 0.0 {
                self.count as f64 / minutes
            } else {
                0.0
            };
            let percent = if self.total > 0 {
                self.count as f64 / self.total as f64 * 100.0
            } else {
                prime as f64 / self.max as f64 * 100.0
            };
            eprintln!(
                "Sieved {} primes in the last {}s, {} total; most recent: {}",
                self.count - self.count_at_last_log,
                STATS_INTERVAL.as_secs(),
                self.count,
                prime
            );
            eprintln!(
                "Elapsed: {}s; throughput: {:.1} primes / minute; {:.3}% done",
                elapsed.as_secs(),
                throughput,
                percent
            );
            self.log_details();
            self.count_at_last_log = self.count;
            self.next_log = Instant::now() + STATS_INTERVAL;
        }
        Ok(())
    }

    fn end(&mut self) -> primal::Result<()> {
        eprintln!(
            "Sieved {} primes in {}s",
            self.count,
            self.started.elapsed().as_secs()
        );
        self.log_details();
        let mut all: Vec<u64> = self.gaps.iter().copied().collect();
        all.sort_unstable();
        let listed: Vec<String> = all.iter().map(u64::to_string).collect();
        eprintln!("{}", listed.join(","));
        if let Ok(now) = OffsetDateTime::now_utc().format(&Rfc3339) {
            eprintln!("Done at {}.", now);
        }
        Ok(())
    }
}

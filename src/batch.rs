use std::path::PathBuf;

use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::header::{bits_required, SeqHeader};
use crate::multi::MultiSeqReader;
use crate::seqfile::{Mode, SeqFile};
use crate::sequence::SequenceWriter;
use crate::sieve::{self, FanOut, Sink};

// A window is extended to the target when the remainder would be smaller
// than this, so the run never ends on a tiny tail.
const TAIL_MERGE: u64 = 10_000;

/// Sieves up to `max` in windows of bounded size so memory stays flat.
/// Each window spills to a scratch sequence file; subsequent windows run
/// warm, seeded by a `MultiSeqReader` over every prior scratch file. The
/// scratch directory is removed on success and on failure alike.
pub struct BatchSieve {
    max: u64,
    window: u64,
    total: i64,
    bits_per_offset: u8,
    offsets_per_frame: u16,
}

impl BatchSieve {
    pub fn new(max: u64, window: u64) -> Result<Self> {
        if window == 0 {
            return Err(Error::BadInput("window size may not be zero".to_string()));
        }
        Ok(Self {
            max,
            window,
            total: -1,
            bits_per_offset: 11,
            offsets_per_frame: 300,
        })
    }

    /// Cap the number of primes delivered to the sink (-1 for unlimited).
    pub fn total(mut self, total: i64) -> Self {
        self.total = total;
        self
    }

    /// Geometry for the scratch files.
    pub fn geometry(mut self, bits_per_offset: u8, offsets_per_frame: u16) -> Self {
        self.bits_per_offset = bits_per_offset;
        self.offsets_per_frame = offsets_per_frame;
        self
    }

    /// Run every window, feeding the sink one continuous stream of primes.
    /// The sink sees `end` exactly once, after the final window.
    pub fn run(&self, sink: &mut dyn Sink) -> Result<u64> {
        if self.max <= self.window {
            return sieve::sieve(self.max, sink, self.total);
        }

        let scratch = TempDir::new()?;
        let mut scratch_paths: Vec<PathBuf> = Vec::new();
        let mut boundary = 0u64;
        let mut last = 0u64;
        let mut delivered = 0u64;

        loop {
            boundary += self.window;
            if boundary > self.max || self.max - boundary < TAIL_MERGE {
                boundary = self.max;
            }
            let remaining = if self.total < 0 {
                -1
            } else {
                (self.total as u64 - delivered) as i64
            };

            let path = scratch
                .path()
                .join(format!("window-{:07}.seq", scratch_paths.len() + 1));
            let header = SeqHeader::new(
                self.bits_per_offset,
                bits_required(boundary),
                self.offsets_per_frame,
            )?;
            let file = SeqFile::open(&path, Mode::Write, Some(header))?;
            let mut writer = SequenceWriter::new(file)?;
            let mut tally = Tally {
                inner: &mut *sink,
                delivered: 0,
            };

            let window_last = {
                let mut fan = FanOut::new();
                fan.push(&mut writer);
                fan.push(&mut tally);
                if scratch_paths.is_empty() {
                    sieve::sieve(boundary, &mut fan, remaining)?
                } else {
                    let mut seed = MultiSeqReader::open(&scratch_paths)?;
                    sieve::sieve_from(last, &mut seed, &mut fan, boundary, remaining)?
                }
            };
            delivered += tally.delivered;
            writer.finish()?;
            scratch_paths.push(path);
            if window_last > 0 {
                last = window_last;
            }
            if boundary >= self.max {
                break;
            }
            if self.total >= 0 && delivered >= self.total as u64 {
                break;
            }
        }
        sink.end()?;
        Ok(last)
    }
}

/// Counts deliveries and swallows the per-window end marker so the user's
/// sink only sees the end of the whole run.
struct Tally<'a> {
    inner: &'a mut dyn Sink,
    delivered: u64,
}

impl Sink for Tally<'_> {
    fn accept(&mut self, prime: u64) -> Result<()> {
        self.delivered += 1;
        self.inner.accept(prime)
    }

    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::header::{bits_for_encoded_offset, bits_required, SeqHeader};
use crate::seqfile::{Bias, Channel, Mode, SeqFile};
use crate::sequence::SequenceReader;
use crate::sieve::Source;

/// Reads an ordered list of sequence files as one ascending stream. When a
/// file's first value equals the previous file's last (the natural result
/// of chaining sieve windows), the duplicate is suppressed, so every value
/// appears exactly once.
pub struct MultiSeqReader {
    paths: Vec<PathBuf>,
    cursor: usize,
    current: Option<SequenceReader<Channel>>,
    count: u64,
    last: Option<u64>,
    total: u64,
}

impl MultiSeqReader {
    /// Validate and open a chain of files. Every file must be non-empty and
    /// the per-file last values must not decrease along the list.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        if paths.is_empty() {
            return Err(Error::BadInput("no sequence files given".to_string()));
        }
        let paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        let distinct: HashSet<&PathBuf> = paths.iter().collect();
        if distinct.len() != paths.len() {
            return Err(Error::BadInput(
                "list of files contains duplicates".to_string(),
            ));
        }
        let mut total = 0u64;
        let mut previous_last: Option<u64> = None;
        for path in &paths {
            let mut file = SeqFile::open(path, Mode::Read, None)?;
            let count = file.header().count();
            if count == 0 {
                return Err(Error::BadInput(format!(
                    "{} contains zero entries",
                    path.display()
                )));
            }
            let last = file.last()?;
            if let Some(previous) = previous_last {
                if last < previous {
                    return Err(Error::BadInput(format!(
                        "{} is out of order: its last value {} is below the \
                         preceding file's last value {}",
                        path.display(),
                        last,
                        previous
                    )));
                }
            }
            previous_last = Some(last);
            total += count;
        }
        Ok(Self {
            paths,
            cursor: 0,
            current: None,
            count: 0,
            last: None,
            total,
        })
    }

    /// The next value of the concatenated stream, or `None` at the end.
    pub fn next(&mut self) -> Result<Option<u64>> {
        loop {
            if self.current.is_none() {
                if self.cursor >= self.paths.len() {
                    return Ok(None);
                }
                let file = SeqFile::open(&self.paths[self.cursor], Mode::Read, None)?;
                self.current = Some(file.into_reader()?);
            }
            let value = match self.current.as_mut() {
                Some(reader) => reader.next()?,
                None => None,
            };
            match value {
                Some(value) => {
                    if self.last == Some(value) {
                        // A chained file repeating the previous boundary.
                        continue;
                    }
                    self.last = Some(value);
                    self.count += 1;
                    return Ok(Some(value));
                }
                None => {
                    self.current = None;
                    self.cursor += 1;
                }
            }
        }
    }

    /// Position the stream so the next value returned is global entry
    /// `index` (counted without de-duplication, as the headers record it).
    pub fn seek(&mut self, index: u64) -> Result<()> {
        let mut acc = 0u64;
        let mut target = None;
        for (i, path) in self.paths.iter().enumerate() {
            let file = SeqFile::open(path, Mode::Read, None)?;
            let count = file.header().count();
            if index < acc + count {
                target = Some((i, index - acc));
                break;
            }
            acc += count;
        }
        let (file_index, local) = target.ok_or(Error::OutOfRange { index, count: acc })?;
        let file = SeqFile::open(&self.paths[file_index], Mode::Read, None)?;
        self.current = Some(file.into_reader_at(local)?);
        self.cursor = file_index;
        self.count = index;
        self.last = None;
        Ok(())
    }

    /// Search the chain for `value`, returning its global index on the
    /// de-duplicated stream, a biased neighbor, or -1. Scans per-file last
    /// values to find the containing file, then delegates.
    pub fn search(&mut self, value: u64, bias: Bias) -> Result<i64> {
        let mut acc = 0u64;
        let mut previous_last: Option<u64> = None;
        for path in &self.paths {
            let mut file = SeqFile::open(path, Mode::Read, None)?;
            let file_count = file.header().count();
            let first = file.first()?;
            let duplicated = previous_last == Some(first);
            let last = file.last()?;
            if value > last {
                acc += file_count - u64::from(duplicated);
                previous_last = Some(last);
                continue;
            }
            let local = file.search(value, bias)?;
            if local < 0 {
                // Backward from a value that falls in the gap between two
                // files lands on the previous file's last entry.
                return Ok(match bias {
                    Bias::Backward if acc > 0 => acc as i64 - 1,
                    _ => -1,
                });
            }
            if bias == Bias::Nearest && value < first {
                if let Some(previous) = previous_last {
                    // The previous file's last value may be the closer hit.
                    let candidate = file.get(local as u64)?;
                    if value - previous <= candidate - value {
                        return Ok(acc as i64 - 1);
                    }
                }
            }
            return Ok((acc + local as u64 - u64::from(duplicated)) as i64);
        }
        match bias {
            // Past the end of the whole chain.
            Bias::Backward | Bias::Nearest if acc > 0 => Ok(acc as i64 - 1),
            _ => Ok(-1),
        }
    }

    /// Last value of the whole chain.
    pub fn last(&self) -> Result<u64> {
        let mut file = SeqFile::open(
            &self.paths[self.paths.len() - 1],
            Mode::Read,
            None,
        )?;
        file.last()
    }

    /// Offset width sufficient for every gap recorded across the chain.
    pub fn bits_per_offset_entry(&self) -> Result<u8> {
        let mut max_offset = 0u32;
        for path in &self.paths {
            let file = SeqFile::open(path, Mode::Read, None)?;
            max_offset = max_offset.max(file.header().max_offset());
        }
        Ok(bits_for_encoded_offset(u64::from(max_offset)))
    }

    /// Full-entry width sufficient for the chain's largest value.
    pub fn bits_per_full_entry(&self) -> Result<u8> {
        Ok(bits_required(self.last()?))
    }

    /// A header sized to hold the concatenated stream in as few bits as
    /// its recorded statistics allow.
    pub fn size_optimized_header(&self, offsets_per_frame: u16) -> Result<SeqHeader> {
        SeqHeader::new(
            self.bits_per_offset_entry()?,
            self.bits_per_full_entry()?,
            offsets_per_frame,
        )
    }

    /// Values emitted so far (after de-duplication).
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sum of the per-file entry counts, duplicates included.
    pub fn total_entries(&self) -> u64 {
        self.total
    }
}

impl Source for MultiSeqReader {
    fn next_value(&mut self) -> Result<Option<u64>> {
        self.next()
    }
}

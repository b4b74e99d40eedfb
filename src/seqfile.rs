use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::bits::BitReader;
use crate::encode::{decode_full, decode_offset};
use crate::error::{Error, Result};
use crate::header::{bits_required, bits_required_for_prime_offset, SeqHeader, HEADER_LEN};
use crate::sequence::{SequenceReader, SequenceWriter};

// Random access uses a small throwaway read buffer; a frame is rarely
// bigger than a few hundred bytes.
const GET_BUFFER: usize = 512;

/// How a sequence file is opened. The `Sync` flavors force every channel
/// write to durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    WriteSync,
    Overwrite,
    OverwriteSync,
    Append,
    AppendSync,
}

impl Mode {
    pub fn is_sync(self) -> bool {
        matches!(self, Mode::WriteSync | Mode::OverwriteSync | Mode::AppendSync)
    }

    pub fn is_read(self) -> bool {
        self == Mode::Read
    }

    pub fn is_write(self) -> bool {
        !self.is_read()
    }

    pub fn is_append(self) -> bool {
        matches!(self, Mode::Append | Mode::AppendSync)
    }

    fn open_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Mode::Read => {
                options.read(true);
            }
            Mode::Write | Mode::WriteSync => {
                options.create_new(true).write(true);
            }
            Mode::Overwrite | Mode::OverwriteSync => {
                options.create(true).truncate(true).write(true);
            }
            // Append seeks to the resume point itself; O_APPEND would
            // redirect the header rewrite to the end of the file.
            Mode::Append | Mode::AppendSync => {
                options.read(true).write(true);
            }
        }
        options
    }
}

/// Search tie-break when the exact value is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    /// Exact matches only.
    None,
    /// Snap to the next higher value.
    Forward,
    /// Snap to the next lower value.
    Backward,
    /// Closest value by distance; ties resolve to the lower index.
    Nearest,
}

/// The byte channel a sequence file owns. Wraps the file so that sync-mode
/// writes hit durable storage immediately.
pub struct Channel {
    file: File,
    sync: bool,
}

impl Channel {
    fn new(file: File, sync: bool) -> Self {
        Self { file, sync }
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn sync_all(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.file.write(buf)?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Seek for Channel {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Accepts or rejects values during a filtered copy. `reset` is invoked
/// between the sizing pass and the writing pass, for stateful filters.
pub trait Filter {
    fn accept(&mut self, value: u64) -> bool;

    fn reset(&mut self) {}
}

impl<F: FnMut(u64) -> bool> Filter for F {
    fn accept(&mut self, value: u64) -> bool {
        self(value)
    }
}

/// A file containing an ascending sequence of numbers packed as bit fields:
/// a full value leads each frame, followed by small gap entries. Supports
/// sequential iteration, indexed `get` and biased binary search.
pub struct SeqFile {
    channel: Channel,
    header: SeqHeader,
    mode: Mode,
    path: PathBuf,
}

impl SeqFile {
    /// Open `path` in the given mode. Write modes require a header; read
    /// and append modes read the one on disk.
    pub fn open(path: impl AsRef<Path>, mode: Mode, header: Option<SeqHeader>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.is_dir() {
            return Err(Error::BadInput(format!(
                "is a folder, not a file: {}",
                path.display()
            )));
        }
        if mode.is_read() || mode.is_append() {
            if header.is_some() {
                return Err(Error::BadInput(format!(
                    "should not pass a header when mode is {:?}",
                    mode
                )));
            }
        } else if header.is_none() {
            return Err(Error::BadInput(format!(
                "must pass a header when mode is {:?}",
                mode
            )));
        }

        let file = mode.open_options().open(&path)?;
        let mut channel = Channel::new(file, mode.is_sync());

        let header = match header {
            Some(header) => {
                header.write(&mut channel)?;
                header
            }
            None => {
                let size = channel.len()?;
                if size < HEADER_LEN {
                    return Err(Error::CorruptHeader(format!(
                        "{}: file of {} bytes is too short for a header",
                        path.display(),
                        size
                    )));
                }
                channel.seek(SeekFrom::Start(0))?;
                SeqHeader::load(&mut channel)?
            }
        };

        Ok(Self {
            channel,
            header,
            mode,
            path,
        })
    }

    pub fn header(&self) -> &SeqHeader {
        &self.header
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Random access to the entry at `index`. Seeks to the containing
    /// frame, decodes forward, and restores the channel position so an
    /// interleaved sequential cursor is not disturbed.
    pub fn get(&mut self, index: u64) -> Result<u64> {
        let count = self.header.count();
        if index >= count {
            return Err(Error::OutOfRange { index, count });
        }
        let restore = self.channel.stream_position()?;
        let result = self.get_unrestored(index);
        self.channel.seek(SeekFrom::Start(restore))?;
        result
    }

    fn get_unrestored(&mut self, index: u64) -> Result<u64> {
        let position = self.header.position_of(index);
        self.channel.seek(SeekFrom::Start(position.frame_byte))?;
        let mut bits = BitReader::with_capacity(&mut self.channel, GET_BUFFER);
        if position.skip_bits > 0 {
            bits.read_bits(position.skip_bits).map_err(entry_truncated)?;
        }
        let full_bits = u32::from(self.header.bits_per_full_entry());
        let offset_bits = u32::from(self.header.bits_per_offset_entry());
        let mut value = decode_full(bits.read_bits(full_bits).map_err(entry_truncated)?);
        for _ in 0..position.offset_into_frame {
            value += decode_offset(bits.read_bits(offset_bits).map_err(entry_truncated)?);
        }
        Ok(value)
    }

    /// Binary search over `[0, count)` using `get` as the oracle. Returns
    /// the matching index, a biased neighbor, or -1 when no entry satisfies
    /// the bias. Each probe costs up to a frame of bit reads, which is why
    /// `offsets_per_frame` is best kept to a few hundred.
    pub fn search(&mut self, value: u64, bias: Bias) -> Result<i64> {
        let count = self.header.count();
        if count == 0 {
            return Ok(-1);
        }
        let mut lo = 0u64;
        let mut hi = count - 1;
        loop {
            if lo > hi {
                break;
            }
            let mid = lo + (hi - lo) / 2;
            let probe = self.get(mid)?;
            if probe == value {
                return Ok(mid as i64);
            }
            if probe < value {
                lo = mid + 1;
            } else if mid == 0 {
                break;
            } else {
                hi = mid - 1;
            }
        }
        // `lo` is now the index of the first entry greater than `value`.
        let result = match bias {
            Bias::None => -1,
            Bias::Forward => {
                if lo < count {
                    lo as i64
                } else {
                    -1
                }
            }
            Bias::Backward => {
                if lo > 0 {
                    lo as i64 - 1
                } else {
                    -1
                }
            }
            Bias::Nearest => {
                let below = lo.checked_sub(1);
                let above = (lo < count).then_some(lo);
                match (below, above) {
                    (None, None) => -1,
                    (Some(b), None) => b as i64,
                    (None, Some(a)) => a as i64,
                    (Some(b), Some(a)) => {
                        let below_value = self.get(b)?;
                        let above_value = self.get(a)?;
                        if value - below_value <= above_value - value {
                            b as i64
                        } else {
                            a as i64
                        }
                    }
                }
            }
        };
        Ok(result)
    }

    /// The value nearest `value` under `bias`, or -1 when none qualifies.
    pub fn nearest_to(&mut self, value: u64, bias: Bias) -> Result<i64> {
        let index = self.search(value, bias)?;
        if index < 0 {
            return Ok(-1);
        }
        Ok(self.get(index as u64)? as i64)
    }

    pub fn first(&mut self) -> Result<u64> {
        self.get(0)
    }

    pub fn last(&mut self) -> Result<u64> {
        let count = self.header.count();
        if count == 0 {
            return Err(Error::OutOfRange { index: 0, count });
        }
        self.get(count - 1)
    }

    /// Sequential cursor over the whole file.
    pub fn iter(&mut self) -> Result<SequenceReader<&mut Channel>> {
        SequenceReader::new(self.header.clone(), &mut self.channel)
    }

    /// Sequential cursor whose first yielded entry is `index`: seeks to the
    /// preceding frame boundary and decodes forward to land exactly there.
    pub fn iter_from(&mut self, index: u64) -> Result<SequenceReader<&mut Channel>> {
        let count = self.header.count();
        if index >= count {
            return Err(Error::OutOfRange { index, count });
        }
        SequenceReader::starting_at(self.header.clone(), &mut self.channel, index)
    }

    /// Consume the file into a sequential cursor that owns the channel.
    pub fn into_reader(self) -> Result<SequenceReader<Channel>> {
        SequenceReader::new(self.header, self.channel)
    }

    /// As `into_reader`, but positioned so the first entry yielded is `index`.
    pub fn into_reader_at(self, index: u64) -> Result<SequenceReader<Channel>> {
        let count = self.header.count();
        if index >= count {
            return Err(Error::OutOfRange { index, count });
        }
        SequenceReader::starting_at(self.header, self.channel, index)
    }

    /// Copy the entries this filter accepts into a new file at `path`,
    /// sized to the minimum bit widths the accepted values need. The filter
    /// runs twice; `reset` is called in between.
    pub fn filter(
        &mut self,
        filter: &mut dyn Filter,
        path: impl AsRef<Path>,
        overwrite: bool,
        offsets_per_frame: u16,
    ) -> Result<SeqHeader> {
        // Sizing pass: find the largest accepted value and gap.
        let mut accepted = 0u64;
        let mut previous = 0u64;
        let mut max_value = 0u64;
        let mut max_gap = 0u64;
        {
            let mut cursor = self.iter()?;
            while let Some(value) = cursor.next()? {
                if filter.accept(value) {
                    if accepted > 0 {
                        max_gap = max_gap.max(value - previous);
                    }
                    previous = value;
                    max_value = value;
                    accepted += 1;
                }
            }
        }
        if accepted < 2 {
            return Err(Error::EmptyFilter);
        }
        filter.reset();

        let header = SeqHeader::new(
            bits_required_for_prime_offset(max_gap),
            bits_required(max_value),
            offsets_per_frame,
        )?;
        let mode = if overwrite { Mode::Overwrite } else { Mode::Write };
        let out = SeqFile::open(path, mode, Some(header))?;
        let mut writer = SequenceWriter::new(out)?;
        let mut cursor = self.iter()?;
        while let Some(value) = cursor.next()? {
            if filter.accept(value) {
                writer.write(value)?;
            }
        }
        let out = writer.finish()?;
        Ok(out.header().clone())
    }

    /// Entry count implied by the file size alone; used by repair when the
    /// recorded count cannot be trusted.
    pub fn estimated_count(&mut self) -> Result<u64> {
        let size = self.channel.len()?;
        Ok(self.header.estimated_count(size))
    }

    /// Rewrite the header's mutable fields in place.
    pub fn update_count_and_save(&mut self, count: u64, max_offset: u32) -> Result<()> {
        self.header
            .update_count_and_save(count, max_offset, &mut self.channel)
    }

    pub(crate) fn into_parts(self) -> (Channel, SeqHeader, Mode, PathBuf) {
        (self.channel, self.header, self.mode, self.path)
    }

    pub(crate) fn from_parts(
        channel: Channel,
        header: SeqHeader,
        mode: Mode,
        path: PathBuf,
    ) -> Self {
        Self {
            channel,
            header,
            mode,
            path,
        }
    }
}

fn entry_truncated(err: Error) -> Error {
    match err {
        Error::ShortRead { wanted, bits_read } => Error::Truncated(format!(
            "ran out of data after {} bits while reading a {}-bit entry",
            bits_read, wanted
        )),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{primes_below, write_values};
    use tempfile::TempDir;

    #[test]
    fn modes_enforce_header_presence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seq");
        assert!(matches!(
            SeqFile::open(&path, Mode::Write, None),
            Err(Error::BadInput(_))
        ));
        let header = SeqHeader::new(11, 36, 16).unwrap();
        assert!(matches!(
            SeqFile::open(&path, Mode::Read, Some(header)),
            Err(Error::BadInput(_))
        ));
    }

    #[test]
    fn write_mode_refuses_to_clobber() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seq");
        write_values(&path, 11, 36, 16, &primes_below(100));
        let header = SeqHeader::new(11, 36, 16).unwrap();
        assert!(SeqFile::open(&path, Mode::Write, Some(header.clone())).is_err());
        // Overwrite truncates instead.
        assert!(SeqFile::open(&path, Mode::Overwrite, Some(header)).is_ok());
    }

    #[test]
    fn read_of_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(SeqFile::open(dir.path().join("nope.seq"), Mode::Read, None).is_err());
    }

    #[test]
    fn get_matches_written_sequence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seq");
        let primes = primes_below(8000);
        write_values(&path, 11, 36, 16, &primes);

        let mut file = SeqFile::open(&path, Mode::Read, None).unwrap();
        assert_eq!(file.header().count(), primes.len() as u64);
        assert_eq!(file.first().unwrap(), 2);
        assert_eq!(file.last().unwrap(), *primes.last().unwrap());

        // Shuffled random access.
        let mut order: Vec<usize> = (0..primes.len()).collect();
        use rand::{seq::SliceRandom, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(9329092);
        order.shuffle(&mut rng);
        for &i in &order {
            assert_eq!(file.get(i as u64).unwrap(), primes[i], "index {}", i);
        }

        let count = file.header().count();
        assert!(matches!(
            file.get(count),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn search_with_biases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seq");
        let primes = primes_below(8000);
        write_values(&path, 11, 36, 16, &primes);
        let mut file = SeqFile::open(&path, Mode::Read, None).unwrap();

        // The documented probes around 97..101.
        assert_eq!(file.search(100, Bias::Forward).unwrap(), 25);
        assert_eq!(file.search(100, Bias::Backward).unwrap(), 24);
        assert_eq!(file.search(97, Bias::None).unwrap(), 24);
        assert_eq!(file.search(98, Bias::None).unwrap(), -1);

        for (i, &p) in primes.iter().enumerate() {
            assert_eq!(file.search(p, Bias::None).unwrap(), i as i64);
        }
        for (i, &p) in primes.iter().enumerate().skip(1) {
            if i + 1 < primes.len() && primes[i + 1] != p + 1 {
                assert_eq!(file.search(p + 1, Bias::Backward).unwrap(), i as i64);
                assert_eq!(file.search(p + 1, Bias::Forward).unwrap(), i as i64 + 1);
                assert_eq!(file.nearest_to(p + 1, Bias::Backward).unwrap(), p as i64);
            }
        }

        let first = primes[0];
        let last = *primes.last().unwrap();
        assert_eq!(file.search(first - 1, Bias::Backward).unwrap(), -1);
        assert_eq!(file.search(last + 1, Bias::Forward).unwrap(), -1);

        // Nearest snaps to the closer neighbor, lower index on ties.
        assert_eq!(file.nearest_to(99, Bias::Nearest).unwrap(), 97);
        assert_eq!(file.nearest_to(100, Bias::Nearest).unwrap(), 101);
        assert_eq!(file.nearest_to(0, Bias::Nearest).unwrap(), 2);
        assert_eq!(file.nearest_to(last + 100, Bias::Nearest).unwrap(), last as i64);
    }

    #[test]
    fn iter_from_lands_on_the_exact_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seq");
        let primes = primes_below(8000);
        write_values(&path, 11, 36, 16, &primes);
        let mut file = SeqFile::open(&path, Mode::Read, None).unwrap();

        // Mid-frame, frame boundary, and last entry.
        for start in [5usize, 100, 16, 32, 31, primes.len() - 1] {
            let mut cursor = file.iter_from(start as u64).unwrap();
            for expect in &primes[start..] {
                assert_eq!(cursor.next().unwrap(), Some(*expect), "from {}", start);
            }
            assert_eq!(cursor.next().unwrap(), None);
        }
    }

    #[test]
    fn interleaved_get_and_iteration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seq");
        let primes = primes_below(2000);
        write_values(&path, 11, 36, 16, &primes);
        let mut file = SeqFile::open(&path, Mode::Read, None).unwrap();

        // Walk the file in chunks, issuing random-access gets in between.
        let mut at = 0usize;
        while at < primes.len() {
            let stop = (at + 37).min(primes.len());
            {
                let mut cursor = if at == 0 {
                    file.iter().unwrap()
                } else {
                    file.iter_from(at as u64).unwrap()
                };
                for expect in &primes[at..stop] {
                    assert_eq!(cursor.next().unwrap(), Some(*expect));
                }
            }
            assert_eq!(file.get(7).unwrap(), primes[7]);
            assert_eq!(file.get((primes.len() - 1) as u64).unwrap(), *primes.last().unwrap());
            at = stop;
        }
    }

    #[test]
    fn iterator_detects_external_channel_movement() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seq");
        let primes = primes_below(500);
        write_values(&path, 11, 36, 4, &primes);
        let mut file = SeqFile::open(&path, Mode::Read, None).unwrap();

        let header = file.header.clone();
        let channel = &mut file.channel;
        let mut cursor = SequenceReader::new(header, channel).unwrap();
        assert_eq!(cursor.next().unwrap(), Some(2));
        // Move the channel out from under the cursor.
        cursor.poke_channel().seek(SeekFrom::Start(0)).unwrap();
        assert!(matches!(
            cursor.next(),
            Err(Error::ConcurrentAccess { .. })
        ));
    }

    #[test]
    fn filter_copies_matching_entries_with_minimal_widths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seq");
        let out_path = dir.path().join("filtered.seq");
        let primes = primes_below(2000);
        write_values(&path, 11, 36, 16, &primes);
        let mut file = SeqFile::open(&path, Mode::Read, None).unwrap();

        let mut keep = |v: u64| v % 10 == 3;
        let header = file.filter(&mut keep, &out_path, false, 50).unwrap();
        let expected: Vec<u64> = primes.iter().copied().filter(|v| v % 10 == 3).collect();
        assert_eq!(header.count(), expected.len() as u64);
        assert!(u64::from(header.bits_per_full_entry()) < 36);

        let mut out = SeqFile::open(&out_path, Mode::Read, None).unwrap();
        let mut cursor = out.iter().unwrap();
        for expect in &expected {
            assert_eq!(cursor.next().unwrap(), Some(*expect));
        }
        assert_eq!(cursor.next().unwrap(), None);
    }

    #[test]
    fn filter_rejecting_everything_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seq");
        write_values(&path, 11, 36, 16, &primes_below(100));
        let mut file = SeqFile::open(&path, Mode::Read, None).unwrap();

        let mut none = |_: u64| false;
        assert!(matches!(
            file.filter(&mut none, dir.path().join("o1.seq"), false, 50),
            Err(Error::EmptyFilter)
        ));
        let mut one = |v: u64| v == 13;
        assert!(matches!(
            file.filter(&mut one, dir.path().join("o2.seq"), false, 50),
            Err(Error::EmptyFilter)
        ));
    }

    #[test]
    fn stateful_filter_is_reset_between_passes() {
        struct EveryOther {
            n: u64,
        }
        impl Filter for EveryOther {
            fn accept(&mut self, _: u64) -> bool {
                self.n += 1;
                self.n % 2 == 0
            }
            fn reset(&mut self) {
                self.n = 0;
            }
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seq");
        let out_path = dir.path().join("half.seq");
        let primes = primes_below(1000);
        write_values(&path, 11, 36, 16, &primes);
        let mut file = SeqFile::open(&path, Mode::Read, None).unwrap();

        let mut flt = EveryOther { n: 0 };
        let header = file.filter(&mut flt, &out_path, false, 20).unwrap();
        let expected: Vec<u64> = primes.iter().copied().skip(1).step_by(2).collect();
        assert_eq!(header.count(), expected.len() as u64);

        let mut out = SeqFile::open(&out_path, Mode::Read, None).unwrap();
        let mut cursor = out.iter().unwrap();
        for expect in &expected {
            assert_eq!(cursor.next().unwrap(), Some(*expect));
        }
    }
}

use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::bits::{BitReader, BitWriter};
use crate::encode::{decode_full, decode_offset, encode_full, encode_offset};
use crate::error::{Error, Result};
use crate::header::{SeqHeader, HEADER_LEN};
use crate::seqfile::{Channel, Mode, SeqFile};
use crate::sieve::Sink;

const WRITE_BUFFER: usize = 16 * 1024;

/// Sequential decoder for a sequence file's data section. Yields the next
/// value per call, tracking how many entries remain per the header count.
///
/// The cursor is fail-fast: it records the channel position after every
/// read and refuses to continue if something else moved the channel.
pub struct SequenceReader<R: Read + Seek> {
    header: SeqHeader,
    bits: BitReader<R>,
    count: u64,
    limit: u64,
    last_value: u64,
    pending: Option<u64>,
    expected_position: u64,
}

impl<R: Read + Seek> SequenceReader<R> {
    /// A cursor positioned at the first entry.
    pub fn new(header: SeqHeader, mut channel: R) -> Result<Self> {
        channel.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut bits = BitReader::new(channel);
        let expected_position = bits.channel_position()?;
        Ok(Self {
            limit: header.count(),
            header,
            bits,
            count: 0,
            last_value: 0,
            pending: None,
            expected_position,
        })
    }

    /// A cursor whose first yielded entry is `index`: decodes the frame's
    /// leading full value plus `index % offsets_per_frame` offsets to land
    /// exactly there.
    pub fn starting_at(header: SeqHeader, mut channel: R, index: u64) -> Result<Self> {
        if index == 0 {
            return Self::new(header, channel);
        }
        let position = header.position_of(index);
        channel.seek(SeekFrom::Start(position.frame_byte))?;
        let mut bits = BitReader::new(channel);
        if position.skip_bits > 0 {
            bits.read_bits(position.skip_bits)
                .map_err(|e| truncated(e, index))?;
        }
        let full_bits = u32::from(header.bits_per_full_entry());
        let offset_bits = u32::from(header.bits_per_offset_entry());
        let mut value = decode_full(
            bits.read_bits(full_bits).map_err(|e| truncated(e, index))?,
        );
        for _ in 0..position.offset_into_frame {
            value += decode_offset(
                bits.read_bits(offset_bits).map_err(|e| truncated(e, index))?,
            );
        }
        let expected_position = bits.channel_position()?;
        Ok(Self {
            limit: header.count(),
            header,
            bits,
            count: index + 1,
            last_value: value,
            pending: Some(value),
            expected_position,
        })
    }

    /// The next value, or `None` once the recorded count is exhausted.
    pub fn next(&mut self) -> Result<Option<u64>> {
        if let Some(value) = self.pending.take() {
            return Ok(Some(value));
        }
        if self.count >= self.limit {
            return Ok(None);
        }
        let found = self.bits.channel_position()?;
        if found != self.expected_position {
            return Err(Error::ConcurrentAccess {
                expected: self.expected_position,
                found,
            });
        }
        let value = if self.count % u64::from(self.header.offsets_per_frame()) == 0 {
            let raw = self
                .bits
                .read_bits(u32::from(self.header.bits_per_full_entry()))
                .map_err(|e| truncated(e, self.count))?;
            decode_full(raw)
        } else {
            let raw = self
                .bits
                .read_bits(u32::from(self.header.bits_per_offset_entry()))
                .map_err(|e| truncated(e, self.count))?;
            self.last_value + decode_offset(raw)
        };
        self.count += 1;
        self.last_value = value;
        self.expected_position = self.bits.channel_position()?;
        Ok(Some(value))
    }

    /// Entries consumed so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn last_value(&self) -> u64 {
        self.last_value
    }

    pub fn header(&self) -> &SeqHeader {
        &self.header
    }

    /// Ignore the header's count and read until the stream runs dry.
    /// Used by the repair scan over files whose count is untrustworthy.
    pub fn unbounded(mut self) -> Self {
        self.limit = u64::MAX;
        self
    }

    #[cfg(test)]
    pub(crate) fn poke_channel(&mut self) -> &mut R {
        self.bits.get_mut()
    }
}

impl<R: Read + Seek> crate::sieve::Source for SequenceReader<R> {
    fn next_value(&mut self) -> Result<Option<u64>> {
        self.next()
    }
}

fn truncated(err: Error, element: u64) -> Error {
    match err {
        Error::ShortRead { wanted, bits_read } => Error::Truncated(format!(
            "ran out of data reading element {} ({}-bit field) after {} bits",
            element, wanted, bits_read
        )),
        other => other,
    }
}

/// Sequential encoder writing strictly ascending values into a sequence
/// file. `finish` aligns the bit stream, rewrites the header's count and
/// max offset, and hands the file back.
pub struct SequenceWriter {
    header: SeqHeader,
    mode: Mode,
    path: PathBuf,
    bits: BitWriter<Channel>,
    count: u64,
    last_value: u64,
    max_offset: u32,
}

impl SequenceWriter {
    pub fn new(file: SeqFile) -> Result<Self> {
        if !file.mode().is_write() {
            return Err(Error::BadInput(
                "cannot write to a file opened read-only".to_string(),
            ));
        }
        let mut file = file;
        let resume = file.mode().is_append() && file.header().count() > 0;
        let (count, last_value, max_offset) = if resume {
            let last = file.last()?;
            (file.header().count(), last, file.header().max_offset())
        } else {
            (0, 0, 0)
        };
        let (mut channel, header, mode, path) = file.into_parts();

        let bits = if resume {
            // Continue the bit stream exactly where entry `count` would
            // start, reloading the trailing partial byte if there is one.
            let bit_position = header.bit_position_of(count);
            let byte = bit_position / 8;
            let partial_bits = (bit_position % 8) as u32;
            channel.seek(SeekFrom::Start(byte))?;
            if partial_bits > 0 {
                let mut last_byte = [0u8; 1];
                channel.read_exact(&mut last_byte)?;
                channel.seek(SeekFrom::Start(byte))?;
                BitWriter::resuming(channel, WRITE_BUFFER, last_byte[0], partial_bits)
            } else {
                BitWriter::with_capacity(channel, WRITE_BUFFER)
            }
        } else {
            channel.seek(SeekFrom::Start(HEADER_LEN))?;
            BitWriter::with_capacity(channel, WRITE_BUFFER)
        };

        Ok(Self {
            header,
            mode,
            path,
            bits,
            count,
            last_value,
            max_offset,
        })
    }

    /// Append one value. The first value written to a fresh file may be
    /// anything non-negative; every subsequent value must exceed the last.
    pub fn write(&mut self, value: u64) -> Result<()> {
        if self.count > 0 && value <= self.last_value {
            return Err(Error::BadInput(format!(
                "values must be strictly ascending: {} after {}",
                value, self.last_value
            )));
        }
        if self.count % u64::from(self.header.offsets_per_frame()) == 0 {
            let encoded = encode_full(value);
            let width = u32::from(self.header.bits_per_full_entry());
            if width < 64 && encoded >> width != 0 {
                return Err(Error::BadInput(format!(
                    "value {} does not fit in {} bits per full entry",
                    value, width
                )));
            }
            self.bits.write_bits(encoded, width)?;
        } else {
            let gap = value - self.last_value;
            let encoded = encode_offset(gap);
            let width = u32::from(self.header.bits_per_offset_entry());
            if width < 64 && encoded >> width != 0 {
                return Err(Error::BadInput(format!(
                    "gap {} does not fit in {} bits per offset entry",
                    gap, width
                )));
            }
            if encoded > u64::from(u32::MAX) {
                return Err(Error::BadInput(format!(
                    "encoded offset {} exceeds the header's offset field",
                    encoded
                )));
            }
            self.bits.write_bits(encoded, width)?;
            self.max_offset = self.max_offset.max(encoded as u32);
        }
        self.count += 1;
        self.last_value = value;
        Ok(())
    }

    /// Values written (or, after an append resume, total in the file).
    pub fn written(&self) -> u64 {
        self.count
    }

    /// The largest encoded offset seen so far.
    pub fn max_offset(&self) -> u32 {
        self.max_offset
    }

    /// Pad to a byte boundary, flush, and rewrite the header with the
    /// final count and max offset.
    pub fn finish(self) -> Result<SeqFile> {
        let SequenceWriter {
            mut header,
            mode,
            path,
            bits,
            count,
            max_offset,
            ..
        } = self;
        let mut channel = bits.finish()?;
        header.update_count_and_save(count, max_offset, &mut channel)?;
        Ok(SeqFile::from_parts(channel, header, mode, path))
    }
}

impl Sink for SequenceWriter {
    fn accept(&mut self, prime: u64) -> Result<()> {
        self.write(prime)
    }
}

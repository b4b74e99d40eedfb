use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};

/// Fixed length of the on-disk preamble, in bytes.
pub const HEADER_LEN: u64 = 20;

const MAGIC: [u8; 3] = [23, 42, 23];
const SUPPORTED_VERSION: u8 = 1;
const MAX_FIELD_BITS: u8 = 64;

/// The 20-byte big-endian file preamble: geometry of the bit-packed frames
/// plus the two mutable statistics a writer maintains.
///
/// Layout: magic `23 42 23`, version, bits per offset entry, bits per full
/// entry, offsets per frame (u16), count (u64), max encoded offset (u32).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqHeader {
    bits_per_offset: u8,
    bits_per_full: u8,
    offsets_per_frame: u16,
    count: u64,
    max_offset: u32,
}

/// Physical location of a logical entry, computed from the frame geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPosition {
    /// Absolute byte offset of the byte holding the frame's first bit.
    pub frame_byte: u64,
    /// How many offset entries to decode past the leading full entry.
    pub offset_into_frame: u32,
    /// Bits to discard within the first byte before the frame starts.
    pub skip_bits: u32,
}

impl SeqHeader {
    pub fn new(bits_per_offset: u8, bits_per_full: u8, offsets_per_frame: u16) -> Result<Self> {
        if bits_per_offset == 0 || bits_per_offset > MAX_FIELD_BITS {
            return Err(Error::BadInput(format!(
                "bits per offset entry must be 1-64, got {}",
                bits_per_offset
            )));
        }
        if bits_per_full == 0 || bits_per_full > MAX_FIELD_BITS {
            return Err(Error::BadInput(format!(
                "bits per full entry must be 1-64, got {}",
                bits_per_full
            )));
        }
        if offsets_per_frame == 0 {
            return Err(Error::BadInput(
                "offsets per frame may not be zero".to_string(),
            ));
        }
        Ok(Self {
            bits_per_offset,
            bits_per_full,
            offsets_per_frame,
            count: 0,
            max_offset: 0,
        })
    }

    /// Parse a header from the start of a channel. The channel is left
    /// positioned just past the header.
    pub fn load<C: Read>(channel: &mut C) -> Result<Self> {
        let mut raw = [0u8; HEADER_LEN as usize];
        let mut filled = 0;
        while filled < raw.len() {
            match channel.read(&mut raw[filled..]) {
                Ok(0) => {
                    return Err(Error::CorruptHeader(format!(
                        "file too short for a header: {} of {} bytes",
                        filled, HEADER_LEN
                    )))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        if raw[0..3] != MAGIC {
            return Err(Error::CorruptHeader(format!(
                "magic sequence should be 23,42,23 but is {},{},{}",
                raw[0], raw[1], raw[2]
            )));
        }
        let version = raw[3];
        if version != SUPPORTED_VERSION {
            return Err(Error::CorruptHeader(format!(
                "unsupported version {}",
                version
            )));
        }
        let bits_per_offset = raw[4];
        if bits_per_offset == 0 || bits_per_offset > MAX_FIELD_BITS {
            return Err(Error::CorruptHeader(format!(
                "bits per offset entry out of range: {}",
                bits_per_offset
            )));
        }
        let bits_per_full = raw[5];
        if bits_per_full == 0 || bits_per_full > MAX_FIELD_BITS {
            return Err(Error::CorruptHeader(format!(
                "bits per full entry out of range: {}",
                bits_per_full
            )));
        }
        let offsets_per_frame = u16::from_be_bytes([raw[6], raw[7]]);
        if offsets_per_frame == 0 {
            return Err(Error::CorruptHeader(
                "may not have zero entries per frame".to_string(),
            ));
        }
        let count = u64::from_be_bytes(raw[8..16].try_into().map_err(|_| {
            Error::CorruptHeader("count field unreadable".to_string())
        })?);
        let max_offset = u32::from_be_bytes(raw[16..20].try_into().map_err(|_| {
            Error::CorruptHeader("max offset field unreadable".to_string())
        })?);
        Ok(Self {
            bits_per_offset,
            bits_per_full,
            offsets_per_frame,
            count,
            max_offset,
        })
    }

    /// Serialize all 20 bytes to the channel at its current position.
    pub fn write<C: Write>(&self, channel: &mut C) -> Result<()> {
        let mut raw = [0u8; HEADER_LEN as usize];
        raw[0..3].copy_from_slice(&MAGIC);
        raw[3] = SUPPORTED_VERSION;
        raw[4] = self.bits_per_offset;
        raw[5] = self.bits_per_full;
        raw[6..8].copy_from_slice(&self.offsets_per_frame.to_be_bytes());
        raw[8..16].copy_from_slice(&self.count.to_be_bytes());
        raw[16..20].copy_from_slice(&self.max_offset.to_be_bytes());
        channel.write_all(&raw)?;
        Ok(())
    }

    /// Overwrite the two mutable fields in place with a single 12-byte write
    /// at offset 8, restoring the channel position afterwards. On failure the
    /// in-memory header keeps its previous values.
    pub fn update_count_and_save<C: Write + Seek>(
        &mut self,
        count: u64,
        max_offset: u32,
        channel: &mut C,
    ) -> Result<()> {
        let old_count = self.count;
        let old_max = self.max_offset;
        self.count = count;
        self.max_offset = max_offset;

        let mut raw = [0u8; 12];
        raw[0..8].copy_from_slice(&count.to_be_bytes());
        raw[8..12].copy_from_slice(&max_offset.to_be_bytes());

        let result = (|| -> Result<()> {
            let old_position = channel.stream_position()?;
            channel.seek(SeekFrom::Start(8))?;
            let write_result = channel.write_all(&raw);
            channel.seek(SeekFrom::Start(old_position))?;
            write_result.map_err(Error::Io)
        })();
        if result.is_err() {
            self.count = old_count;
            self.max_offset = old_max;
        }
        result
    }

    pub fn bits_per_offset_entry(&self) -> u8 {
        self.bits_per_offset
    }

    pub fn bits_per_full_entry(&self) -> u8 {
        self.bits_per_full
    }

    pub fn offsets_per_frame(&self) -> u16 {
        self.offsets_per_frame
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn max_offset(&self) -> u32 {
        self.max_offset
    }

    pub(crate) fn set_count(&mut self, count: u64) {
        self.count = count;
    }

    /// Total bits in one frame: a full entry plus the trailing offsets.
    pub fn bits_per_frame(&self) -> u64 {
        u64::from(self.bits_per_full)
            + u64::from(self.bits_per_offset) * (u64::from(self.offsets_per_frame) - 1)
    }

    /// Physical position of the frame containing logical entry `index`.
    /// Pure arithmetic, no I/O.
    pub fn position_of(&self, index: u64) -> EntryPosition {
        let entries_per_frame = u64::from(self.offsets_per_frame);
        let frame = index / entries_per_frame;
        let bit_offset = frame * self.bits_per_frame();
        EntryPosition {
            frame_byte: HEADER_LEN + bit_offset / 8,
            offset_into_frame: (index - frame * entries_per_frame) as u32,
            skip_bits: (bit_offset % 8) as u32,
        }
    }

    /// Absolute bit offset of logical entry `index` within the file.
    pub fn bit_position_of(&self, index: u64) -> u64 {
        let entries_per_frame = u64::from(self.offsets_per_frame);
        let frame = index / entries_per_frame;
        let into_frame = index - frame * entries_per_frame;
        let mut bits = HEADER_LEN * 8 + frame * self.bits_per_frame();
        if into_frame > 0 {
            bits += u64::from(self.bits_per_full)
                + (into_frame - 1) * u64::from(self.bits_per_offset);
        }
        bits
    }

    /// How many entries a data section of the given file size can hold.
    /// Used to recover a file whose writer never rewrote `count`.
    pub fn estimated_count(&self, file_size: u64) -> u64 {
        let data_bits = file_size.saturating_sub(HEADER_LEN) * 8;
        let bits_per_frame = self.bits_per_frame();
        let full_frames = data_bits / bits_per_frame;
        let mut entries = u64::from(self.offsets_per_frame) * full_frames;
        let mut remainder = data_bits - full_frames * bits_per_frame;
        if remainder > u64::from(self.bits_per_full) {
            entries += 1;
            remainder -= u64::from(self.bits_per_full);
            entries += remainder / u64::from(self.bits_per_offset);
        }
        entries
    }
}

/// Bits needed to store `n` as a full entry after the prime encoding.
pub fn bits_required(n: u64) -> u8 {
    if n == 1 {
        return 1;
    }
    let encoded = n.saturating_sub(1) / 2;
    (log2(encoded) + 1) as u8
}

/// Bits needed to store a raw gap of `n` as an offset entry (gaps halve).
pub fn bits_required_for_prime_offset(n: u64) -> u8 {
    (log2(n / 2) + 1) as u8
}

/// Bits needed to store an already-encoded offset.
pub fn bits_for_encoded_offset(n: u64) -> u8 {
    (log2(n) + 1) as u8
}

fn log2(n: u64) -> u32 {
    if n == 0 {
        0
    } else {
        63 - n.leading_zeros()
    }
}

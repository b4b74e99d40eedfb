use std::path::Path;

use crate::header::SeqHeader;
use crate::seqfile::{Mode, SeqFile};
use crate::sequence::SequenceWriter;

/// Primes below `n` by trial division; slow but obviously correct, which
/// is the point of a test oracle.
pub fn primes_below(n: u64) -> Vec<u64> {
    let mut out = Vec::new();
    'outer: for candidate in 2..n {
        let mut divisor = 2u64;
        while divisor * divisor <= candidate {
            if candidate % divisor == 0 {
                continue 'outer;
            }
            divisor += 1;
        }
        out.push(candidate);
    }
    out
}

/// Write `values` into a fresh sequence file with the given geometry.
pub fn write_values(path: &Path, offset_bits: u8, full_bits: u8, opf: u16, values: &[u64]) {
    let header = SeqHeader::new(offset_bits, full_bits, opf).unwrap();
    let file = SeqFile::open(path, Mode::Write, Some(header)).unwrap();
    let mut writer = SequenceWriter::new(file).unwrap();
    for &value in values {
        writer.write(value).unwrap();
    }
    writer.finish().unwrap();
}

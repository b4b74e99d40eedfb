use anyhow::{Context, Result};

use primal::encode::decode_offset;
use primal::header::{bits_for_encoded_offset, bits_required, HEADER_LEN};
use primal::{Error, Mode, SeqFile};

pub fn run_info(path: &str) -> Result<()> {
    let mut file =
        SeqFile::open(path, Mode::Read, None).with_context(|| format!("Failed to open {}", path))?;
    let size = std::fs::metadata(path)?.len();
    let header = file.header().clone();
    let estimated = header.estimated_count(size);

    println!("Sequence file {} ({} bytes)", path, commas(size));
    println!();
    println!("  Format version:               1");
    println!("  Header length:                {}", HEADER_LEN);
    println!(
        "  Data section length:          {} bytes",
        commas(size - HEADER_LEN)
    );
    println!(
        "  Entry count recorded:         {}",
        commas(header.count())
    );
    println!("  Entry count from file size:   {}", commas(estimated));
    println!(
        "  Bits per full value:          {}",
        header.bits_per_full_entry()
    );
    println!(
        "  Bits per offset value:        {}",
        header.bits_per_offset_entry()
    );
    println!(
        "  Offset values per full value: {}",
        header.offsets_per_frame()
    );
    println!(
        "  Max gap between values:       {}",
        decode_offset(u64::from(header.max_offset()))
    );
    println!(
        "  Actual bits needed for gaps:  {}",
        bits_for_encoded_offset(u64::from(header.max_offset()))
    );

    let mut last = 0u64;
    if header.count() > 0 {
        match file.first() {
            Ok(first) => println!("  First value:                  {}", commas(first)),
            Err(Error::Truncated(_)) => {
                println!("  !!! File is truncated to just its header");
            }
            Err(e) => return Err(e.into()),
        }
        match file.last() {
            Ok(value) => {
                last = value;
                println!(
                    "  Actual bits needed for fulls: {}",
                    bits_required(last)
                );
                println!("  Last value:                   {}", commas(last));
            }
            Err(Error::Truncated(_)) => {
                println!("  !!! File is truncated to shorter than its expected length");
            }
            Err(e) => return Err(e.into()),
        }
    }
    println!();

    let gap_bits = bits_for_encoded_offset(u64::from(header.max_offset()));
    if header.max_offset() > 0 && gap_bits < header.bits_per_offset_entry() {
        println!(
            "  !!! This file can be optimized to {} bits per offset",
            gap_bits
        );
    }
    if last != 0 {
        let full_bits = bits_required(last);
        if full_bits < header.bits_per_full_entry() {
            println!(
                "  !!! This file can be optimized to {} bits per full value",
                full_bits
            );
        }
    }
    if estimated != header.count() {
        if header.count() == 0 {
            println!(
                "  !!! Header says the file is empty. Probably sieving was \
                 interrupted. Try `primal repair -i {}`",
                path
            );
        } else {
            println!(
                "  !!! Recorded entry count and the file-size estimate \
                 differ. Try `primal repair -i {}`",
                path
            );
        }
    }
    Ok(())
}

fn commas(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

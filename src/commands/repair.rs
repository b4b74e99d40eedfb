use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{bail, Context, Result};

use primal::encode::encode_offset;
use primal::header::{bits_for_encoded_offset, bits_required};
use primal::{Error, Mode, SeqFile};

/// Recover a file whose writer never rewrote the header (count or max
/// offset of zero), by scanning the data section and validating the
/// prime-shaped invariants entry by entry. With `--optimize`, re-encode
/// into the minimal bit widths the content actually needs.
pub fn run_repair(
    infile: &str,
    outfile: Option<&str>,
    optimize: bool,
    entries: Option<u16>,
) -> Result<()> {
    let mut file = SeqFile::open(infile, Mode::Read, None)
        .with_context(|| format!("Failed to open {}", infile))?;
    let header = file.header().clone();
    let estimated = file.estimated_count()?;
    let broken = header.count() == 0 || header.max_offset() == 0;
    if !broken && !optimize {
        eprintln!("File is okay and --optimize not specified. Nothing to do.");
        return Ok(());
    }

    let (count, max_encoded, last_value) = if broken {
        eprintln!(
            "Starting scan of {} (roughly {} entries). This may take a while.",
            infile, estimated
        );
        let recovered = scan(&mut file)?;
        eprintln!("Scan pass done.");
        recovered
    } else {
        let last = file.last()?;
        (header.count(), u64::from(header.max_offset()), last)
    };
    if count == 0 {
        bail!("No entries could be read from {}", infile);
    }
    drop(file);

    if broken {
        let mut channel = OpenOptions::new().read(true).write(true).open(infile)?;
        let mut repaired = header.clone();
        repaired.update_count_and_save(count, max_encoded as u32, &mut channel)?;
        eprintln!("Recovered {} entries; last value {}.", count, last_value);
    }

    if optimize {
        let offsets_per_frame = entries.unwrap_or(header.offsets_per_frame());
        let offset_bits = bits_for_encoded_offset(max_encoded);
        let full_bits = bits_required(last_value);
        if !broken
            && offset_bits == header.bits_per_offset_entry()
            && full_bits == header.bits_per_full_entry()
            && offsets_per_frame == header.offsets_per_frame()
        {
            eprintln!(
                "File space usage is already optimal. Use --entries to trade \
                 seek time for size."
            );
            return Ok(());
        }

        let mut file = SeqFile::open(infile, Mode::Read, None)?;
        let mut keep_all = |_: u64| true;
        match outfile {
            Some(out) => {
                let new_header = file.filter(&mut keep_all, out, true, offsets_per_frame)?;
                eprintln!(
                    "Wrote optimized copy to {} ({} bits per full value, {} \
                     per offset)",
                    out,
                    new_header.bits_per_full_entry(),
                    new_header.bits_per_offset_entry()
                );
            }
            None => {
                let parent = match Path::new(infile).parent() {
                    Some(p) if !p.as_os_str().is_empty() => p,
                    _ => Path::new("."),
                };
                let temp = tempfile::Builder::new()
                    .prefix(".primal-repair-")
                    .tempfile_in(parent)?
                    .into_temp_path();
                file.filter(&mut keep_all, &temp, true, offsets_per_frame)?;
                temp.persist(infile)
                    .with_context(|| format!("Failed to replace {}", infile))?;
                eprintln!("Replaced {} with the optimized copy", infile);
            }
        }
    }
    Ok(())
}

/// Read entries until the stream runs out or stops looking like a prime
/// sequence. Returns (valid entries, max encoded offset, last value).
fn scan(file: &mut SeqFile) -> Result<(u64, u64, u64)> {
    let mut cursor = file.iter()?.unbounded();
    let mut count = 0u64;
    let mut max_encoded = 0u64;
    let mut previous: Option<u64> = None;
    loop {
        let value = match cursor.next() {
            Ok(Some(value)) => value,
            Ok(None) => break,
            Err(Error::Truncated(_)) => {
                eprintln!("Ran off the end of the file at entry {}", count);
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if value <= 1 || (value != 2 && value % 2 == 0) {
            eprintln!(
                "Encountered invalid value {} at entry {}; discarding it and \
                 the rest of the file",
                value, count
            );
            break;
        }
        if let Some(prev) = previous {
            if value <= prev {
                eprintln!(
                    "Encountered non-ascending value {} at entry {}; \
                     discarding it and the rest of the file",
                    value, count
                );
                break;
            }
            let gap = value - prev;
            if prev > 2 && gap == 1 {
                eprintln!(
                    "Encountered a gap of 1 at entry {}; assuming the rest of \
                     the file is invalid",
                    count
                );
                break;
            }
            if prev != 2 && gap % 2 != 0 {
                eprintln!(
                    "All gaps above 2 are even, but entry {} implies a gap of \
                     {}; discarding the remainder",
                    count, gap
                );
                break;
            }
            max_encoded = max_encoded.max(encode_offset(gap));
        }
        previous = Some(value);
        count += 1;
    }
    Ok((count, max_encoded, previous.unwrap_or(0)))
}

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};

use primal::header::{bits_required, bits_required_for_prime_offset};
use primal::{Mode, MultiSeqReader, SeqFile, SeqHeader, SequenceWriter};

use crate::cli::ReadArgs;
use crate::commands::ConsoleList;
use crate::config::Config;

#[derive(Clone, Copy, PartialEq, Eq)]
enum GapMode {
    Values,
    Gaps,
    DistinctGaps,
    DifferentialGaps,
    DistinctDifferentialGaps,
}

pub fn run_read(args: ReadArgs, config: &Config) -> Result<()> {
    let mode = if args.distinct_differential_gaps {
        GapMode::DistinctDifferentialGaps
    } else if args.differential_gaps {
        GapMode::DifferentialGaps
    } else if args.distinct_gaps {
        GapMode::DistinctGaps
    } else if args.gaps {
        GapMode::Gaps
    } else {
        GapMode::Values
    };
    if args.outfile.is_some() && mode != GapMode::Values {
        bail!("gap output cannot be re-encoded into a sequence file");
    }
    let paths: Vec<PathBuf> = args.infile.split(',').map(PathBuf::from).collect();

    // A fixed seed keeps --random selecting the same values across the two
    // passes a file copy makes.
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    match args.outfile {
        Some(ref outfile) => copy_selection(&args, &paths, outfile, seed, config),
        None => print_selection(&args, &paths, mode, seed),
    }
}

/// Walk the chain applying the offset/limit/value/random selections,
/// invoking `each` for every value that survives.
fn select(
    args: &ReadArgs,
    paths: &[PathBuf],
    seed: u64,
    mut each: impl FnMut(u64) -> Result<()>,
) -> Result<()> {
    let mut reader = MultiSeqReader::open(paths)?;
    if let Some(offset) = args.offset {
        reader.seek(offset)?;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut index = args.offset.unwrap_or(0);
    let mut produced = 0u64;
    while let Some(value) = reader.next()? {
        if let Some(end) = args.end_offset {
            if index >= end {
                break;
            }
        }
        index += 1;
        if let Some(floor) = args.greater_than {
            if value <= floor {
                continue;
            }
        }
        if let Some(ceiling) = args.less_than {
            if value >= ceiling {
                break;
            }
        }
        if let Some(one_in) = args.random {
            if one_in > 1 && rng.gen_range(0..one_in) != 1 {
                continue;
            }
        }
        if let Some(limit) = args.limit {
            if produced >= limit {
                break;
            }
        }
        each(value)?;
        produced += 1;
    }
    Ok(())
}

fn print_selection(args: &ReadArgs, paths: &[PathBuf], mode: GapMode, seed: u64) -> Result<()> {
    let mut list = ConsoleList::new();
    let mut previous: Option<u64> = None;
    let mut previous_gap: Option<i64> = None;
    let mut seen: HashSet<i64> = HashSet::new();
    select(args, paths, seed, |value| {
        match mode {
            GapMode::Values => list.push(&value.to_string()),
            GapMode::Gaps | GapMode::DistinctGaps => {
                if let Some(prev) = previous {
                    let gap = (value - prev) as i64;
                    if mode == GapMode::Gaps || seen.insert(gap) {
                        list.push(&gap.to_string());
                    }
                }
            }
            GapMode::DifferentialGaps | GapMode::DistinctDifferentialGaps => {
                if let Some(prev) = previous {
                    let gap = (value - prev) as i64;
                    if let Some(prior) = previous_gap {
                        let difference = gap - prior;
                        if mode == GapMode::DifferentialGaps || seen.insert(difference) {
                            list.push(&difference.to_string());
                        }
                    }
                    previous_gap = Some(gap);
                }
            }
        }
        previous = Some(value);
        Ok(())
    })?;
    list.finish();
    Ok(())
}

fn copy_selection(
    args: &ReadArgs,
    paths: &[PathBuf],
    outfile: &str,
    seed: u64,
    config: &Config,
) -> Result<()> {
    // Sizing pass: the new file gets the minimum widths the selection needs.
    let mut accepted = 0u64;
    let mut previous = 0u64;
    let mut max_value = 0u64;
    let mut max_gap = 0u64;
    select(args, paths, seed, |value| {
        if accepted > 0 {
            max_gap = max_gap.max(value - previous);
        }
        previous = value;
        max_value = value;
        accepted += 1;
        Ok(())
    })?;
    if accepted < 2 {
        bail!("selection matched fewer than two values - nothing to write");
    }

    let entries = args.entries.unwrap_or(config.entries);
    let header = SeqHeader::new(
        bits_required_for_prime_offset(max_gap),
        bits_required(max_value),
        entries,
    )?;
    let mode = if args.overwrite {
        Mode::Overwrite
    } else {
        Mode::Write
    };
    let file = SeqFile::open(outfile, mode, Some(header))?;
    let mut writer = SequenceWriter::new(file)?;
    select(args, paths, seed, |value| {
        writer.write(value)?;
        Ok(())
    })?;
    let file = writer.finish()?;
    eprintln!("Wrote {} values to {}", file.header().count(), outfile);
    Ok(())
}

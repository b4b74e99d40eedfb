mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Sieve {
            max,
            outfile,
            overwrite,
            infile,
            bits,
            offset_bits,
            entries,
            batch_size,
            log,
            stats,
            total,
        } => commands::sieve::run_sieve(commands::sieve::SieveArgs {
            max,
            outfile,
            overwrite,
            infile,
            bits,
            offset_bits: offset_bits.unwrap_or(config.offset_bits),
            entries: entries.unwrap_or(config.entries),
            batch_size: batch_size.unwrap_or(config.batch_size),
            log,
            stats,
            total,
        }),
        Commands::Get { infile, query } => commands::get::run_get(&infile, &query),
        Commands::Read(args) => commands::read::run_read(args, &config),
        Commands::Info { file } => commands::info::run_info(&file),
        Commands::Repair {
            infile,
            outfile,
            optimize,
            entries,
        } => commands::repair::run_repair(&infile, outfile.as_deref(), optimize, entries),
    }
}

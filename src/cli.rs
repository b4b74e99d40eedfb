use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "primal")]
#[command(about = "Sieve primes into compact, random-access sequence files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(long, global = true, default_value = "./primal.toml")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate primes by sieving, into a file and/or standard output
    Sieve {
        /// Compute primes up to this value (0 means no upper bound)
        #[arg(short, long, default_value_t = 1_000_000)]
        max: u64,

        /// The output file
        #[arg(short, long)]
        outfile: Option<String>,

        /// Overwrite the output file if it exists
        #[arg(short = 'w', long)]
        overwrite: bool,

        /// Comma-delimited list of existing files to continue from
        #[arg(short, long)]
        infile: Option<String>,

        /// Bits per full entry (0 derives the width from --max)
        #[arg(short, long, default_value_t = 0)]
        bits: u8,

        /// Bits per offset entry (must fit the biggest gap between primes)
        #[arg(short = 't', long)]
        offset_bits: Option<u8>,

        /// Offset entries per full entry
        #[arg(short, long)]
        entries: Option<u16>,

        /// Bound above which sieving runs in windows to limit memory
        #[arg(short = 'z', long)]
        batch_size: Option<u64>,

        /// Print primes as comma-separated values on standard output
        #[arg(short, long)]
        log: bool,

        /// Print periodic generation statistics on standard error
        #[arg(short, long)]
        stats: bool,

        /// Stop after this many primes (-1 for unlimited)
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        total: i64,
    },

    /// Read single values from a sequence file
    Get {
        /// The input file of prime numbers
        #[arg(short, long)]
        infile: String,

        #[command(flatten)]
        query: GetQuery,
    },

    /// Read and filter ranges of values from one file or a chain of files
    Read(ReadArgs),

    /// Print sequence file metadata
    Info {
        /// The file to describe
        file: String,
    },

    /// Recover the header of an interrupted file, optionally re-encoding
    Repair {
        /// The file to repair
        #[arg(short, long)]
        infile: String,

        /// Write the repaired copy here instead of replacing the input
        #[arg(short, long)]
        outfile: Option<String>,

        /// Re-encode with minimal bit widths even if the header is intact
        #[arg(short = 'z', long)]
        optimize: bool,

        /// Offset entries per full entry for the optimized copy
        #[arg(short, long)]
        entries: Option<u16>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct GetQuery {
    /// Print the first entry
    #[arg(long)]
    pub first: bool,

    /// Print the last entry
    #[arg(long)]
    pub last: bool,

    /// Print the nth entry
    #[arg(long)]
    pub index: Option<u64>,

    /// Print the first entry at or above n
    #[arg(long)]
    pub greater_than: Option<u64>,

    /// Print the last entry at or below n
    #[arg(long)]
    pub less_than: Option<u64>,

    /// Print the entry closest to n
    #[arg(long)]
    pub nearest: Option<u64>,

    /// Print a random entry
    #[arg(long)]
    pub random: bool,
}

#[derive(Args)]
pub struct ReadArgs {
    /// Input file, or a comma-delimited ascending chain of files
    #[arg(short, long)]
    pub infile: String,

    /// Re-encode the selection into this sequence file instead of printing
    #[arg(short, long)]
    pub outfile: Option<String>,

    /// Overwrite the output file if it exists
    #[arg(short = 'w', long)]
    pub overwrite: bool,

    /// Start from the nth entry
    #[arg(short = 's', long)]
    pub offset: Option<u64>,

    /// Stop before the nth entry
    #[arg(short = 'e', long)]
    pub end_offset: Option<u64>,

    /// Output no more than n values
    #[arg(short, long)]
    pub limit: Option<u64>,

    /// Output only values greater than n
    #[arg(short, long)]
    pub greater_than: Option<u64>,

    /// Output only values less than n
    #[arg(short = 'n', long)]
    pub less_than: Option<u64>,

    /// Randomly keep values with a one-in-n probability
    #[arg(short, long)]
    pub random: Option<u32>,

    /// Output gaps between values rather than the values
    #[arg(short = 'p', long)]
    pub gaps: bool,

    /// Output only the first occurrence of each gap
    #[arg(short = 'd', long)]
    pub distinct_gaps: bool,

    /// Output differences between subsequent gaps
    #[arg(short = 'q', long)]
    pub differential_gaps: bool,

    /// Output distinct differences between subsequent gaps
    #[arg(short = 'y', long)]
    pub distinct_differential_gaps: bool,

    /// Offset entries per full entry for the output file
    #[arg(long)]
    pub entries: Option<u16>,
}

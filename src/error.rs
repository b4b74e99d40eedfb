use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong reading, writing or sieving a sequence file.
#[derive(Debug, Error)]
pub enum Error {
    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    #[error("data section truncated: {0}")]
    Truncated(String),

    #[error("index {index} out of range for {count} entries")]
    OutOfRange { index: u64, count: u64 },

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("bad seed: {0}")]
    BadSeed(String),

    #[error("filter accepted fewer than two values")]
    EmptyFilter,

    #[error("channel position moved between reads: expected {expected} but found {found}")]
    ConcurrentAccess { expected: u64, found: u64 },

    #[error("ran out of data after {bits_read} bits while reading a {wanted}-bit value")]
    ShortRead { wanted: u32, bits_read: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the stream ended mid-entry.
    pub fn is_short_read(&self) -> bool {
        matches!(self, Error::ShortRead { .. })
    }
}

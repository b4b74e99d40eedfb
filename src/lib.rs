pub mod batch;
pub mod bits;
pub mod bitset;
pub mod encode;
pub mod error;
pub mod header;
pub mod multi;
pub mod seqfile;
pub mod sequence;
pub mod sieve;

pub use batch::BatchSieve;
pub use error::{Error, Result};
pub use header::SeqHeader;
pub use multi::MultiSeqReader;
pub use seqfile::{Bias, Filter, Mode, SeqFile};
pub use sequence::{SequenceReader, SequenceWriter};
pub use sieve::{sieve, sieve_from, FanOut, Sink, Source};

#[cfg(test)]
pub(crate) mod testutil;

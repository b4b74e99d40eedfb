use tempfile::TempDir;

use primal::{
    sieve, sieve_from, BatchSieve, Bias, Error, Mode, MultiSeqReader, SeqFile, SeqHeader,
    SequenceWriter, Sink,
};

fn primes_below(n: u64) -> Vec<u64> {
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

struct Collect(Vec<u64>);

impl Sink for Collect {
    fn accept(&mut self, prime: u64) -> primal::Result<()> {
        self.0.push(prime);
        Ok(())
    }
}

#[test]
fn sieve_to_file_and_query_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("first-thousand.seq");
    let header = SeqHeader::new(11, 36, 16).unwrap();
    let file = SeqFile::open(&path, Mode::Write, Some(header)).unwrap();
    let mut writer = SequenceWriter::new(file).unwrap();
    sieve(8000, &mut writer, 1000).unwrap();
    writer.finish().unwrap();

    let mut file = SeqFile::open(&path, Mode::Read, None).unwrap();
    assert_eq!(file.header().count(), 1000);
    // The thousandth prime.
    assert_eq!(file.get(999).unwrap(), 7919);
    assert_eq!(file.get(0).unwrap(), 2);

    assert_eq!(file.search(100, Bias::Forward).unwrap(), 25);
    assert_eq!(file.search(100, Bias::Backward).unwrap(), 24);
    assert_eq!(file.search(97, Bias::None).unwrap(), 24);
    assert_eq!(file.search(98, Bias::None).unwrap(), -1);
    assert_eq!(file.get(25).unwrap(), 101);

    let mut cursor = file.iter().unwrap();
    for expect in primes_below(7920) {
        assert_eq!(cursor.next().unwrap(), Some(expect));
    }
    assert_eq!(cursor.next().unwrap(), None);
}

#[test]
fn warm_chaining_through_files() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("to-1000.seq");
    let second = dir.path().join("to-2000.seq");

    let file = SeqFile::open(&first, Mode::Write, Some(SeqHeader::new(11, 36, 16).unwrap()))
        .unwrap();
    let mut writer = SequenceWriter::new(file).unwrap();
    let last = sieve(1000, &mut writer, -1).unwrap();
    writer.finish().unwrap();
    assert_eq!(last, 997);

    // Seed the next window from the file just written.
    let mut seed = MultiSeqReader::open(&[&first]).unwrap();
    let file = SeqFile::open(&second, Mode::Write, Some(SeqHeader::new(11, 36, 16).unwrap()))
        .unwrap();
    let mut writer = SequenceWriter::new(file).unwrap();
    let mut collected = Collect(Vec::new());
    {
        let mut fan = primal::FanOut::new();
        fan.push(&mut writer);
        fan.push(&mut collected);
        let warm_last = sieve_from(997, &mut seed, &mut fan, 2000, -1).unwrap();
        assert_eq!(warm_last, 1999);
    }
    writer.finish().unwrap();

    assert_eq!(collected.0.len(), 135);
    assert_eq!(collected.0.first(), Some(&1009));
    assert_eq!(collected.0.last(), Some(&1999));

    // The chained pair reads back as one ascending stream of all primes
    // below 2000.
    let mut chain = MultiSeqReader::open(&[&first, &second]).unwrap();
    let mut seen = Vec::new();
    while let Some(value) = chain.next().unwrap() {
        seen.push(value);
    }
    assert_eq!(seen, primes_below(2000));
}

#[test]
fn batched_file_is_identical_to_one_shot() {
    let dir = TempDir::new().unwrap();
    let batched = dir.path().join("batched.seq");
    let single = dir.path().join("single.seq");
    let header = SeqHeader::new(11, 36, 300).unwrap();

    let file = SeqFile::open(&batched, Mode::Write, Some(header.clone())).unwrap();
    let mut writer = SequenceWriter::new(file).unwrap();
    BatchSieve::new(50_000, 10_000)
        .unwrap()
        .run(&mut writer)
        .unwrap();
    writer.finish().unwrap();

    let file = SeqFile::open(&single, Mode::Write, Some(header)).unwrap();
    let mut writer = SequenceWriter::new(file).unwrap();
    sieve(50_000, &mut writer, -1).unwrap();
    writer.finish().unwrap();

    let batched_bytes = std::fs::read(&batched).unwrap();
    let single_bytes = std::fs::read(&single).unwrap();
    assert_eq!(batched_bytes, single_bytes);
}

#[test]
fn zeroed_header_is_recoverable_by_scanning() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("interrupted.seq");
    let primes = primes_below(20_000);

    let file = SeqFile::open(&path, Mode::Write, Some(SeqHeader::new(11, 36, 300).unwrap()))
        .unwrap();
    let mut writer = SequenceWriter::new(file).unwrap();
    for &p in &primes {
        writer.write(p).unwrap();
    }
    writer.finish().unwrap();

    // Simulate a writer that died before rewriting the header.
    {
        use std::io::{Seek, SeekFrom, Write};
        let mut raw = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        raw.seek(SeekFrom::Start(8)).unwrap();
        raw.write_all(&[0u8; 12]).unwrap();
    }

    let mut file = SeqFile::open(&path, Mode::Read, None).unwrap();
    assert_eq!(file.header().count(), 0);

    // The size-based estimate lands within one frame of the truth.
    let estimated = file.estimated_count().unwrap();
    let truth = primes.len() as u64;
    assert!(estimated >= truth, "estimated {} < {}", estimated, truth);
    assert!(estimated - truth < 300, "estimated {} truth {}", estimated, truth);

    // An end-of-stream scan recovers the exact count: trailing padding
    // decodes into values that stop looking like primes.
    let mut cursor = file.iter().unwrap().unbounded();
    let mut recovered = 0u64;
    let mut previous = 0u64;
    loop {
        match cursor.next() {
            Ok(Some(value)) => {
                if value <= previous || (value != 2 && value % 2 == 0) {
                    break;
                }
                previous = value;
                recovered += 1;
            }
            Ok(None) => break,
            Err(Error::Truncated(_)) => break,
            Err(e) => panic!("unexpected failure: {:?}", e),
        }
    }
    assert_eq!(recovered, truth);
    assert_eq!(previous, *primes.last().unwrap());
}

use anyhow::{bail, Context, Result};
use rand::Rng;

use primal::{Bias, Mode, SeqFile};

use crate::cli::GetQuery;

pub fn run_get(infile: &str, query: &GetQuery) -> Result<()> {
    let mut file = SeqFile::open(infile, Mode::Read, None)
        .with_context(|| format!("Failed to open {}", infile))?;

    let value: i64 = if query.first {
        file.first()? as i64
    } else if query.last {
        file.last()? as i64
    } else if let Some(index) = query.index {
        file.get(index)? as i64
    } else if let Some(n) = query.greater_than {
        file.nearest_to(n, Bias::Forward)?
    } else if let Some(n) = query.less_than {
        file.nearest_to(n, Bias::Backward)?
    } else if let Some(n) = query.nearest {
        file.nearest_to(n, Bias::Nearest)?
    } else if query.random {
        let count = file.header().count();
        if count == 0 {
            bail!("{} contains no entries", infile);
        }
        let index = rand::thread_rng().gen_range(0..count);
        file.get(index)? as i64
    } else {
        bail!("no query given");
    };

    println!("{}", value);
    Ok(())
}

//! `hash`: print content references without talking to a server.

use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use serde::Serialize;

use camli_core::Hasher;

use super::collect_files;
use crate::Options;

#[derive(Serialize)]
struct HashLine<'a> {
    path: &'a str,
    reference: String,
}

pub fn run(opts: &Options, paths: &[&str]) -> Result<()> {
    let hasher = Hasher::new(opts.config.digest()?);

    for path in collect_files(paths)? {
        let file = File::open(&path).with_context(|| format!("cannot open {}", path.display()))?;
        let reference = hasher
            .reference_reader(BufReader::new(file))
            .with_context(|| format!("cannot read {}", path.display()))?;

        if opts.json {
            let display = path.to_string_lossy();
            let line = HashLine {
                path: &display,
                reference: reference.to_string(),
            };
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!("{reference}  {}", path.display());
        }
    }
    Ok(())
}

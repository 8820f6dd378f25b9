use std::fs;
use std::io::{self, Read};

use anyhow::{bail, Context, Result};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let source = match args.next() {
        Some(path) => fs::read_to_string(&path).with_context(|| format!("Reading {path}"))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Reading stdin")?;
            buffer
        }
    };
    if args.next().is_some() {
        bail!("Only one input file is supported");
    }

    let output = mython::run(&source)?;
    print!("{output}");
    Ok(())
}

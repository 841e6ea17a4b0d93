//! Command-line front end. Reads the toolpath file, runs the processor, and
//! writes the result back (or to the configured output path). Intended to be
//! wired into the slicer's post-processing hook, so on Windows fatal errors
//! wait for Enter unless `--skip-input` is passed.

use std::fs;
use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use arcpost::errors::PostError;
use arcpost::process::process;

#[derive(Parser, Debug)]
#[clap(
    version,
    about = "Reprint bridged overhangs in slicer G-code as concentric arcs"
)]
struct Cli {
    /// Path to the G-code file
    path: PathBuf,

    /// Skip any user input prompts (prompts only occur on Windows)
    #[arg(long)]
    skip_input: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let skip_input = cli.skip_input || !cfg!(windows);

    if let Err(err) = run(&cli) {
        log::error!("{err:#}");
        if !skip_input {
            eprintln!("Cannot run, G-code unmodified. Press Enter to close.");
            let _ = std::io::stdin().lock().lines().next();
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let content = fs::read_to_string(&cli.path)
        .map_err(PostError::Io)
        .with_context(|| format!("failed to read input file: {}", cli.path.display()))?;
    let lines: Vec<String> = content.lines().map(str::to_string).collect();

    let outcome = process(&lines)?;

    match outcome.output {
        Some(out_lines) => {
            let target = outcome
                .settings
                .params
                .output_path
                .clone()
                .map(PathBuf::from)
                .unwrap_or_else(|| cli.path.clone());
            if target == cli.path {
                log::info!("overwriting {}", target.display());
            } else {
                log::info!("writing to {}", target.display());
            }
            let mut body = out_lines.join("\n");
            body.push('\n');
            fs::write(&target, body)
                .map_err(PostError::Io)
                .with_context(|| format!("failed to write output file: {}", target.display()))?;
        },
        None => {
            log::info!("no overhang was converted; leaving the file untouched");
        },
    }

    Ok(())
}

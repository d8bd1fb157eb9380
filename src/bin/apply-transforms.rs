//! Gear front end for antsApplyTransforms.
//!
//! Reads the gear `config.json`, resolves the nine transform slots
//! (extracting zip members as needed), assembles the command line, runs
//! the tool, and writes a `.manifest.json` listing the outputs.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use gearkit::gear::{build_command, run_command, write_manifest, ApplyTransformsConfig};

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Args {
    /// the gear configuration file
    #[arg(short, long, default_value = "/flywheel/v0/config.json")]
    config: PathBuf,

    /// directory holding the staged input files; the tool runs from here
    #[arg(short, long, default_value = "/flywheel/v0/input")]
    input_dir: PathBuf,

    /// directory where the warped image and manifest are written
    #[arg(short, long, default_value = "/flywheel/v0/output")]
    output_dir: PathBuf,

    /// assemble and print the command without running it
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Args::parse();

    let config = ApplyTransformsConfig::from_file(&cli.config)
        .with_context(|| format!("loading gear config {}", cli.config.display()))?;

    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("creating output directory {}", cli.output_dir.display()))?;

    let (program, args) = build_command(&config, &cli.output_dir)?;
    println!("antsApplyTransforms command: {} {}", program.display(), args.join(" "));
    if cli.dry_run {
        return Ok(());
    }

    run_command(&program, &args, &cli.input_dir)?;
    let manifest = write_manifest(&cli.output_dir)?;
    log::info!("wrote manifest {}", manifest.display());
    Ok(())
}

//! Commandline tool computing slicewise LC contrast ratios.
//!
//! Takes an LC image, a (usually bilateral) ROI mask, and an optional
//! reference mask on the same grid. Writes one CSV row per (hemisphere,
//! slice) and a summary JSON next to it, and prints the summary to stdout.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};

use gearkit::contrast::run_scan;

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the LC intensity volume (.nii or .nii.gz)
    #[arg(short, long)]
    input: PathBuf,

    /// the ROI mask, on the same grid as the input
    #[arg(short, long)]
    roi_mask: PathBuf,

    /// an optional reference-region mask; without it all ratios are NaN
    #[arg(short = 'e', long)]
    reference_mask: Option<PathBuf>,

    /// split the ROI into left/right hemispheres by world-space X
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    split_hemispheres: bool,

    /// directory where the CSV and summary JSON are written
    #[arg(short, long, default_value = "./")]
    output: PathBuf,

    /// base name for the output files
    #[arg(short, long, default_value = "lc_contrast")]
    name: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Args::parse();

    let csv_name = if cli.name.ends_with(".csv") {
        cli.name.clone()
    } else {
        format!("{}.csv", cli.name)
    };
    let json_name = format!("{}.summary.json", csv_name.trim_end_matches(".csv"));

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("creating output directory {}", cli.output.display()))?;
    let csv_path = cli.output.join(csv_name);
    let json_path = cli.output.join(json_name);

    let summary = run_scan(
        &cli.input,
        &cli.roi_mask,
        cli.reference_mask.as_deref(),
        cli.split_hemispheres,
        &csv_path,
        &json_path,
    )?;

    println!("{}", serde_json::to_string_pretty(&summary.to_json())?);
    Ok(())
}

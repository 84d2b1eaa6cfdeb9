use std::path::PathBuf;

use clap::Parser;
use wired::{config::WiringConfig, db::Circuit, factory::ElementFactory};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Circuit document to inspect
    #[clap(value_parser)]
    document: PathBuf,
    /// Print a JSON summary instead of the text tree
    #[clap(long)]
    json: bool,
    /// Wiring config (JSON)
    #[clap(long)]
    config: Option<PathBuf>,
    /// Write the loaded circuit back out to this path
    #[clap(long)]
    out: Option<PathBuf>,
}

/// Loads a circuit document and prints what it contains.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => WiringConfig::from_path(path)?,
        None => WiringConfig::default(),
    };
    let (circuit, report) = Circuit::load_from_path(
        &args.document,
        ElementFactory::with_default_catalog(),
        config,
    )?;
    if !report.is_clean() {
        log::warn!(
            "Skipped {} element(s) and dropped {} connection(s)",
            report.skipped_elements.len(),
            report.dropped_connections
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&circuit.summary())?);
    } else {
        print!("{}", circuit.display());
    }

    if let Some(out) = &args.out {
        circuit.save_to_path(out)?;
    }
    Ok(())
}

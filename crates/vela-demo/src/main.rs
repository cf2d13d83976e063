//! Vela Demo - command line entry point

use tracing_subscriber::EnvFilter;
use vela_demo::{Options, USAGE};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let options = Options::parse(args)?;
    tracing::info!("Starting Vela demo...");
    let report = vela_demo::run(&options)?;

    println!("{} ({:?})", report.url, report.state);
    if !report.title.is_empty() {
        println!("  title: {}", report.title);
    }
    for (script, value) in options.scripts.iter().zip(&report.results) {
        println!("  {} => {}", script, value);
    }
    println!(
        "  frame: {}x{} -> {}",
        report.frame.width,
        report.frame.height,
        report.output.display()
    );
    Ok(())
}

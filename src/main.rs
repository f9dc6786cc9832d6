use clap::Parser;
use infinity_metrics_installer::{Cli, Pipeline, SystemExecutor};

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    if let Err(e) = Pipeline::new(SystemExecutor).run(&cli) {
        eprintln!("Error: {:#}", anyhow::Error::new(e));
        std::process::exit(1);
    }
}

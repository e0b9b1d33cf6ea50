use clap::Parser;
use tasknest::cli::commands::Cli;
use tasknest::cli::handlers;
use tracing_subscriber::EnvFilter;

fn main() {
    // stdout carries command output, so logs go to stderr
    let filter = EnvFilter::try_from_env("TASKNEST_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = handlers::dispatch(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

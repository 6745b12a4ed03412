use clap::Parser;
use colored::Colorize;
use portal_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		eprintln!("{} {err}", "error:".red().bold());
		let mut source = std::error::Error::source(&err);
		while let Some(cause) = source {
			eprintln!("  {} {cause}", "caused by:".dimmed());
			source = cause.source();
		}
		std::process::exit(err.exit_code());
	}
}

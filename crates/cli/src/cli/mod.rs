
use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};

use crate::config::DialogDefault;

fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Yellow.on_default().bold())
		.usage(AnsiColor::Yellow.on_default().bold())
		.literal(AnsiColor::Green.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
}

/// Sandbox portal broker.
#[derive(Parser, Debug)]
#[command(name = "portal")]
#[command(about = "Brokers file transfers, permissions and desktop services for sandboxed apps")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Config file (default: $XDG_CONFIG_HOME/portal/config.json)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the broker daemon in the foreground.
	Serve(ServeArgs),
	/// Send one call to a running daemon and print what comes back.
	Call(CallArgs),
	/// Inspect and edit stored permissions.
	Permission(PermissionArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
	/// Socket to listen on.
	#[arg(long, value_name = "PATH")]
	pub socket: Option<PathBuf>,

	/// Worker threads for blocking handler bodies.
	#[arg(long, value_name = "N")]
	pub workers: Option<usize>,

	/// Answer given by the built-in access dialog.
	#[arg(long, value_enum)]
	pub dialog_default: Option<DialogDefault>,

	/// Permission store file.
	#[arg(long, value_name = "FILE")]
	pub permission_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CallArgs {
	/// Call as JSON, tagged by `method` (serial is added).
	#[arg(value_name = "JSON")]
	pub call: String,

	/// Files passed as descriptors, in order (index 0, 1, ...).
	#[arg(long = "fd", value_name = "FILE")]
	pub fds: Vec<PathBuf>,

	/// Open `--fd` files for writing too.
	#[arg(long)]
	pub writable: bool,

	/// For request handles, keep printing signals until the response.
	#[arg(long)]
	pub follow: bool,

	/// Daemon socket.
	#[arg(long, value_name = "PATH")]
	pub socket: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PermissionArgs {
	/// Permission store file.
	#[arg(long, value_name = "FILE")]
	pub file: Option<PathBuf>,

	#[command(subcommand)]
	pub action: PermissionAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PermissionAction {
	/// List stored permissions.
	List {
		/// Only this table.
		#[arg(long)]
		table: Option<String>,
	},
	/// Store a permission.
	Set {
		table: String,
		id: String,
		app_id: String,
		#[arg(required = true)]
		tokens: Vec<String>,
	},
	/// Forget a permission, for one app or for every app.
	Reset {
		table: String,
		id: String,
		app_id: Option<String>,
	},
}

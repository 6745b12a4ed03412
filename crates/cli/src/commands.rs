//! Subcommand implementations.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;

use colored::Colorize;
use portal::Broker;
use portal_protocol::{Call, ReplyBody, ServerMessage};
use portal_runtime::{PermissionStore, WorkerPool};
use serde::Serialize;
use tracing::info;

use crate::backends::default_backends;
use crate::cli::{CallArgs, Cli, Commands, PermissionAction, PermissionArgs, ServeArgs};
use crate::config::{self, PortalConfig, Settings};
use crate::daemon::{self, Client, ConnectionBus, Daemon, DaemonState};
use crate::error::{CliError, Result};
use crate::identity::ProcIdentityResolver;
use crate::permission_store::JsonPermissionStore;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config_path = cli.config.clone().unwrap_or_else(PortalConfig::default_path);
	let config = PortalConfig::load(&config_path)?;

	match cli.command {
		Commands::Serve(args) => serve(&config, &args).await,
		Commands::Call(args) => call(&config, &args).await,
		Commands::Permission(args) => permission(&config, &args),
	}
}

fn serve_overrides(args: &ServeArgs) -> PortalConfig {
	PortalConfig {
		socket_path: args.socket.clone(),
		workers: args.workers,
		dialog_default: args.dialog_default,
		permission_file: args.permission_file.clone(),
		..Default::default()
	}
}

pub async fn serve(config: &PortalConfig, args: &ServeArgs) -> Result<()> {
	let settings = Settings::resolve(config, &serve_overrides(args));
	info!(
		target = "portal.daemon",
		workers = settings.workers,
		permissions = %settings.permission_file.display(),
		documents = %settings.document_mount.display(),
		"starting broker"
	);

	let bus = ConnectionBus::new();
	let store: Arc<dyn PermissionStore> = Arc::new(JsonPermissionStore::new(&settings.permission_file));
	let backends = default_backends(&settings, bus.clone(), store);
	let workers = WorkerPool::new(settings.workers)?;
	let broker = Broker::new(bus.clone(), workers, backends);
	let state = DaemonState::new(bus, broker, Arc::new(ProcIdentityResolver::new()));

	Daemon::bind(&settings.socket_path, state)?.run().await?;
	Ok(())
}

pub async fn call(config: &PortalConfig, args: &CallArgs) -> Result<()> {
	let socket = args
		.socket
		.clone()
		.or_else(|| config.socket_path.clone())
		.unwrap_or_else(daemon::socket_path);
	let call: Call = serde_json::from_str(&args.call).map_err(|e| CliError::InvalidCall(e.to_string()))?;

	let files = args
		.fds
		.iter()
		.map(|path| OpenOptions::new().read(true).write(args.writable).open(path))
		.collect::<std::io::Result<Vec<File>>>()?;
	let fds: Vec<BorrowedFd<'_>> = files.iter().map(AsFd::as_fd).collect();

	let mut client = Client::connect(&socket).await?;
	let (body, signals) = client.call(call, &fds).await?;
	for signal in &signals {
		print_json(signal)?;
	}
	print_json(&body)?;

	let ReplyBody::Handle { handle } = body else {
		return Ok(());
	};
	if !args.follow {
		return Ok(());
	}
	while let Some(message) = client.next_message().await? {
		print_json(&message)?;
		if let ServerMessage::Signal(signal) = &message {
			if signal.path == handle && signal.response_code().is_some() {
				break;
			}
		}
	}
	Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
	println!("{}", serde_json::to_string(value)?);
	Ok(())
}

pub fn permission(config: &PortalConfig, args: &PermissionArgs) -> Result<()> {
	let path = args
		.file
		.clone()
		.or_else(|| config.permission_file.clone())
		.unwrap_or_else(config::default_permission_file);
	let store = JsonPermissionStore::new(path);

	match &args.action {
		PermissionAction::List { table } => {
			let rows = store.list(table.as_deref())?;
			if rows.is_empty() {
				eprintln!("{}", "no permissions stored".dimmed());
			}
			for row in rows {
				println!(
					"{} {} {} {}",
					row.table.bold(),
					row.id,
					row.app_id.cyan(),
					row.tokens.join(",")
				);
			}
		}
		PermissionAction::Set {
			table,
			id,
			app_id,
			tokens,
		} => {
			store.put(table, id, app_id, tokens.clone())?;
			println!("{} {table} {id} {app_id} = {}", "set".green(), tokens.join(","));
		}
		PermissionAction::Reset { table, id, app_id } => {
			let removed = store.reset(table, id, app_id.as_deref())?;
			let noun = if removed == 1 { "entry" } else { "entries" };
			println!("{} {removed} {noun}", "removed".yellow());
		}
	}
	Ok(())
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{fs, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use crate::paths::DaemonDir;

mod client;
mod daemon;
mod paths;

#[derive(Parser)]
#[command(name = "ocapd", version, about = "ocap kernel daemon and diagnostic CLI")]
struct Cli {
	/// Daemon state directory (pid, socket, store, log)
	#[arg(long, env = "DAEMON_DIR", global = true)]
	daemon_dir: Option<PathBuf>,
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Start the daemon in the background
	Start {
		/// Worker command line used to spawn vat workers
		#[arg(long)]
		worker: Option<String>,
	},
	/// Run the daemon in the foreground (used by `start`)
	Serve {
		#[arg(long)]
		worker: Option<String>,
	},
	/// Stop the running daemon
	Stop,
	/// Report whether the daemon answers, and its scheduler state
	Status,
	/// Stop and start again
	Restart {
		/// Checkpoint and collect garbage before restarting
		#[arg(long)]
		flush: bool,
		#[arg(long)]
		worker: Option<String>,
	},
	/// Print the daemon pid
	Pid,
	/// Print the tail of the daemon log
	Logs {
		#[arg(long, default_value_t = 50)]
		lines: usize,
	},
	/// Force a full GC sweep and a store checkpoint
	Flush,
	/// Launch a subcluster from a cluster config file
	Launch {
		path: PathBuf,
	},
	/// Show a kernel table
	View {
		/// objects | promises | vats
		table: String,
	},
	/// Queue a message to a kref and wait for the result
	Invoke {
		kref: String,
		method: String,
		/// Arguments, each parsed as JSON (bare words become strings)
		args: Vec<String>,
	},
	/// Show one object or promise row
	Inspect {
		kref: String,
	},
	/// Ocap URL operations against the remote gateway
	Url {
		#[command(subcommand)]
		action: UrlAction,
	},
}

#[derive(Subcommand)]
enum UrlAction {
	Issue { kref: String },
	Redeem { url: String },
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	let dir = DaemonDir::resolve(cli.daemon_dir.clone());
	match run(cli, &dir) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("ocapd: {err}");
			ExitCode::FAILURE
		}
	}
}

fn run(cli: Cli, dir: &DaemonDir) -> Result<(), String> {
	match cli.command {
		Command::Start { worker } => daemon::start(dir, worker).map_err(|err| err.to_string()),
		Command::Serve { worker } => {
			let command = worker.map(split_command).unwrap_or_default();
			daemon::serve(dir, command).map_err(|err| err.to_string())
		}
		Command::Stop => daemon::stop(dir).map_err(|err| err.to_string()),
		Command::Status => {
			if !client::is_running(dir) {
				println!("not running");
				return Ok(());
			}
			let status = client::request(dir, "status", Value::Null)?;
			println!("running");
			print_pretty(&status);
			Ok(())
		}
		Command::Restart { flush, worker } => {
			if flush && client::is_running(dir) {
				client::request(dir, "flush", Value::Null)?;
			}
			if client::is_running(dir) {
				daemon::stop(dir).map_err(|err| err.to_string())?;
			}
			daemon::start(dir, worker).map_err(|err| err.to_string())
		}
		Command::Pid => {
			let pid = daemon::read_pid(dir).map_err(|err| err.to_string())?;
			println!("{pid}");
			Ok(())
		}
		Command::Logs { lines } => {
			let content = fs::read_to_string(dir.log_file())
				.map_err(|err| format!("cannot read {}: {err}", dir.log_file().display()))?;
			for line in tail(&content, lines) {
				println!("{line}");
			}
			Ok(())
		}
		Command::Flush => {
			client::request(dir, "flush", Value::Null)?;
			println!("flushed");
			Ok(())
		}
		Command::Launch { path } => {
			let raw = fs::read_to_string(&path)
				.map_err(|err| format!("cannot read {}: {err}", path.display()))?;
			let config: Value = serde_json::from_str(&raw)
				.map_err(|err| format!("{} is not valid json: {err}", path.display()))?;
			let result = client::request(dir, "launchSubcluster", json!({ "config": config }))?;
			print_pretty(&result);
			Ok(())
		}
		Command::View { table } => {
			let rows = client::request(dir, "view", json!({ "table": table }))?;
			print_pretty(&rows);
			Ok(())
		}
		Command::Invoke { kref, method, args } => {
			let parsed: Vec<Value> = args.iter().map(|arg| parse_arg(arg)).collect();
			let body = Value::Array(parsed).to_string();
			let result = client::request(
				dir,
				"invoke",
				json!({
					"target": kref,
					"method": method,
					"args": { "body": body, "slots": [] }
				}),
			)?;
			print_pretty(&result);
			Ok(())
		}
		Command::Inspect { kref } => {
			let row = client::request(dir, "inspect", json!({ "kref": kref }))?;
			print_pretty(&row);
			Ok(())
		}
		Command::Url { action } => match action {
			UrlAction::Issue { kref } => {
				let url = client::request(dir, "issueOcapURL", json!({ "kref": kref }))?;
				print_pretty(&url);
				Ok(())
			}
			UrlAction::Redeem { url } => {
				let kref = client::request(dir, "redeemOcapURL", json!({ "url": url }))?;
				print_pretty(&kref);
				Ok(())
			}
		},
	}
}

fn split_command(raw: String) -> Vec<String> {
	raw.split_whitespace().map(str::to_string).collect()
}

/// Bare words become JSON strings so `invoke ko1 greet world` works.
fn parse_arg(raw: &str) -> Value {
	serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn tail(content: &str, count: usize) -> Vec<&str> {
	let lines: Vec<&str> = content.lines().collect();
	let start = lines.len().saturating_sub(count);
	lines[start..].to_vec()
}

fn print_pretty(value: &Value) {
	match value {
		Value::String(text) => println!("{text}"),
		other => println!("{}", serde_json::to_string_pretty(other).unwrap_or_default()),
	}
}

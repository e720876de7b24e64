// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The resident side of `ocapd`: socket server, pid file, and the
//! kernel it fronts.

use std::{
	fs,
	io::{BufRead, BufReader, Write},
	os::unix::net::{UnixListener, UnixStream},
	sync::Arc,
	thread,
	time::{Duration, Instant},
};

use ocap_kernel::{Kernel, KernelConfig, ProcessWorkerService};
use ocap_rpc::RpcHandler;
use ocap_storage::SqliteDatabase;
use ocap_types::jsonrpc::JsonRpcRequest;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::paths::DaemonDir;

pub type DaemonResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Run the daemon in the foreground until killed.
pub fn serve(dir: &DaemonDir, worker_command: Vec<String>) -> DaemonResult<()> {
	fs::create_dir_all(dir.root())?;
	init_logging(dir)?;

	let socket_path = dir.socket_file();
	if socket_path.exists() {
		if UnixStream::connect(&socket_path).is_ok() {
			return Err(format!("another daemon is already serving {}", socket_path.display()).into());
		}
		// stale socket from an unclean shutdown
		fs::remove_file(&socket_path)?;
	}

	let db = SqliteDatabase::open(dir.db_file())?;
	let service = ProcessWorkerService::new(worker_command);
	let kernel = Kernel::new(Box::new(db), Box::new(service), KernelConfig::default())?;
	let handler = Arc::new(Mutex::new(RpcHandler::new(kernel)));

	let listener = UnixListener::bind(&socket_path)?;
	fs::write(dir.pid_file(), std::process::id().to_string())?;
	info!(socket = %socket_path.display(), pid = std::process::id(), "daemon listening");

	for stream in listener.incoming() {
		match stream {
			Ok(stream) => {
				let handler = Arc::clone(&handler);
				thread::Builder::new()
					.name("ocapd-conn".into())
					.spawn(move || serve_connection(stream, handler))?;
			}
			Err(err) => warn!(%err, "accept failed"),
		}
	}
	Ok(())
}

fn serve_connection(stream: UnixStream, handler: Arc<Mutex<RpcHandler>>) {
	let mut writer = match stream.try_clone() {
		Ok(writer) => writer,
		Err(err) => {
			error!(%err, "connection clone failed");
			return;
		}
	};
	let reader = BufReader::new(stream);
	for line in reader.lines() {
		let Ok(line) = line else { break };
		if line.trim().is_empty() {
			continue;
		}
		let request: JsonRpcRequest = match serde_json::from_str(&line) {
			Ok(request) => request,
			Err(err) => {
				warn!(%err, "discarding unparseable request");
				continue;
			}
		};
		let response = handler.lock().handle(&request);
		if let Some(response) = response {
			let mut reply = match serde_json::to_string(&response) {
				Ok(reply) => reply,
				Err(err) => {
					error!(%err, "response serialization failed");
					break;
				}
			};
			reply.push('\n');
			if writer.write_all(reply.as_bytes()).and_then(|()| writer.flush()).is_err() {
				break;
			}
		}
	}
}

fn init_logging(dir: &DaemonDir) -> DaemonResult<()> {
	let file = fs::OpenOptions::new().create(true).append(true).open(dir.log_file())?;
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_writer(file)
		.with_ansi(false)
		.init();
	Ok(())
}

/// Fork the daemon as a detached child running `ocapd serve`.
pub fn start(dir: &DaemonDir, worker_command: Option<String>) -> DaemonResult<()> {
	if crate::client::is_running(dir) {
		return Err("daemon is already running".into());
	}
	fs::create_dir_all(dir.root())?;
	let log = fs::OpenOptions::new().create(true).append(true).open(dir.log_file())?;
	let exe = std::env::current_exe()?;
	let mut command = std::process::Command::new(exe);
	command.arg("--daemon-dir").arg(dir.root()).arg("serve");
	if let Some(worker) = worker_command {
		command.arg("--worker").arg(worker);
	}
	command.stdin(std::process::Stdio::null())
		.stdout(std::process::Stdio::from(log.try_clone()?))
		.stderr(std::process::Stdio::from(log));
	let child = command.spawn()?;

	// wait for the socket to answer
	let deadline = Instant::now() + Duration::from_secs(5);
	while Instant::now() < deadline {
		if crate::client::is_running(dir) {
			println!("started (pid {})", child.id());
			return Ok(());
		}
		thread::sleep(Duration::from_millis(100));
	}
	Err("daemon did not come up within 5s; see daemon.log".into())
}

pub fn read_pid(dir: &DaemonDir) -> DaemonResult<i32> {
	let raw = fs::read_to_string(dir.pid_file())
		.map_err(|_| format!("no pid file at {}", dir.pid_file().display()))?;
	Ok(raw.trim().parse::<i32>()?)
}

/// Signal the daemon and wait for it to exit.
pub fn stop(dir: &DaemonDir) -> DaemonResult<()> {
	let pid = read_pid(dir)?;
	// SAFETY: sending a signal to a pid we read from our own pid file
	let killed = unsafe { libc::kill(pid, libc::SIGTERM) } == 0;
	if !killed {
		// process is already gone; fall through to cleanup
		warn!(pid, "daemon process was not running");
	}
	let deadline = Instant::now() + Duration::from_secs(5);
	while Instant::now() < deadline {
		if unsafe { libc::kill(pid, 0) } != 0 {
			break;
		}
		thread::sleep(Duration::from_millis(100));
	}
	let _ = fs::remove_file(dir.pid_file());
	let _ = fs::remove_file(dir.socket_file());
	println!("stopped (pid {pid})");
	Ok(())
}

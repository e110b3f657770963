mod config;

use std::path::Path;
use std::time::{Duration, Instant};

use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use warden::{pidfile, processors, termination, DefaultFactory, Platform, RunningProcess, SignalExitRegistrar, Supervisor};

const KILL_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.init();

	let args: Vec<String> = std::env::args().skip(1).collect();

	if args.is_empty() {
		print_usage();
		return;
	}

	match args[0].as_str() {
		"help" | "--help" | "-h" => print_usage(),
		"version" | "--version" | "-V" => println!("warden {}", env!("CARGO_PKG_VERSION")),
		"run" => cmd_run(&args[1..]).await,
		"status" | "st" => cmd_status(&args[1..]).await,
		"kill" => cmd_kill(&args[1..]).await,
		other => {
			eprintln!("unknown command: {}", other);
			eprintln!("run 'warden help' for usage");
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {}: launch and supervise external executables", "warden".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} <command> [args]", "warden".bold());
	eprintln!();

	eprintln!("{}", "processes".cyan().bold());
	eprintln!("  {} <launch.toml>                    Start, wait until ready, stop on Ctrl-C", "run".bold());
	eprintln!("  {} <pidfile>                     Is the recorded process alive?", "status".bold());
	eprintln!("  {} <pidfile> [--force|--interrupt] Stop the recorded process", "kill".bold());
	eprintln!();

	eprintln!("{}", "other".cyan().bold());
	eprintln!("  {}                                  Show this help", "help".bold());
	eprintln!("  {}                               Print version", "version".bold());
	eprintln!();
	eprintln!("  Set {} to change log verbosity (default: info)", "RUST_LOG".bold());
}

fn fail(message: impl std::fmt::Display) -> ! {
	eprintln!("{} {}", "error:".red().bold(), message);
	std::process::exit(1);
}

async fn cmd_run(args: &[String]) {
	let Some(path) = args.first() else {
		fail("usage: warden run <launch.toml>");
	};
	let launch = config::load(Path::new(path)).unwrap_or_else(|e| fail(e));
	tracing::debug!("launching {} from {}", launch.executable.display(), path);
	let support = launch.support();
	let output = launch.output();

	let registrar = SignalExitRegistrar::new();
	let supervisor = Supervisor::new(registrar.clone());

	let started = match &launch.ready {
		Some(ready) => supervisor
			.start(
				&ready.factory(),
				&launch.executable,
				&launch.args,
				&launch.env,
				&launch.process,
				&output,
				&support,
			)
			.await
			.map(|watched| watched.running().clone()),
		None => {
			supervisor
				.start(
					&DefaultFactory,
					&launch.executable,
					&launch.args,
					&launch.env,
					&launch.process,
					&output,
					&support,
				)
				.await
		}
	};
	let running = started.unwrap_or_else(|e| fail(e));

	match running.pid() {
		Some(pid) => eprintln!("{} {} (pid {})", "started".green(), launch.name.bold(), pid),
		None => eprintln!("{} {} (pid unknown)", "started".green(), launch.name.bold()),
	}

	tokio::select! {
		_ = warden::exit::wait_for_shutdown_signal() => eprintln!("{} {}", "stopping".yellow(), launch.name),
		_ = wait_for_exit(&running) => eprintln!("{} {} exited on its own", "note:".yellow(), launch.name),
	}

	registrar.run_hooks().await;
	if let Err(e) = running.stop().await {
		fail(e);
	}
	eprintln!("{} {}", "stopped".dimmed(), launch.name);
}

async fn wait_for_exit(running: &RunningProcess) {
	while !running.has_exited().await {
		tokio::time::sleep(Duration::from_millis(500)).await;
	}
}

async fn cmd_status(args: &[String]) {
	let Some(path) = args.first() else {
		fail("usage: warden status <pidfile>");
	};
	let Some(pid) = pidfile::read(Path::new(path)) else {
		fail(format!("no pid recorded in {}", path));
	};

	if termination::is_running(Platform::detect(), pid).await {
		println!("{} pid {}", "running".green(), pid);
	} else {
		println!("{} pid {} (stale pid file)", "not running".red(), pid);
		std::process::exit(1);
	}
}

async fn cmd_kill(args: &[String]) {
	let force = args.iter().any(|a| a == "--force" || a == "-f");
	let interrupt = args.iter().any(|a| a == "--interrupt" || a == "-i");
	let Some(path) = args.iter().find(|a| !a.starts_with('-')) else {
		fail("usage: warden kill <pidfile> [--force|--interrupt]");
	};
	if force && interrupt {
		fail("--force and --interrupt are mutually exclusive");
	}
	let path = Path::new(path);
	let Some(pid) = pidfile::read(path) else {
		fail(format!("no pid recorded in {}", path.display()));
	};

	let platform = Platform::detect();
	let support = warden::SupportConfig::new("warden kill");
	let output = processors::named_console("[kill]");
	let sent = if interrupt {
		termination::interrupt(&support, platform, output, pid).await
	} else if platform.is_unix_like() {
		if force {
			eprintln!("{} no forced kill on this platform, sending SIGTERM", "note:".yellow());
		}
		termination::terminate(&support, platform, output, pid).await
	} else {
		termination::force_kill(&support, platform, output, pid).await
	};
	if !sent {
		fail(format!("could not signal pid {}", pid));
	}

	let deadline = Instant::now() + KILL_WAIT;
	while termination::is_running(platform, pid).await {
		if Instant::now() >= deadline {
			fail(format!("pid {} still running after {}s", pid, KILL_WAIT.as_secs()));
		}
		tokio::time::sleep(Duration::from_millis(200)).await;
	}

	if let Err(e) = pidfile::remove(path) {
		fail(e);
	}
	println!("{} pid {}", "stopped".green(), pid);
}

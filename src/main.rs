//! alderd — a spanning-tree IRC daemon.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use alderd::config::{Config, ConfigError};
use alderd::error::exit;
use alderd::network::gateway::Gateway;
use alderd::state::Network;

#[derive(Debug, Parser)]
#[command(name = "alderd", about = "spanning-tree IRC daemon", disable_version_flag = true)]
struct Args {
    /// Stay in the foreground (the daemon never forks; accepted for
    /// init-script compatibility).
    #[arg(long)]
    nofork: bool,

    /// Path to the configuration file.
    #[arg(long, default_value = "alderd.toml")]
    config: String,

    /// Log to this file instead of standard error.
    #[arg(long)]
    logfile: Option<String>,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,

    /// Disable logging entirely.
    #[arg(long)]
    nolog: bool,

    /// Permit running with superuser privileges.
    #[arg(long)]
    runasroot: bool,

    /// Print the version and exit.
    #[arg(long)]
    version: bool,

    /// Run the internal self-checks and exit.
    #[arg(long)]
    testsuite: bool,
}

fn main() {
    let args = Args::parse();
    std::process::exit(run(args));
}

fn run(args: Args) -> i32 {
    if args.version {
        println!("{}", alderd::version_string());
        return exit::OK;
    }
    if args.testsuite {
        return testsuite();
    }
    let _ = args.nofork;

    if is_root() && !args.runasroot {
        eprintln!("refusing to run as root; pass --runasroot to override");
        return exit::ROOT;
    }

    if let Err(code) = init_logging(&args) {
        return code;
    }

    let config = match Config::load(&args.config) {
        Ok(config) => Arc::new(config),
        Err(ConfigError::Die(reason)) => {
            error!(reason, "config refuses to run");
            return exit::DIE_TAG;
        }
        Err(err) => {
            error!(%err, path = %args.config, "cannot load config");
            return exit::CONFIG;
        }
    };

    if let Err(err) = write_pid_file(&config.server.pid_file) {
        error!(%err, path = %config.server.pid_file, "cannot write pid file");
        return exit::PID_FILE;
    }

    info!(
        server = %config.server.name,
        sid = %config.server.sid,
        network = %config.server.network,
        "starting {}",
        alderd::version_string()
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "cannot start runtime");
            return exit::FORK;
        }
    };

    runtime.block_on(async move {
        let mut net = Network::new(config.clone());
        net.config_path = Some(args.config.clone());
        let shared = Arc::new(Mutex::new(net));

        match Gateway::bind(shared.clone(), config).await {
            Ok(gateway) => gateway.run().await,
            Err(code) => code,
        }
    })
}

fn init_logging(args: &Args) -> Result<(), i32> {
    if args.nolog {
        return Ok(());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match &args.logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    eprintln!("cannot open log file {}: {}", path, err);
                    exit::LOG
                })?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn write_pid_file(path: &str) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{}", std::process::id())
}

#[cfg(unix)]
fn is_root() -> bool {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self")
        .map(|m| m.uid() == 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

/// Startup self-checks, runnable from packaging scripts.
fn testsuite() -> i32 {
    use alder_proto::Message;
    use alderd::link::collide;

    let parse_ok = ":nick!u@h PRIVMSG #c :hello"
        .parse::<Message>()
        .map(|m| m.command == "PRIVMSG" && m.params.len() == 2)
        .unwrap_or(false);
    let casemap_ok = alder_proto::CaseMapping::Rfc1459.eq("[test]", "{TEST}");
    let collide_ok =
        collide::decide(900, 1000, true) == collide::Collision::KillLocal
            && collide::decide(500, 500, false) == collide::Collision::KillBoth;

    for (name, ok) in [
        ("message parser", parse_ok),
        ("case mapping", casemap_ok),
        ("collision rules", collide_ok),
    ] {
        println!("{:<16} {}", name, if ok { "ok" } else { "FAILED" });
        if !ok {
            return exit::DIE;
        }
    }
    exit::OK
}

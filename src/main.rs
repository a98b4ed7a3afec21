use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::error;

use dns_filter::config::{self, EvaluatorConfig, ServerConfig};
use dns_filter::control::{self, Status};
use dns_filter::error::{Error, Result};
use dns_filter::policy::{Decision, PolicyEvaluator, sinkhole_record};
use dns_filter::server::{self, FilterServer};
use dns_filter::{logging, monitor};

#[derive(Parser)]
#[command(name = "dns-filter")]
#[command(about = "DNS blocklist policy daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    opts: Options,
}

#[derive(Subcommand)]
enum Command {
    /// Run in the foreground (for service supervisors)
    Run,
    /// Detach into the background and write the PID file
    Start,
    /// Stop the daemon named by the PID file
    Stop,
    /// Stop, then start again
    Restart,
    /// Report whether the daemon is running
    Status,
    /// Evaluate one name against the running daemon and print the decision
    Query {
        /// Name to evaluate
        name: String,
        /// Query type number used to render the sinkhole record
        #[arg(long, default_value = "1")]
        qtype: u16,
    },
}

#[derive(Args)]
struct Options {
    /// Unix socket the daemon listens on
    #[arg(long, global = true, env = "DNS_FILTER_SOCKET", default_value = config::DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Directory holding blocklist and allowlist files
    #[arg(long, global = true, env = "DNS_FILTER_DIR", default_value = config::DEFAULT_FILTERS_DIR)]
    filters_dir: PathBuf,

    /// File name suffix of blocklist files
    #[arg(long, global = true, default_value = config::DEFAULT_BLOCK_SUFFIX)]
    suffix: String,

    /// File name suffix of allowlist files
    #[arg(long, global = true, default_value = config::DEFAULT_ALLOW_SUFFIX)]
    allow_suffix: String,

    /// PID file used by start, stop and status
    #[arg(long, global = true, env = "DNS_FILTER_PID_FILE", default_value = config::DEFAULT_PID_FILE)]
    pid_file: PathBuf,

    /// Append daemon output to this file after `start`
    #[arg(long, global = true, env = "DNS_FILTER_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// User that owns the socket (the resolver's account)
    #[arg(long, global = true, env = "DNS_FILTER_OWNER")]
    owner: Option<String>,

    /// Group that owns the socket
    #[arg(long, global = true, env = "DNS_FILTER_GROUP")]
    group: Option<String>,

    /// Socket permission bits, octal
    #[arg(long, global = true, default_value = "660", value_parser = parse_mode)]
    mode: u32,

    /// Address returned for blocked names
    #[arg(long, global = true, env = "DNS_FILTER_SINKHOLE", default_value = "0.0.0.0")]
    sinkhole: IpAddr,

    /// Client round-trip timeout in milliseconds
    #[arg(long, global = true, default_value = "50", value_parser = clap::value_parser!(u64).range(1..))]
    timeout_ms: u64,

    /// Seconds `stop` waits for the daemon to exit
    #[arg(long, global = true, default_value = "10")]
    stop_wait: u64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_mode(raw: &str) -> std::result::Result<u32, String> {
    config::parse_mode(raw).map_err(|e| e.to_string())
}

impl Options {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            socket_path: self.socket.clone(),
            filters_dir: self.filters_dir.clone(),
            block_suffix: self.suffix.clone(),
            allow_suffix: self.allow_suffix.clone(),
            socket_mode: self.mode,
            owner: self.owner.clone(),
            group: self.group.clone(),
            ..ServerConfig::default()
        }
    }

    fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            socket_path: self.socket.clone(),
            sinkhole: self.sinkhole,
            timeout: Duration::from_millis(self.timeout_ms),
            probe_attempts: 1,
            reprobe_interval: None,
            ..EvaluatorConfig::default()
        }
    }
}

/// Build a runtime and serve until signalled, keeping the PID file current.
fn serve(opts: &Options, server: FilterServer, write_pid: bool) -> Result<()> {
    if write_pid {
        control::write_pid(&opts.pid_file)?;
    }

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .and_then(|rt| rt.block_on(server.serve(monitor::shutdown_signal())))
        .map_err(Error::from);

    if let Err(e) = control::remove_pid(&opts.pid_file) {
        error!("{}", e);
    }
    result
}

fn run(opts: &Options) -> Result<()> {
    let server = FilterServer::bind(&opts.server_config())?;
    serve(opts, server, true)
}

/// Everything that can fail at startup happens before detaching, so the
/// operator sees the error and a non-zero exit.
fn start(opts: &Options) -> Result<()> {
    control::ensure_not_running(&opts.pid_file)?;
    let server = FilterServer::bind(&opts.server_config())?;

    if let Err(e) = control::daemonize(&opts.pid_file, opts.log_file.as_deref()) {
        let _ = server::remove_socket(server.socket_path());
        return Err(e.into());
    }
    // The PID file now belongs to the daemonized child.
    serve(opts, server, false)
}

fn stop(opts: &Options) -> Result<()> {
    let wait = Duration::from_secs(opts.stop_wait);
    if !control::stop(&opts.pid_file, &opts.socket, wait)? {
        println!("dns-filter is not running.");
    }
    Ok(())
}

fn status(pid_file: &Path) -> Result<()> {
    match control::status(pid_file)? {
        Status::Running(pid) => println!("dns-filter is running with pid {}", pid),
        Status::NotRunning => println!("dns-filter is not running."),
    }
    Ok(())
}

fn query(opts: &Options, name: &str, qtype: u16) -> Result<()> {
    let evaluator = PolicyEvaluator::new(opts.evaluator_config());
    let decision = evaluator.evaluate(name);

    println!("{} {}", name, decision);
    if let Decision::Intercept(addr) = decision {
        if let Some(record) = sinkhole_record(name, qtype, addr) {
            println!("{}", record);
        }
    }
    Ok(())
}

/// Detaching commands may keep logging into `--log-file`.
fn log_color(command: &Command) -> bool {
    !matches!(command, Command::Start | Command::Restart)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.opts.verbose, log_color(&cli.command));
    let opts = &cli.opts;

    let result = match cli.command {
        Command::Run => run(opts),
        Command::Start => start(opts),
        Command::Stop => stop(opts),
        Command::Restart => stop(opts).and_then(|()| start(opts)),
        Command::Status => status(&opts.pid_file),
        Command::Query { ref name, qtype } => query(opts, name, qtype),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dns-filter: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detaching_commands_log_without_color() {
        assert!(!log_color(&Command::Start));
        assert!(!log_color(&Command::Restart));
        assert!(log_color(&Command::Run));
        assert!(log_color(&Command::Status));
    }
}

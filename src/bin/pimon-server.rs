use clap::Parser;
use pimon::config::ConfigFile;
use pimon::formatter::time_of_day;
use pimon::{
    ConfigError, FullPolicy, PimonError, Registry, Server, ServerConfig, StatusEvent, logging,
};
use spdlog::{error, info, warn};
use std::collections::VecDeque;
use std::io::{BufRead, IsTerminal, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;
use std::time::Duration;

const MAX_ALERTS: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "pimon-server", version, about = "Console monitor for PiMon telemetry")]
struct Args {
    /// Address to bind the UDP listener on
    #[arg(long, env = "PIMON_BIND")]
    bind: Option<IpAddr>,

    /// UDP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Samples kept per client for the rolling averages
    #[arg(long)]
    window: Option<usize>,

    /// Maximum number of tracked clients
    #[arg(long)]
    max_clients: Option<usize>,

    /// Seconds without a sample before a client is offline
    #[arg(long)]
    offline_secs: Option<u64>,

    /// What to do with a new client when the table is full
    #[arg(long, value_enum)]
    full_policy: Option<FullPolicy>,

    /// Seconds between staleness passes
    #[arg(long)]
    evaluate_secs: Option<u64>,

    /// Seconds between forced redraws
    #[arg(long)]
    refresh_secs: Option<u64>,

    /// Pin worker threads to CPU cores
    #[arg(long)]
    pin_cores: bool,

    /// Record and log ingest latency
    #[arg(long)]
    latency_stats: bool,

    /// JSON config file; command line flags take precedence
    #[arg(short, long, env = "PIMON_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = ServerConfig::default();
        if let Some(path) = &self.config {
            config.apply_file(&ConfigFile::load(path)?);
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(window) = self.window {
            config.registry.window_capacity = window;
        }
        if let Some(max) = self.max_clients {
            config.registry.max_clients = max;
        }
        if let Some(secs) = self.offline_secs {
            config.registry.offline_threshold_secs = secs;
        }
        if let Some(policy) = self.full_policy {
            config.registry.full_policy = policy;
        }
        if let Some(secs) = self.evaluate_secs {
            config.evaluate_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.refresh_secs {
            config.refresh_interval = Duration::from_secs(secs);
        }
        config.pin_cores |= self.pin_cores;
        config.latency_stats |= self.latency_stats;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    ClearAll,
    ClearOffline,
    Copy(Option<PathBuf>),
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let command = match parts.next()? {
        "clear" => Command::ClearAll,
        "clear-offline" => Command::ClearOffline,
        "copy" => Command::Copy(parts.next().map(PathBuf::from)),
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

fn spawn_stdin_reader(commands: Sender<Command>, wake: Arc<pimon::Notifier>) {
    let spawned = thread::Builder::new()
        .name("pimon-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Some(command) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                        wake.notify();
                    }
                    None if line.trim().is_empty() => {}
                    None => eprintln!("unknown command: {} (try 'help')", line.trim()),
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Console input disabled: {}", e);
    }
}

struct Console {
    registry: Arc<Registry>,
    events: Receiver<StatusEvent>,
    alerts: VecDeque<String>,
    show_help: bool,
    clear_screen: bool,
}

impl Console {
    fn drain_events(&mut self) {
        for event in self.events.try_iter() {
            if !event.offline {
                continue;
            }
            let ip = event
                .address
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| "0.0.0.0".into());
            self.alerts.push_back(format!(
                "{} {} ({}) has gone offline.",
                time_of_day(self.registry.now()),
                event.client_id,
                ip
            ));
            while self.alerts.len() > MAX_ALERTS {
                self.alerts.pop_front();
            }
        }
    }

    fn export(&self, path: Option<PathBuf>) {
        let text = self.registry.export_text();
        match path {
            Some(path) => match std::fs::write(&path, text) {
                Ok(()) => info!("Exported snapshot to {}", path.display()),
                Err(e) => error!("Cannot write {}: {}", path.display(), e),
            },
            None => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            }
        }
    }

    fn redraw(&self) {
        let snapshot = self.registry.snapshot();
        let mut out = std::io::stdout().lock();
        if self.clear_screen {
            let _ = write!(out, "\x1b[2J\x1b[H");
        }
        let _ = out.write_all(snapshot.render().as_bytes());

        let offline = self.registry.offline_count();
        if offline > 0 {
            let _ = writeln!(out, "\nAction needed: {} client(s) offline", offline);
        }
        for alert in &self.alerts {
            let _ = writeln!(out, "{}", alert);
        }
        if self.show_help {
            let _ = writeln!(
                out,
                "\ncommands: clear | clear-offline | copy [path] | help | quit"
            );
        }
        let _ = out.flush();
    }
}

fn run(args: Args) -> Result<(), PimonError> {
    let config = args.server_config()?;
    let server = Server::start(&config)?;
    let registry = server.registry();
    let notifier = server.notifier();

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        let notifier = notifier.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            quit.store(true, Ordering::SeqCst);
            notifier.notify();
        }) {
            warn!("Cannot install Ctrl-C handler: {}", e);
        }
    }

    let (commands_tx, commands) = channel();
    spawn_stdin_reader(commands_tx, notifier.clone());

    let mut console = Console {
        events: registry.subscribe(),
        registry,
        alerts: VecDeque::new(),
        show_help: true,
        clear_screen: std::io::stdout().is_terminal(),
    };

    console.redraw();
    while !quit.load(Ordering::SeqCst) {
        notifier.wait_timeout(config.refresh_interval);

        for command in commands.try_iter() {
            match command {
                Command::ClearAll => {
                    console.registry.clear_all();
                    console.alerts.clear();
                }
                Command::ClearOffline => {
                    console.registry.clear_offline();
                }
                Command::Copy(path) => console.export(path),
                Command::Help => console.show_help = !console.show_help,
                Command::Quit => quit.store(true, Ordering::SeqCst),
            }
        }
        console.drain_events();

        if server.is_any_worker_finished() {
            error!("A worker stopped unexpectedly, shutting down");
            break;
        }
        if !quit.load(Ordering::SeqCst) {
            console.redraw();
        }
    }

    info!("Shutting down");
    server.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("pimon-server: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("clear"), Some(Command::ClearAll));
        assert_eq!(parse_command(" clear-offline "), Some(Command::ClearOffline));
        assert_eq!(parse_command("copy"), Some(Command::Copy(None)));
        assert_eq!(
            parse_command("copy /tmp/out.txt"),
            Some(Command::Copy(Some(PathBuf::from("/tmp/out.txt"))))
        );
        assert_eq!(parse_command("q"), Some(Command::Quit));
        assert_eq!(parse_command("reboot"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from(["pimon-server", "--port", "6001", "--window", "5"]);
        let config = args.server_config().unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.registry.window_capacity, 5);
        assert_eq!(config.registry.max_clients, 32);
    }

    #[test]
    fn test_invalid_flags_rejected() {
        let args = Args::parse_from(["pimon-server", "--max-clients", "0"]);
        assert!(args.server_config().is_err());
    }
}

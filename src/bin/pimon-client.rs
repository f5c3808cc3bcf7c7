use clap::Parser;
use pimon::config::DEFAULT_PORT;
use pimon::sampler::{Sampler, hostname};
use pimon::{Clock, ClientId, StopSignal, SystemClock, logging};
use spdlog::{debug, error, info, warn};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "pimon-client", version, about = "Sends this board's health telemetry to a PiMon server")]
struct Args {
    /// Server host name or IP address
    #[arg(env = "PIMON_SERVER_IP")]
    server: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds between samples
    #[arg(long, default_value_t = 1)]
    interval_secs: u64,

    /// Client id to report instead of the hostname
    #[arg(long)]
    id: Option<String>,

    /// Filesystem root the /proc and /sys counters are read from
    #[arg(long, default_value = "/")]
    root: PathBuf,

    #[arg(short, long)]
    verbose: bool,
}

fn resolve(server: &str, port: u16) -> Option<SocketAddr> {
    let addrs: Vec<SocketAddr> = (server, port).to_socket_addrs().ok()?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    let Some(server) = resolve(&args.server, args.port) else {
        error!("Unable to resolve server: {}", args.server);
        return ExitCode::FAILURE;
    };
    info!("Server resolved to {}", server);

    let bind: SocketAddr = if server.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = match UdpSocket::bind(bind) {
        Ok(socket) => socket,
        Err(e) => {
            error!("Cannot open UDP socket: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let name = args
        .id
        .clone()
        .or_else(|| hostname(&args.root))
        .unwrap_or_else(|| "unknown".to_string());
    let client_id = ClientId::new(&name);
    let mut sampler = Sampler::with_root(&args.root, client_id);
    info!("Reporting as {} (fan: {:?})", client_id, sampler.fan_source());

    let stop = Arc::new(StopSignal::new());
    {
        let stop = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || stop.stop()) {
            warn!("Cannot install Ctrl-C handler: {}", e);
        }
    }

    let clock = SystemClock;
    let interval = Duration::from_secs(args.interval_secs.max(1));
    loop {
        let record = sampler.sample(clock.now_secs());
        debug!(
            "load={:.1}% temp={:.1}C mhz={:.1} fan={:.1}",
            record.cpu_load, record.cpu_temp, record.cpu_mhz, record.fan_speed
        );
        if let Err(e) = socket.send_to(&record.encode(), server) {
            warn!("Send to {} failed: {}", server, e);
        }
        if stop.wait(interval) {
            break;
        }
    }
    info!("Stopped");
    ExitCode::SUCCESS
}

use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::listener::{Listener, ListenerCloser};
use crate::notify::{Notifier, StopSignal};
use crate::registry::Registry;
use crate::stats::{ListenerCounts, ListenerStats};
use spdlog::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long shutdown waits for a worker before leaving it detached.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns the registry and the two background workers for the lifetime of the process.
///
/// Dropping the server closes the socket, stops the evaluator and joins both threads.
pub struct Server {
    registry: Arc<Registry>,
    local_addr: SocketAddr,
    closer: ListenerCloser,
    stop: Arc<StopSignal>,
    listener_stats: Arc<ListenerStats>,
    worker_handlers: Vec<thread::JoinHandle<()>>,
    pin_cores: bool,
}

impl Server {
    pub fn start(config: &ServerConfig) -> Result<Self> {
        Self::start_with_clock(config, Arc::new(SystemClock))
    }

    pub fn start_with_clock(config: &ServerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::with_clock(config.registry, clock));

        let mut listener = Listener::bind(config.listen_addr(), registry.clone())?;
        listener.enable_latency_stats(config.latency_stats, 10_000);
        let local_addr = listener.local_addr()?;
        let closer = listener.closer()?;
        let listener_stats = listener.stats();

        let evaluator = Evaluator::new(registry.clone(), config.evaluate_interval);
        let stop = evaluator.stop_signal();

        let mut server = Self {
            registry,
            local_addr,
            closer,
            stop,
            listener_stats,
            worker_handlers: vec![],
            pin_cores: config.pin_cores,
        };
        server.run_worker("pimon-listener", move || listener.run())?;
        server.run_worker("pimon-evaluator", move || evaluator.run())?;

        info!(
            "Server started on {} (window={}, max_clients={}, offline_after={}s)",
            local_addr,
            config.registry.window_capacity,
            config.registry.max_clients,
            config.registry.offline_threshold_secs
        );
        Ok(server)
    }

    fn run_worker(&mut self, name: &str, runnable: impl FnOnce() + Send + 'static) -> Result<()> {
        let worker_id = self.worker_handlers.len();
        let pin_cores = self.pin_cores;
        let handler = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if pin_cores
                    && let Some(core_ids) = core_affinity::get_core_ids()
                    && let Some(core_id) = core_ids.get(worker_id % core_ids.len().max(1))
                {
                    core_affinity::set_for_current(*core_id);
                }
                runnable();
            })?;
        self.worker_handlers.push(handler);
        Ok(())
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn notifier(&self) -> Arc<Notifier> {
        self.registry.notifier()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn listener_counts(&self) -> ListenerCounts {
        self.listener_stats.counts()
    }

    /// A worker that returned while the server is still up has died.
    pub fn is_any_worker_finished(&self) -> bool {
        !self.closer.is_closed() && self.worker_handlers.iter().any(|h| h.is_finished())
    }

    pub fn shutdown(mut self) {
        self.stop_workers();
    }

    fn stop_workers(&mut self) {
        if !self.closer.close() {
            warn!("Listener may not see the close request");
        }
        self.stop.stop();
        for handler in self.worker_handlers.drain(..) {
            join_within(handler, JOIN_TIMEOUT);
        }
    }
}

/// Joins `handler` if it finishes within `timeout`, otherwise leaves it detached.
fn join_within(handler: thread::JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handler.is_finished() {
        if Instant::now() >= deadline {
            error!(
                "Worker {} did not stop within {:?}, detaching it",
                handler.thread().name().unwrap_or("?"),
                timeout
            );
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handler.join().is_err() {
        error!("Worker thread panicked");
    }
    true
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

use crate::notify::StopSignal;
use crate::registry::{EvaluationSummary, Registry};
use spdlog::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Periodically re-derives every client's online flag from the age of its latest record.
///
/// This is the only writer of the flag; ingestion never touches it.
pub struct Evaluator {
    registry: Arc<Registry>,
    interval: Duration,
    stop: Arc<StopSignal>,
    offline: usize,
}

impl Evaluator {
    pub fn new(registry: Arc<Registry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            stop: Arc::new(StopSignal::new()),
            offline: 0,
        }
    }

    pub fn stop_signal(&self) -> Arc<StopSignal> {
        self.stop.clone()
    }

    pub fn run_pass(&mut self) -> EvaluationSummary {
        let summary = self.registry.evaluate(self.registry.now());

        for event in &summary.transitions {
            let address = event
                .address
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| "0.0.0.0".into());
            if event.offline {
                warn!("{} ({}) has gone offline.", event.client_id, address);
            } else {
                info!("{} ({}) is back online.", event.client_id, address);
            }
        }

        match (self.offline > 0, summary.offline > 0) {
            (false, true) => warn!("Action needed: {} client(s) offline", summary.offline),
            (true, false) => info!("All clients online"),
            _ => {}
        }
        self.offline = summary.offline;
        summary
    }

    /// Runs a pass, then sleeps for the interval; a stop request ends the sleep early.
    pub fn run(mut self) {
        loop {
            self.run_pass();
            if self.stop.wait(self.interval) {
                break;
            }
        }
        info!("[Evaluator] Stopped");
    }
}

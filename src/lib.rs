pub mod clock;
pub mod config;
pub mod error;
mod evaluator;
pub mod formatter;
mod listener;
pub mod logging;
pub mod notify;
pub mod record;
mod registry;
pub mod sampler;
mod server;
pub mod stats;
mod window;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{FullPolicy, RegistryConfig, ServerConfig};
pub use crate::error::{ConfigError, PimonError, RegistryFull};
pub use crate::evaluator::Evaluator;
pub use crate::formatter::{Snapshot, SnapshotRow};
pub use crate::listener::{Listener, ListenerCloser, RecvOutcome};
pub use crate::notify::{Notifier, StopSignal};
pub use crate::record::{CLIENT_ID_LEN, ClientId, TelemetryRecord, WIRE_RECORD_SIZE, WireRecord};
pub use crate::registry::{
    EntryHandle, EntryView, EvaluationSummary, IngestOutcome, Registry, StatusEvent,
};
pub use crate::server::Server;
pub use crate::window::{Aggregate, SampleWindow};

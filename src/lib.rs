pub mod clock;
pub mod config;
pub mod export;
pub mod http;
pub mod metrics;
pub mod observability;
pub mod settings;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock, UnixTimestamp};
pub use config::{ConfigCache, ConfigError};
pub use export::{render, spawn_poll_loop, ExportRecord, PushExporter, TrapperSender};
pub use metrics::{aggregate, sanitize, HistogramPoint, RawSample, RawValue, ServiceAggregate};
pub use settings::ServerSettings;
pub use store::{MemoryStore, TopologyError, TopologyProvider};

//! Metrics Export
//!
//! Two outputs over the same aggregation:
//!
//! - [`exposition`]: Prometheus text format, rendered on demand for `/metrics`
//! - [`trapper`] + [`poll`]: periodic push to a Zabbix trapper

pub mod exposition;
pub mod poll;
pub mod trapper;

pub use exposition::{render, write_service, CONTENT_TYPE, METRIC_NAMESPACE};
pub use poll::{
    collect_records, spawn_poll_loop, CycleOutcome, PollLoopHandle, PushExporter,
    DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL, TRAPPER_HOST,
};
pub use trapper::{
    decode_packet, decode_response, encode_packet, ExportRecord, SenderPacket, SenderResponse,
    TrapperError, TrapperSender,
};

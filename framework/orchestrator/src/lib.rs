mod broadcast;
mod config;
mod detector;
mod persist;
mod report;
mod state;
mod supervisor;

pub mod prelude {
    pub use crate::broadcast::{BridgeError, Event, EventBridge, EventBus};
    pub use crate::config::ScanConfig;
    pub use crate::detector::TransitionDetector;
    pub use crate::persist::{JsonLinesStore, ScanRecord, ScanStore};
    pub use crate::report::{
        parse_stats, AggregateRecord, EndpointRecord, HistoryPoint, StatsReport,
    };
    pub use crate::state::{ScanContext, ScanStatus};
    pub use crate::supervisor::{engine_path, ProcessSlot, Scanner, ENGINE_PATH_ENV};
}

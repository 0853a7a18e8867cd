pub mod aggregator;
pub mod config;
pub mod data_structures;
pub mod entitlements;
pub mod error;
pub mod gate;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod transform;
pub mod trial;

pub use aggregator::{FileSink, LogSink, ReportSink, UsageAggregator, UsageReport, UsageStats};
pub use config::Config;
pub use data_structures::{
    Artifact, ArtifactContent, Entitlement, Event, Feature, FileContent, FileKind, FileUpload,
    Mode, Outcome, Plan, Response, Row, SplitPolicy, UserId,
};
pub use entitlements::EntitlementStore;
pub use error::FileBotError;
pub use gate::{AccessDecision, AccessGate, AccessGrant, SubscriptionStatus};
pub use scheduler::{ReportSchedule, ReportScheduler, SchedulerPhase};
pub use service::FileBotService;
pub use session::{Session, SessionTable};
pub use trial::TrialCounter;

pub use chrono::{DateTime, Duration, Utc};

pub mod prelude {
    pub use crate::data_structures::{Event, FileUpload, Mode, Outcome, Plan, Response, SplitPolicy, UserId};
    pub use crate::service::FileBotService;
    pub use crate::config::Config;
    pub use anyhow::Result;
    pub use chrono::{DateTime, Utc};
}

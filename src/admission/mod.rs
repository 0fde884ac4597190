//! Admission control: sliding windows, limit evaluation, penalties and
//! retry scheduling.

mod clock;
mod evaluator;
mod gate;
mod key;
mod maintenance;
mod penalty;
mod profile;
mod retry;
mod stats;
mod store;
mod verdict;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use evaluator::{LimitEvaluator, SUSPICIOUS_ACTIVITY};
pub use gate::AdmissionGate;
pub use key::WindowKey;
pub use maintenance::{MaintenanceHandle, SweepReport};
pub use penalty::{PenaltyManager, Violation};
pub use profile::{
    AbuseConfig, GlobalLimits, LimitProfile, LimitsConfig, RoleLimits, WindowLimit, HOUR_MS,
    MINUTE_MS,
};
pub use retry::{BatchItem, BatchOptions, BatchReport, QueuedRequest, RetryScheduler};
pub use stats::{IdentifierVolume, Statistics, TOP_IDENTIFIERS};
pub use store::{BanRecord, BanStore, FileBanStore, MemoryBanStore};
pub use verdict::{BanCause, DenyReason, Role, Severity, Verdict};
pub use window::WindowCounter;

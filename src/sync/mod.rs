//! Sync pipeline: the single-flight engine and the scheduler that drives it.
//!
//! ```text
//! SchedulerHandle ──(Scheduled)──┐
//!                                ├──> SyncEngine ──> RemoteFetcher
//! ViewModel ───────(Forced)──────┘        │
//!                                         └──> CacheStore ──> snapshot observers
//! ```

mod engine;
mod environment;
mod policy;
mod scheduler;
mod work_store;

pub use engine::{SyncEngine, SyncMode, SyncOutcome, SyncReport, SyncResult};
pub use environment::{check_constraints, ConstraintCheck, Constraints, Environment, HostEnvironment};
pub use policy::RefreshPolicy;
pub use scheduler::{plan_next, SchedulerHandle, SchedulerSignal};
pub use work_store::{MemoryWorkStore, SqliteWorkStore, WorkRecord, WorkStore};

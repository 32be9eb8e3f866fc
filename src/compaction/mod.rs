//! Compaction Module
//!
//! Background merging of sorted runs for primary-key tables that produce a
//! changelog by lookup or by full compaction.
//!
//! ## Responsibilities
//! - Keep the per-bucket level view ([`Levels`])
//! - Pick tasks per barrier under the radical / gentle / full policies
//! - Merge runs on worker threads, deriving before/after images
//! - Hand results back for inclusion in a commit

mod levels;
mod lookup;
mod planner;
mod scheduler;
mod task;

pub use levels::Levels;
pub use lookup::{LookupLevels, LookupSource};
pub use planner::{BucketView, CompactionPlanner};
pub use scheduler::{ChangelogCompactionScheduler, SchedulerState};
pub use task::{CompactionResult, CompactionTask};

pub mod adaptive;
pub mod catch_up;
pub mod plan;
pub mod recurrence;
pub mod timer;

pub use adaptive::{AdaptiveAdjustment, AdaptivePolicy, AdaptiveTimeManager};
pub use catch_up::{block_id, CatchUpBlock, CatchUpChange, CatchUpConsolidator};
pub use plan::{sort_plan, DailyPlanBuilder, PlanBuild, SegmentBounds};
pub use recurrence::{localize, Occurrence, Recurrence, RecurrenceResolver, RecurrenceWarning};
pub use timer::{ActiveTimer, TimerEngine, TimerOutcome, TimerState};

pub mod backlog;
pub mod day_state;
pub mod files;
pub mod streak;

pub use backlog::{
    reason_for, AgeBuckets, BacklogEntry, BacklogStats, BacklogStore, Redemption, REASON_MISSED,
    REASON_SKIPPED,
};
pub use day_state::{load_day_state, save_day_state, DayState};
pub use files::{
    atomic_write, backlog_file, config_file, day_file, ensure_data_dir, get_data_dir, load_json,
    quarantine, read_file, save_json, streaks_file,
};
pub use streak::{
    badge_id, Badge, BadgeKind, DayTally, StreakPolicy, StreakRecord, StreakSummary, StreakTracker,
    StreakUpdate,
};

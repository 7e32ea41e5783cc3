pub mod generator;
pub mod stats;

pub use generator::{format_duration, format_percent, generate_report, render_report, ReportData};
pub use stats::{calculate_day_stats, DayStats, SegmentStats};

use crate::domain::{status_badge, TaskInstance};
use crate::engine::Engine;
use crate::error::PersistenceError;
use crate::persistence::{atomic_write, BacklogEntry, BacklogStats, StreakSummary};
use crate::report::stats::calculate_day_stats;
use crate::schedule::AdaptiveAdjustment;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::path::{Path, PathBuf};

/// Everything that goes into a day report
#[derive(Debug, Clone)]
pub struct ReportData {
    pub date: NaiveDate,
    pub instances: Vec<TaskInstance>,
    pub adjustments: Vec<AdaptiveAdjustment>,
    pub backlog: Vec<BacklogEntry>,
    pub backlog_stats: BacklogStats,
    pub streak: StreakSummary,
    /// Backlog redemptions credited to `date`
    pub redemptions: usize,
}

impl ReportData {
    /// Gather report inputs from a running engine
    pub fn collect(engine: &mut Engine, now: DateTime<Utc>) -> Self {
        // Oldest first
        let mut adjustments = engine.recent_adjustments(usize::MAX);
        adjustments.reverse();
        Self {
            date: engine.date(),
            instances: engine.plan().to_vec(),
            adjustments,
            backlog: engine.backlog(now),
            backlog_stats: engine.backlog_stats(now),
            streak: engine.streak_summary(),
            redemptions: engine.redemptions_today().len(),
        }
    }
}

/// Format duration as "Xh Ym" or "Xm" for display
pub fn format_duration(duration: Duration) -> String {
    let total_mins = duration.num_minutes();
    if total_mins < 60 {
        format!("{}m", total_mins)
    } else {
        let hours = total_mins / 60;
        let mins = total_mins % 60;
        if mins == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}

/// Format percentage with 1 decimal place
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Render the markdown day report
pub fn render_report(data: &ReportData) -> String {
    let stats = calculate_day_stats(&data.instances, &data.adjustments, data.redemptions);
    let mut report = String::new();

    // Header
    report.push_str(&format!("# Daily Report - {}\n\n", data.date));

    // Summary Section
    report.push_str("## Summary\n\n");
    report.push_str(&format!(
        "- **Tasks:** {} (Completed: {}, Redeemed: {}, Skipped: {}, Missed: {}, Open: {})\n",
        stats.total,
        stats.completed,
        stats.redeemed,
        stats.skipped,
        stats.expired,
        stats.pending + stats.active
    ));
    report.push_str(&format!(
        "- **Completion:** {} ({} redeemed from backlog)\n",
        format_percent(stats.completion_percent()),
        stats.credited
    ));
    report.push_str(&format!(
        "- **Planned Time:** {}\n",
        format_duration(stats.planned)
    ));
    report.push_str(&format!(
        "- **Time Redistributed:** {}\n\n",
        format_duration(stats.adjusted)
    ));

    // Segments Section
    if !stats.by_segment.is_empty() {
        report.push_str("## Segments\n\n");
        for (segment, seg) in &stats.by_segment {
            report.push_str(&format!(
                "- **{}:** {}/{} completed, {} open\n",
                segment, seg.completed, seg.total, seg.open
            ));
        }
        report.push('\n');
    }

    // Streak Section
    report.push_str("## Streak\n\n");
    report.push_str(&format!(
        "- **Current Streak:** {} days\n",
        data.streak.current_streak
    ));
    report.push_str(&format!(
        "- **Longest Streak:** {} days\n",
        data.streak.longest_streak
    ));
    if let Some(last) = &data.streak.last_record {
        report.push_str(&format!(
            "- **Last Recorded Day:** {} ({} completed)\n",
            last.date,
            format_percent(last.completion_ratio * 100.0)
        ));
    }
    if !data.streak.badges.is_empty() {
        let ids: Vec<&str> = data.streak.badges.iter().map(|b| b.id.as_str()).collect();
        report.push_str(&format!("- **Badges:** {}\n", ids.join(", ")));
    }
    report.push('\n');

    // Backlog Section
    report.push_str("## Backlog\n\n");
    report.push_str(&format!(
        "- **Entries:** {} (Open: {}, Redeemed: {})\n",
        data.backlog_stats.total, data.backlog_stats.open, data.backlog_stats.redeemed
    ));
    report.push_str(&format!(
        "- **Redemption Rate:** {}\n",
        format_percent(data.backlog_stats.redemption_rate)
    ));
    let ages = &data.backlog_stats.by_age;
    report.push_str(&format!(
        "- **Open by Age:** {} recent, {} this week, {} this month, {} older\n\n",
        ages.recent, ages.week_old, ages.month_old, ages.older
    ));

    for entry in data.backlog.iter().filter(|e| !e.redeemed) {
        report.push_str(&format!(
            "- p{} **{}** ({}, {})\n",
            entry.priority.level(),
            entry.title,
            entry.reason,
            entry.original_date
        ));
    }
    if data.backlog.iter().any(|e| !e.redeemed) {
        report.push('\n');
    }

    // Adjustments Section
    if !data.adjustments.is_empty() {
        report.push_str("## Adjustments\n\n");
        for adjustment in &data.adjustments {
            report.push_str(&format!(
                "- **{}:** {} -> {} ({})\n",
                adjustment.title,
                format_duration(Duration::seconds(adjustment.original_secs)),
                format_duration(Duration::seconds(adjustment.new_secs)),
                adjustment.reason
            ));
        }
        report.push('\n');
    }

    // Tasks Breakdown Section
    if !data.instances.is_empty() {
        report.push_str("## Tasks\n\n");
        for instance in &data.instances {
            report.push_str(&format!(
                "- {} {} **{}** ({})\n",
                status_badge(instance.status),
                instance.local_time.format("%H:%M"),
                instance.title,
                format_duration(instance.nominal())
            ));
        }
    }

    report
}

/// Write the report for the engine's current day; returns the file written
pub fn generate_report(
    engine: &mut Engine,
    now: DateTime<Utc>,
    data_dir: &Path,
    output_path: Option<PathBuf>,
) -> Result<PathBuf, PersistenceError> {
    let data = ReportData::collect(engine, now);
    let output =
        output_path.unwrap_or_else(|| data_dir.join(format!("report-{}.md", data.date)));
    atomic_write(&output, &render_report(&data))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LoadedConfig};
    use crate::domain::{Priority, TaskTemplate};
    use chrono::{NaiveTime, TimeZone};
    use tempfile::tempdir;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::minutes(45)), "45m");
        assert_eq!(format_duration(Duration::minutes(60)), "1h");
        assert_eq!(format_duration(Duration::minutes(90)), "1h 30m");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(66.666), "66.7%");
    }

    fn engine(now: DateTime<Utc>) -> Engine {
        let templates = vec![
            TaskTemplate::new("Take Supplements", NaiveTime::from_hms_opt(7, 0, 0).unwrap())
                .with_priority(Priority::High)
                .with_duration(10),
            TaskTemplate::new("Water plants", NaiveTime::from_hms_opt(9, 0, 0).unwrap())
                .with_duration(60),
        ];
        let loaded = LoadedConfig {
            config: Config {
                templates,
                ..Config::default()
            },
            warnings: Vec::new(),
        };
        Engine::in_memory(loaded, now)
    }

    #[test]
    fn test_report_after_missed_task() {
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 6, 0, 0).unwrap();
        let mut engine = engine(start);
        engine.tick(Utc.with_ymd_and_hms(2026, 5, 4, 7, 0, 0).unwrap());
        engine.tick(Utc.with_ymd_and_hms(2026, 5, 4, 7, 10, 1).unwrap());

        let now = Utc.with_ymd_and_hms(2026, 5, 4, 7, 30, 0).unwrap();
        let report = render_report(&ReportData::collect(&mut engine, now));

        assert!(report.starts_with("# Daily Report - 2026-05-04"));
        assert!(report.contains("Missed: 1"));
        assert!(report.contains("## Adjustments"));
        assert!(report.contains("Missed task: Take Supplements"));
        assert!(report.contains("[!] 07:00 **Take Supplements** (10m)"));
    }

    #[test]
    fn test_report_credits_redemption_from_yesterday() {
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 6, 0, 0).unwrap();
        let mut engine = engine(start);
        engine.skip("water_plants_0900@2026-05-04", start).unwrap();

        let next_morning = Utc.with_ymd_and_hms(2026, 5, 5, 6, 0, 0).unwrap();
        engine.tick(next_morning);
        engine.redeem("water_plants_0900@2026-05-04", next_morning).unwrap();

        let data = ReportData::collect(&mut engine, next_morning);
        assert_eq!(data.redemptions, 1);
        let report = render_report(&data);
        assert!(report.contains("- **Completion:** 50.0% (1 redeemed from backlog)"));
    }

    #[test]
    fn test_generate_report_writes_file() {
        let temp_dir = tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 6, 0, 0).unwrap();
        let mut engine = engine(now);

        let path = generate_report(&mut engine, now, temp_dir.path(), None).unwrap();
        assert_eq!(path, temp_dir.path().join("report-2026-05-04.md"));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("## Streak"));
    }
}

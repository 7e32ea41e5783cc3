use crate::domain::{InstanceStatus, Segment, TaskInstance};
use crate::schedule::AdaptiveAdjustment;
use chrono::Duration;
use std::collections::BTreeMap;

/// Status counts for one day's plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayStats {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub skipped: usize,
    pub expired: usize,
    pub redeemed: usize,
    /// Backlog redemptions credited to this day, whichever day they came from
    pub credited: usize,
    /// Sum of nominal durations
    pub planned: Duration,
    /// Time taken off later instances by adaptive adjustments
    pub adjusted: Duration,
    pub by_segment: BTreeMap<Segment, SegmentStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentStats {
    pub total: usize,
    pub completed: usize,
    /// Pending, Active or Expired
    pub open: usize,
}

impl DayStats {
    /// Completed plus credited redemptions over total, as a percentage.
    /// Same ratio the streak tracker records for the day.
    pub fn completion_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        ((self.completed + self.credited) as f64 / self.total as f64 * 100.0).min(100.0)
    }

    pub fn skip_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.skipped as f64 / self.total as f64 * 100.0
    }
}

/// Calculate statistics for a day's instances, the adjustments made to them
/// and the number of backlog redemptions credited to the day
pub fn calculate_day_stats(
    instances: &[TaskInstance],
    adjustments: &[AdaptiveAdjustment],
    credited: usize,
) -> DayStats {
    let mut stats = DayStats {
        credited,
        planned: Duration::zero(),
        adjusted: Duration::zero(),
        ..DayStats::default()
    };

    for instance in instances {
        stats.total += 1;
        stats.planned = stats.planned + instance.nominal();

        match instance.status {
            InstanceStatus::Pending => stats.pending += 1,
            InstanceStatus::Active => stats.active += 1,
            InstanceStatus::Completed => stats.completed += 1,
            InstanceStatus::Skipped => stats.skipped += 1,
            InstanceStatus::Expired => stats.expired += 1,
            InstanceStatus::Redeemed => stats.redeemed += 1,
        }

        let segment = stats.by_segment.entry(instance.segment).or_default();
        segment.total += 1;
        match instance.status {
            InstanceStatus::Completed => segment.completed += 1,
            InstanceStatus::Pending | InstanceStatus::Active | InstanceStatus::Expired => {
                segment.open += 1
            }
            InstanceStatus::Skipped | InstanceStatus::Redeemed => {}
        }
    }

    let adjusted_secs: i64 = adjustments.iter().map(|a| a.reduction_secs()).sum();
    stats.adjusted = Duration::seconds(adjusted_secs);

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskTemplate};
    use crate::schedule::Occurrence;
    use chrono::{NaiveTime, TimeZone, Utc};

    fn instance(title: &str, hour: u32, status: InstanceStatus, segment: Segment) -> TaskInstance {
        let at = Utc.with_ymd_and_hms(2026, 5, 4, hour, 0, 0).unwrap();
        let template = TaskTemplate::new(title, NaiveTime::from_hms_opt(hour, 0, 0).unwrap())
            .with_priority(Priority::Medium)
            .with_duration(20);
        let occurrence = Occurrence {
            date: at.date_naive(),
            local_time: template.time,
            at,
            dst_shifted: false,
        };
        let mut inst = TaskInstance::from_template(&template, &occurrence, segment, at);
        inst.status = status;
        inst
    }

    #[test]
    fn test_empty_day() {
        let stats = calculate_day_stats(&[], &[], 0);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.completion_percent(), 0.0);
        assert_eq!(stats.planned, Duration::zero());
    }

    #[test]
    fn test_counts_by_status_and_segment() {
        let instances = vec![
            instance("Stretch", 7, InstanceStatus::Completed, Segment::Morning),
            instance("Email", 9, InstanceStatus::Expired, Segment::Morning),
            instance("Walk", 13, InstanceStatus::Skipped, Segment::Afternoon),
            instance("Read", 21, InstanceStatus::Redeemed, Segment::Evening),
        ];
        let adjustment = AdaptiveAdjustment {
            instance_id: "walk_1300@2026-05-04".to_string(),
            title: "Walk".to_string(),
            original_secs: 1200,
            new_secs: 900,
            reason: "Missed task: Email".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 5, 4, 9, 20, 0).unwrap(),
        };

        // Read was redeemed today
        let stats = calculate_day_stats(&instances, &[adjustment], 1);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.planned, Duration::minutes(80));
        assert_eq!(stats.adjusted, Duration::minutes(5));
        assert_eq!(stats.completion_percent(), 50.0);
        assert_eq!(stats.skip_percent(), 25.0);

        let morning = stats.by_segment[&Segment::Morning];
        assert_eq!(morning.total, 2);
        assert_eq!(morning.completed, 1);
        assert_eq!(morning.open, 1);
        assert_eq!(stats.by_segment[&Segment::Evening].open, 0);
    }

    #[test]
    fn test_redemptions_from_earlier_days_count() {
        let instances = vec![
            instance("Stretch", 7, InstanceStatus::Completed, Segment::Morning),
            instance("Email", 9, InstanceStatus::Expired, Segment::Morning),
            instance("Walk", 13, InstanceStatus::Pending, Segment::Afternoon),
            instance("Read", 21, InstanceStatus::Pending, Segment::Evening),
        ];
        assert_eq!(calculate_day_stats(&instances, &[], 0).completion_percent(), 25.0);
        assert_eq!(calculate_day_stats(&instances, &[], 2).completion_percent(), 75.0);
        assert_eq!(calculate_day_stats(&instances, &[], 9).completion_percent(), 100.0);
    }
}

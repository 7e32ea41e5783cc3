//! Assembles a day's ordered list of task instances.
//!
//! Building is idempotent: instances are keyed by id, so rebuilding the same
//! date keeps status and remaining time and only refreshes what the templates
//! own. A template whose id changed (a derived id after a rename) takes over
//! the orphaned instance in its slot instead of starting a second one.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::debug;

use super::recurrence::{RecurrenceResolver, RecurrenceWarning};
use crate::domain::{instance_id, InstanceStatus, Segment, TaskInstance, TaskTemplate};

/// Local start times of the three day segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBounds {
    pub morning: NaiveTime,
    pub afternoon: NaiveTime,
    pub evening: NaiveTime,
}

impl Default for SegmentBounds {
    fn default() -> Self {
        Self {
            morning: hm(5, 0),
            afternoon: hm(12, 0),
            evening: hm(17, 0),
        }
    }
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

impl SegmentBounds {
    /// Segment of a local time; anything before the morning start is late evening
    pub fn segment_for(&self, time: NaiveTime) -> Segment {
        if time >= self.evening {
            Segment::Evening
        } else if time >= self.afternoon {
            Segment::Afternoon
        } else if time >= self.morning {
            Segment::Morning
        } else {
            Segment::Evening
        }
    }
}

/// Result of a build: the ordered plan plus what went wrong along the way
#[derive(Debug, Default)]
pub struct PlanBuild {
    pub instances: Vec<TaskInstance>,
    pub warnings: Vec<RecurrenceWarning>,
    /// Ids of Pending instances dropped because their template no longer occurs
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DailyPlanBuilder {
    resolver: RecurrenceResolver,
    bounds: SegmentBounds,
}

impl DailyPlanBuilder {
    pub fn new(resolver: RecurrenceResolver, bounds: SegmentBounds) -> Self {
        Self { resolver, bounds }
    }

    pub fn resolver(&self) -> &RecurrenceResolver {
        &self.resolver
    }

    pub fn bounds(&self) -> &SegmentBounds {
        &self.bounds
    }

    /// Build the plan for `date`, reusing matching instances from `existing`
    pub fn build(
        &self,
        templates: &[TaskTemplate],
        date: NaiveDate,
        existing: &[TaskInstance],
        now: DateTime<Utc>,
    ) -> PlanBuild {
        let mut previous: HashMap<&str, &TaskInstance> =
            existing.iter().map(|inst| (inst.id.as_str(), inst)).collect();
        let current: HashSet<&str> = templates.iter().map(|t| t.id.as_str()).collect();
        let mut seen = HashSet::new();
        let mut build = PlanBuild::default();

        for template in templates {
            if !seen.insert(template.id.as_str()) {
                debug!(template = %template.id, "duplicate template id ignored");
                continue;
            }

            let occurrence = match self.resolver.resolve(template, date) {
                Ok(Some(occurrence)) => occurrence,
                Ok(None) => continue,
                Err(warning) => {
                    build.warnings.push(warning);
                    continue;
                }
            };
            let segment = self.bounds.segment_for(occurrence.local_time);
            let id = instance_id(&template.id, date);

            let reused = previous
                .remove(id.as_str())
                .or_else(|| take_carried(&mut previous, template, occurrence.at, &current));
            let instance = match reused {
                Some(old) => {
                    if old.template_id != template.id {
                        debug!(instance = %old.id, template = %template.id, "instance carried over to renamed template");
                    }
                    let mut instance = old.clone();
                    instance.template_id = template.id.clone();
                    instance.refresh_from_template(template);
                    if instance.status == InstanceStatus::Pending {
                        instance.reschedule(&occurrence, segment);
                    }
                    instance
                }
                None => TaskInstance::from_template(template, &occurrence, segment, now),
            };
            build.instances.push(instance);
        }

        // Leftovers: their template is gone or no longer matches this date
        for old in existing.iter().filter(|inst| previous.contains_key(inst.id.as_str())) {
            if old.status == InstanceStatus::Pending {
                build.dropped.push(old.id.clone());
            } else {
                build.instances.push(old.clone());
            }
        }

        sort_plan(&mut build.instances);
        build
    }
}

/// An instance with no id match that still belongs to `template`: one already
/// carried over to it, or an orphan (its template is gone) in the same slot.
/// The instance keeps its id so sessions, blocks and backlog entries stay valid.
fn take_carried<'a>(
    previous: &mut HashMap<&'a str, &'a TaskInstance>,
    template: &TaskTemplate,
    at: DateTime<Utc>,
    current: &HashSet<&str>,
) -> Option<&'a TaskInstance> {
    let key = previous
        .iter()
        .find(|(_, old)| old.template_id == template.id)
        .or_else(|| {
            previous
                .iter()
                .filter(|(_, old)| !current.contains(old.template_id.as_str()) && old.scheduled_at == at)
                .min_by_key(|(id, _)| **id)
        })
        .map(|(id, _)| *id)?;
    previous.remove(key)
}

/// Scheduled time, then priority (1 first), then template id
pub fn sort_plan(instances: &mut [TaskInstance]) {
    instances.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then(a.priority.cmp(&b.priority))
            .then_with(|| a.template_id.cmp(&b.template_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use crate::schedule::Recurrence;
    use chrono::{Duration, TimeZone};
    use chrono_tz::Tz;
    use pretty_assertions::assert_eq;

    fn builder() -> DailyPlanBuilder {
        DailyPlanBuilder::new(RecurrenceResolver::new(Tz::UTC), SegmentBounds::default())
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 4, 0, 0).unwrap()
    }

    fn templates() -> Vec<TaskTemplate> {
        vec![
            TaskTemplate::new("Journal", hm(21, 0)),
            TaskTemplate::new("Water plants", hm(7, 0)).with_priority(Priority::Medium),
            TaskTemplate::new("Take Supplements", hm(7, 0)).with_priority(Priority::High),
            TaskTemplate::new("Lunch walk", hm(12, 30)),
            TaskTemplate::new("Night meds", hm(1, 0)),
        ]
    }

    fn ids(instances: &[TaskInstance]) -> Vec<&str> {
        instances.iter().map(|i| i.template_id.as_str()).collect()
    }

    #[test]
    fn test_segment_boundaries() {
        let bounds = SegmentBounds::default();
        assert_eq!(bounds.segment_for(hm(4, 59)), Segment::Evening);
        assert_eq!(bounds.segment_for(hm(5, 0)), Segment::Morning);
        assert_eq!(bounds.segment_for(hm(11, 59)), Segment::Morning);
        assert_eq!(bounds.segment_for(hm(12, 0)), Segment::Afternoon);
        assert_eq!(bounds.segment_for(hm(17, 0)), Segment::Evening);
        assert_eq!(bounds.segment_for(hm(23, 59)), Segment::Evening);
    }

    #[test]
    fn test_build_orders_by_time_then_priority() {
        let build = builder().build(&templates(), date(), &[], now());
        assert_eq!(
            ids(&build.instances),
            vec![
                "night_meds_0100",
                "take_supplements_0700",
                "water_plants_0700",
                "lunch_walk_1230",
                "journal_2100",
            ]
        );
        assert_eq!(build.instances[0].segment, Segment::Evening);
        assert_eq!(build.instances[3].segment, Segment::Afternoon);
    }

    #[test]
    fn test_rebuild_preserves_state_and_refreshes_fields() {
        let b = builder();
        let first = b.build(&templates(), date(), &[], now());

        let mut existing = first.instances.clone();
        existing[1].transition(InstanceStatus::Active, now());
        existing[1].consume(120);

        let mut changed = templates();
        changed[2].title = "Take vitamins".to_string();
        changed[2].time = hm(8, 0);
        changed[1].time = hm(9, 0);

        let second = b.build(&changed, date(), &existing, now());
        let supplements = second
            .instances
            .iter()
            .find(|i| i.template_id == "take_supplements_0700")
            .unwrap();
        assert_eq!(supplements.title, "Take vitamins");
        assert_eq!(supplements.status, InstanceStatus::Active);
        assert_eq!(supplements.remaining_secs, 15 * 60 - 120);
        // Active instances keep their slot
        assert_eq!(supplements.local_time, hm(7, 0));

        let water = second
            .instances
            .iter()
            .find(|i| i.template_id == "water_plants_0700")
            .unwrap();
        assert_eq!(water.local_time, hm(9, 0));
        assert_eq!(water.scheduled_at, Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_vanished_templates() {
        let b = builder();
        let mut existing = b.build(&templates(), date(), &[], now()).instances;
        let done = existing
            .iter_mut()
            .find(|i| i.template_id == "journal_2100")
            .unwrap();
        done.transition(InstanceStatus::Completed, now() + Duration::hours(17));

        let remaining = vec![TaskTemplate::new("Lunch walk", hm(12, 30))];
        let build = b.build(&remaining, date(), &existing, now());

        assert_eq!(ids(&build.instances), vec!["lunch_walk_1230", "journal_2100"]);
        assert_eq!(build.dropped.len(), 3);
    }

    #[test]
    fn test_renamed_template_takes_over_its_slot() {
        let b = builder();
        let mut existing = b.build(&templates(), date(), &[], now()).instances;
        let active = existing
            .iter_mut()
            .find(|i| i.template_id == "take_supplements_0700")
            .unwrap();
        active.transition(InstanceStatus::Active, now());
        active.consume(60);

        let mut renamed = templates();
        renamed[2] = TaskTemplate::new("Take vitamins", hm(7, 0)).with_priority(Priority::High);
        let build = b.build(&renamed, date(), &existing, now());

        assert_eq!(build.instances.len(), 5);
        assert!(build.dropped.is_empty());
        let vitamins: Vec<_> = build.instances.iter().filter(|i| i.local_time == hm(7, 0)).collect();
        assert_eq!(vitamins.len(), 2);
        let carried = vitamins.iter().find(|i| i.template_id == "take_vitamins_0700").unwrap();
        assert_eq!(carried.id, "take_supplements_0700@2026-05-04");
        assert_eq!(carried.title, "Take vitamins");
        assert_eq!(carried.status, InstanceStatus::Active);
        assert_eq!(carried.remaining_secs, 15 * 60 - 60);

        // A second rebuild finds the carried instance again
        let again = b.build(&renamed, date(), &build.instances, now());
        assert_eq!(again.instances, build.instances);
    }

    #[test]
    fn test_malformed_rule_is_reported_and_rest_builds() {
        let mut list = templates();
        list[0] = list[0].clone().with_recurrence(Recurrence::parse("FREQ=MONTHLY"));
        let build = builder().build(&list, date(), &[], now());
        assert_eq!(build.instances.len(), 4);
        assert_eq!(build.warnings.len(), 1);
        assert_eq!(build.warnings[0].template_id, "journal_2100");
    }

    #[test]
    fn test_duplicate_template_yields_one_instance() {
        let mut list = templates();
        list.push(TaskTemplate::new("Journal", hm(21, 0)));
        let build = builder().build(&list, date(), &[], now());
        assert_eq!(build.instances.len(), 5);
    }
}

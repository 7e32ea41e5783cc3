//! Consolidation of overdue, unresolved instances into one block per segment.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Segment, TaskInstance};

/// Id of the block for `segment` on `date`
pub fn block_id(date: NaiveDate, segment: Segment) -> String {
    format!("catchup:{}:{}", date.format("%Y-%m-%d"), segment)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchUpBlock {
    pub id: String,
    pub date: NaiveDate,
    pub segment: Segment,
    pub created_at: DateTime<Utc>,
    /// Member instance ids in original scheduled order
    pub instance_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchUpChange {
    /// A block was created or its membership changed
    Updated(CatchUpBlock),
    Dissolved { block_id: String, segment: Segment },
}

#[derive(Debug, Clone, Default)]
pub struct CatchUpConsolidator {
    blocks: Vec<CatchUpBlock>,
}

impl CatchUpConsolidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: Vec<CatchUpBlock>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[CatchUpBlock] {
        &self.blocks
    }

    pub fn block(&self, id: &str) -> Option<&CatchUpBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Bring every segment's block in line with the instances' current state
    pub fn consolidate(
        &mut self,
        date: NaiveDate,
        instances: &[TaskInstance],
        now: DateTime<Utc>,
    ) -> Vec<CatchUpChange> {
        let mut changes = Vec::new();

        // Blocks left over from another day have no members any more
        let (stale, kept): (Vec<_>, Vec<_>) = self.blocks.drain(..).partition(|b| b.date != date);
        self.blocks = kept;
        for block in stale {
            changes.push(CatchUpChange::Dissolved {
                block_id: block.id,
                segment: block.segment,
            });
        }

        for &segment in Segment::all() {
            let mut members: Vec<&TaskInstance> = instances
                .iter()
                .filter(|i| i.segment == segment && i.status.is_unresolved() && i.is_due(now))
                .collect();
            members.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
            let member_ids: Vec<String> = members.iter().map(|i| i.id.clone()).collect();

            let id = block_id(date, segment);
            let position = self.blocks.iter().position(|b| b.id == id);

            match (position, member_ids.is_empty()) {
                (Some(pos), true) => {
                    let block = self.blocks.remove(pos);
                    debug!(block = %block.id, "catch-up block dissolved");
                    changes.push(CatchUpChange::Dissolved {
                        block_id: block.id,
                        segment,
                    });
                }
                (Some(pos), false) => {
                    let block = &mut self.blocks[pos];
                    if block.instance_ids != member_ids {
                        block.instance_ids = member_ids;
                        changes.push(CatchUpChange::Updated(block.clone()));
                    }
                }
                (None, false) => {
                    let block = CatchUpBlock {
                        id,
                        date,
                        segment,
                        created_at: now,
                        instance_ids: member_ids,
                    };
                    debug!(block = %block.id, members = block.instance_ids.len(), "catch-up block created");
                    changes.push(CatchUpChange::Updated(block.clone()));
                    self.blocks.push(block);
                }
                (None, true) => {}
            }
        }

        self.blocks.sort_by_key(|b| b.segment);
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstanceStatus, TaskTemplate};
    use crate::schedule::Occurrence;
    use chrono::{NaiveTime, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
    }

    fn instance(title: &str, h: u32, segment: Segment) -> TaskInstance {
        let template = TaskTemplate::new(title, NaiveTime::from_hms_opt(h, 0, 0).unwrap());
        let occurrence = Occurrence {
            date: date(),
            local_time: template.time,
            at: at(h, 0),
            dst_shifted: false,
        };
        TaskInstance::from_template(&template, &occurrence, segment, at(0, 0))
    }

    fn plan() -> Vec<TaskInstance> {
        vec![
            instance("Stretch", 7, Segment::Morning),
            instance("Vitamins", 8, Segment::Morning),
            instance("Walk", 13, Segment::Afternoon),
        ]
    }

    #[test]
    fn test_block_id_format() {
        assert_eq!(block_id(date(), Segment::Afternoon), "catchup:2026-05-04:afternoon");
    }

    #[test]
    fn test_block_exists_iff_due_unresolved_member() {
        let mut instances = plan();
        let mut consolidator = CatchUpConsolidator::new();

        assert!(consolidator.consolidate(date(), &instances, at(6, 0)).is_empty());

        let changes = consolidator.consolidate(date(), &instances, at(8, 30));
        assert_eq!(changes.len(), 1);
        let block = &consolidator.blocks()[0];
        assert_eq!(block.segment, Segment::Morning);
        assert_eq!(block.instance_ids, vec![instances[0].id.clone(), instances[1].id.clone()]);
        assert_eq!(block.created_at, at(8, 30));

        // Resolving one member shrinks the block, creation time is kept
        instances[0].transition(InstanceStatus::Completed, at(8, 40));
        let changes = consolidator.consolidate(date(), &instances, at(8, 40));
        assert!(matches!(&changes[0], CatchUpChange::Updated(b) if b.instance_ids.len() == 1));
        assert_eq!(consolidator.blocks()[0].created_at, at(8, 30));

        // Resolving the last one dissolves it
        instances[1].transition(InstanceStatus::Skipped, at(8, 45));
        let changes = consolidator.consolidate(date(), &instances, at(8, 45));
        assert_eq!(
            changes,
            vec![CatchUpChange::Dissolved {
                block_id: block_id(date(), Segment::Morning),
                segment: Segment::Morning
            }]
        );
        assert!(consolidator.blocks().is_empty());
    }

    #[test]
    fn test_active_and_expired_members() {
        let mut instances = plan();
        instances[0].transition(InstanceStatus::Expired, at(7, 15));
        instances[1].transition(InstanceStatus::Active, at(8, 0));

        let mut consolidator = CatchUpConsolidator::new();
        consolidator.consolidate(date(), &instances, at(8, 5));
        assert_eq!(consolidator.blocks().len(), 1);
        assert_eq!(consolidator.blocks()[0].instance_ids, vec![instances[0].id.clone()]);
    }

    #[test]
    fn test_unchanged_membership_reports_nothing() {
        let instances = plan();
        let mut consolidator = CatchUpConsolidator::new();
        consolidator.consolidate(date(), &instances, at(14, 0));
        assert_eq!(consolidator.blocks().len(), 2);
        assert!(consolidator.consolidate(date(), &instances, at(14, 1)).is_empty());
    }

    #[test]
    fn test_blocks_from_previous_day_dissolve() {
        let instances = plan();
        let mut consolidator = CatchUpConsolidator::new();
        consolidator.consolidate(date(), &instances, at(9, 0));

        let next_day = date().succ_opt().unwrap();
        let changes = consolidator.consolidate(next_day, &[], at(9, 0) + chrono::Duration::days(1));
        assert_eq!(changes.len(), 1);
        assert!(consolidator.blocks().is_empty());
    }
}

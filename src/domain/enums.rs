use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    Pending,
    Active,
    Completed,
    Skipped,
    Expired,
    Redeemed,
}

impl InstanceStatus {
    /// Convert status to tag
    pub fn to_tag(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Skipped => "SKIPPED",
            Self::Expired => "EXPIRED",
            Self::Redeemed => "REDEEMED",
        }
    }

    /// Pending or Expired: still owed by the user, eligible for catch-up
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Pending | Self::Expired)
    }

    /// Statuses that end up in the backlog at rollover
    pub fn needs_backlog(&self) -> bool {
        matches!(self, Self::Pending | Self::Skipped | Self::Expired)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_tag())
    }
}

/// Task priority. Ordering follows the numeric level, so `High < Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::High),
            2 => Some(Self::Medium),
            3 => Some(Self::Low),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Self::from_level(level).ok_or_else(|| format!("priority must be 1, 2 or 3 (got {level})"))
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.level()
    }
}

/// Time-of-day band used to group catch-up work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Morning,
    Afternoon,
    Evening,
}

impl Segment {
    pub fn name(&self) -> &'static str {
        match self {
            Segment::Morning => "morning",
            Segment::Afternoon => "afternoon",
            Segment::Evening => "evening",
        }
    }

    pub fn all() -> &'static [Segment] {
        &[Segment::Morning, Segment::Afternoon, Segment::Evening]
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

//! Semantic events produced by one diff pass.

use std::cmp::Reverse;

use crate::classifier::MissedBlocksGroup;
use crate::types::Validator;

/// Event category, in presentation priority order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EventKind {
    Tombstoned,
    Jailed,
    GroupChanged,
    Inactive,
    Unjailed,
    Active,
    Created,
}

impl EventKind {
    /// Label used for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Tombstoned => "tombstoned",
            EventKind::Jailed => "jailed",
            EventKind::GroupChanged => "group_changed",
            EventKind::Inactive => "inactive",
            EventKind::Unjailed => "unjailed",
            EventKind::Active => "active",
            EventKind::Created => "created",
        }
    }
}

/// A change in one validator's state between two snapshots.
#[derive(Clone, Debug, PartialEq)]
pub enum ReportEvent {
    Tombstoned {
        validator: Validator,
    },
    Jailed {
        validator: Validator,
    },
    /// The validator moved to a different missed-blocks group.
    GroupChanged {
        validator: Validator,
        missed_before: i64,
        missed_after: i64,
        group_before: MissedBlocksGroup,
        group_after: MissedBlocksGroup,
    },
    Inactive {
        validator: Validator,
    },
    Unjailed {
        validator: Validator,
    },
    Active {
        validator: Validator,
    },
    /// The validator did not exist in the older snapshot.
    Created {
        validator: Validator,
    },
}

impl ReportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ReportEvent::Tombstoned { .. } => EventKind::Tombstoned,
            ReportEvent::Jailed { .. } => EventKind::Jailed,
            ReportEvent::GroupChanged { .. } => EventKind::GroupChanged,
            ReportEvent::Inactive { .. } => EventKind::Inactive,
            ReportEvent::Unjailed { .. } => EventKind::Unjailed,
            ReportEvent::Active { .. } => EventKind::Active,
            ReportEvent::Created { .. } => EventKind::Created,
        }
    }

    pub fn validator(&self) -> &Validator {
        match self {
            ReportEvent::Tombstoned { validator }
            | ReportEvent::Jailed { validator }
            | ReportEvent::GroupChanged { validator, .. }
            | ReportEvent::Inactive { validator }
            | ReportEvent::Unjailed { validator }
            | ReportEvent::Active { validator }
            | ReportEvent::Created { validator } => validator,
        }
    }

    /// Change in missed blocks; zero for everything but group changes.
    pub fn missed_delta(&self) -> i64 {
        match self {
            ReportEvent::GroupChanged {
                missed_before,
                missed_after,
                ..
            } => missed_after - missed_before,
            _ => 0,
        }
    }

    /// `true` if the validator moved into a more severe group.
    pub fn is_increasing(&self) -> bool {
        match self {
            ReportEvent::GroupChanged {
                group_before,
                group_after,
                ..
            } => group_after.start > group_before.start,
            _ => false,
        }
    }

    /// One-line human-readable rendering.
    pub fn describe(&self) -> String {
        let moniker = &self.validator().moniker;
        match self {
            ReportEvent::Tombstoned { .. } => format!("💀 {moniker} has been tombstoned"),
            ReportEvent::Jailed { .. } => format!("❌ {moniker} has been jailed"),
            ReportEvent::GroupChanged {
                missed_before,
                missed_after,
                group_after,
                ..
            } => {
                let (emoji, desc) = if self.is_increasing() {
                    (&group_after.emoji_start, &group_after.desc_start)
                } else {
                    (&group_after.emoji_end, &group_after.desc_end)
                };
                format!("{emoji} {moniker} {desc}: {missed_before} -> {missed_after} missed blocks")
            }
            ReportEvent::Inactive { .. } => format!("😔 {moniker} has left the active set"),
            ReportEvent::Unjailed { .. } => format!("👌 {moniker} has been unjailed"),
            ReportEvent::Active { .. } => format!("✅ {moniker} is now in the active set"),
            ReportEvent::Created { .. } => format!("💡 new validator created: {moniker}"),
        }
    }
}

/// Sorts events into presentation order.
///
/// Events are ordered by kind (tombstoned, jailed, group changes, then the
/// rest). Group changes are further ordered by missed-block delta, largest
/// increase first, so validators getting worse surface before recovering
/// ones. The sort is stable, so ties keep the diff's operator order.
pub fn sort_events(events: &mut [ReportEvent]) {
    events.sort_by_key(|event| (event.kind(), Reverse(event.missed_delta())));
}

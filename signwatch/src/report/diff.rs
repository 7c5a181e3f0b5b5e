//! Snapshot diff engine.
//!
//! [`diff`] compares two snapshots and returns every change as an ordered
//! list of [`ReportEvent`]s. It is a pure function: no I/O, no mutation of
//! its inputs. If any validator's missed-block count cannot be classified
//! the whole diff fails, since a partial report is worse than none.

use thiserror::Error;

use crate::classifier::{ClassifierError, MissedBlocksGroup, MissedBlocksGroups};
use crate::state::{Entry, Snapshot, SnapshotPair};

use super::event::{ReportEvent, sort_events};

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("cannot classify {missed} missed blocks of validator {operator}: {source}")]
    Classification {
        operator: String,
        missed: i64,
        source: ClassifierError,
    },
}

/// Result of diffing the committed snapshot pair.
#[derive(Clone, Debug, PartialEq)]
pub enum DiffOutcome {
    /// Only one snapshot has been committed so far.
    NoOlderSnapshot,
    Events(Vec<ReportEvent>),
}

/// Diffs the committed pair, if there are two snapshots to compare.
pub fn diff_pair(
    pair: &SnapshotPair,
    groups: &MissedBlocksGroups,
) -> Result<DiffOutcome, DiffError> {
    match pair.both() {
        None => Ok(DiffOutcome::NoOlderSnapshot),
        Some((older, newer)) => diff(&older, &newer, groups).map(DiffOutcome::Events),
    }
}

/// Compares `older` against `newer` and returns the ordered events.
pub fn diff(
    older: &Snapshot,
    newer: &Snapshot,
    groups: &MissedBlocksGroups,
) -> Result<Vec<ReportEvent>, DiffError> {
    let mut events = Vec::new();

    for (operator, new_entry) in &newer.entries {
        let Some(old_entry) = older.get(operator) else {
            events.push(ReportEvent::Created {
                validator: new_entry.validator.clone(),
            });
            continue;
        };

        diff_entry(operator, old_entry, new_entry, groups, &mut events)?;
    }

    sort_events(&mut events);
    Ok(events)
}

fn classify<'a>(
    groups: &'a MissedBlocksGroups,
    operator: &str,
    entry: &Entry,
) -> Result<&'a MissedBlocksGroup, DiffError> {
    let missed = entry.signature_info.missed();
    groups
        .get_group(missed)
        .map_err(|source| DiffError::Classification {
            operator: operator.to_string(),
            missed,
            source,
        })
}

fn diff_entry(
    operator: &str,
    old_entry: &Entry,
    new_entry: &Entry,
    groups: &MissedBlocksGroups,
    events: &mut Vec<ReportEvent>,
) -> Result<(), DiffError> {
    let old_group = classify(groups, operator, old_entry)?;
    let new_group = classify(groups, operator, new_entry)?;

    let old_validator = &old_entry.validator;
    let new_validator = &new_entry.validator;

    if old_group.start != new_group.start && !new_validator.jailed {
        events.push(ReportEvent::GroupChanged {
            validator: new_validator.clone(),
            missed_before: old_entry.signature_info.missed(),
            missed_after: new_entry.signature_info.missed(),
            group_before: old_group.clone(),
            group_after: new_group.clone(),
        });
    }

    if !old_validator.tombstoned() && new_validator.tombstoned() {
        events.push(ReportEvent::Tombstoned {
            validator: new_validator.clone(),
        });
    }

    match (old_validator.jailed, new_validator.jailed) {
        (false, true) => events.push(ReportEvent::Jailed {
            validator: new_validator.clone(),
        }),
        (true, false) => events.push(ReportEvent::Unjailed {
            validator: new_validator.clone(),
        }),
        _ => {}
    }

    match (old_entry.is_active, new_entry.is_active) {
        (false, true) => events.push(ReportEvent::Active {
            validator: new_validator.clone(),
        }),
        (true, false) => events.push(ReportEvent::Inactive {
            validator: new_validator.clone(),
        }),
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::EventKind;
    use crate::types::{BondStatus, ConsensusAddress, SignatureInfo, SigningInfo, Validator};

    fn group(start: i64, end: i64) -> MissedBlocksGroup {
        MissedBlocksGroup {
            start,
            end,
            emoji_start: "🔴".to_string(),
            desc_start: "is skipping blocks".to_string(),
            emoji_end: "🟡".to_string(),
            desc_end: "is recovering".to_string(),
        }
    }

    fn groups() -> MissedBlocksGroups {
        MissedBlocksGroups(vec![group(0, 9), group(10, 99), group(100, 100)])
    }

    fn entry(operator: &str, missed: i64) -> Entry {
        Entry {
            validator: Validator {
                operator_address: operator.to_string(),
                consensus_address: ConsensusAddress::from_hex("AA"),
                consensus_address_valcons: format!("valcons-{operator}"),
                moniker: operator.to_string(),
                details: String::new(),
                jailed: false,
                status: BondStatus::Bonded,
                tokens: 0.0,
                signing_info: Some(SigningInfo {
                    tombstoned: false,
                    missed_blocks_counter: missed,
                    start_height: 1,
                    jailed_until: None,
                }),
            },
            signature_info: SignatureInfo {
                signed: 100 - missed,
                not_signed: missed,
                ..Default::default()
            },
            is_active: true,
        }
    }

    fn snapshot(height: i64, entries: Vec<Entry>) -> Snapshot {
        let mut snapshot = Snapshot::new(height);
        for e in entries {
            snapshot
                .entries
                .insert(e.validator.operator_address.clone(), e);
        }
        snapshot
    }

    fn jailed(mut e: Entry) -> Entry {
        e.validator.jailed = true;
        e.validator.status = BondStatus::Unbonding;
        e.is_active = false;
        e
    }

    fn tombstoned(mut e: Entry) -> Entry {
        if let Some(info) = e.validator.signing_info.as_mut() {
            info.tombstoned = true;
        }
        e
    }

    fn kinds(events: &[ReportEvent]) -> Vec<(EventKind, String)> {
        events
            .iter()
            .map(|e| (e.kind(), e.validator().operator_address.clone()))
            .collect()
    }

    #[test]
    fn moving_up_a_group_yields_one_group_change() {
        let older = snapshot(100, vec![entry("v", 5)]);
        let newer = snapshot(110, vec![entry("v", 15)]);

        let events = diff(&older, &newer, &groups()).expect("diff succeeds");

        assert_eq!(events.len(), 1);
        match &events[0] {
            ReportEvent::GroupChanged {
                validator,
                missed_before,
                missed_after,
                group_after,
                ..
            } => {
                assert_eq!(validator.operator_address, "v");
                assert_eq!(*missed_before, 5);
                assert_eq!(*missed_after, 15);
                assert_eq!(group_after.start, 10);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events[0].is_increasing());
    }

    #[test]
    fn jailing_yields_jailed_and_inactive_only() {
        let older = snapshot(100, vec![entry("x", 0), entry("y", 0)]);
        let newer = snapshot(110, vec![jailed(entry("x", 0)), entry("y", 0)]);

        let events = diff(&older, &newer, &groups()).expect("diff succeeds");

        assert_eq!(
            kinds(&events),
            vec![
                (EventKind::Jailed, "x".to_string()),
                (EventKind::Inactive, "x".to_string()),
            ]
        );
    }

    #[test]
    fn new_validator_yields_only_created() {
        let older = snapshot(100, vec![]);
        let newer = snapshot(110, vec![jailed(entry("n", 50))]);

        let events = diff(&older, &newer, &groups()).expect("diff succeeds");

        assert_eq!(kinds(&events), vec![(EventKind::Created, "n".to_string())]);
    }

    #[test]
    fn jailed_validator_does_not_report_group_changes() {
        let older = snapshot(100, vec![entry("x", 5)]);
        let newer = snapshot(110, vec![jailed(entry("x", 50))]);

        let events = diff(&older, &newer, &groups()).expect("diff succeeds");

        assert!(events.iter().all(|e| e.kind() != EventKind::GroupChanged));
    }

    #[test]
    fn recovery_and_unjail_and_activation_are_reported() {
        let older = snapshot(100, vec![jailed(entry("x", 50))]);
        let newer = snapshot(110, vec![entry("x", 5)]);

        let events = diff(&older, &newer, &groups()).expect("diff succeeds");

        assert_eq!(
            events.iter().map(ReportEvent::kind).collect::<Vec<_>>(),
            vec![EventKind::GroupChanged, EventKind::Unjailed, EventKind::Active]
        );
        assert!(!events[0].is_increasing());
        assert!(events[0].describe().contains("is recovering"));
    }

    #[test]
    fn events_are_ordered_by_urgency() {
        let older = snapshot(
            100,
            vec![
                entry("a-recovering", 50),
                entry("b-skipping-little", 5),
                entry("c-jailed", 0),
                entry("d-tombstoned", 0),
                entry("e-skipping-lots", 0),
            ],
        );
        let newer = snapshot(
            110,
            vec![
                entry("a-recovering", 5),
                entry("b-skipping-little", 12),
                jailed(entry("c-jailed", 0)),
                tombstoned(jailed(entry("d-tombstoned", 0))),
                entry("e-skipping-lots", 100),
            ],
        );

        let events = diff(&older, &newer, &groups()).expect("diff succeeds");

        assert_eq!(
            kinds(&events),
            vec![
                (EventKind::Tombstoned, "d-tombstoned".to_string()),
                (EventKind::Jailed, "c-jailed".to_string()),
                (EventKind::Jailed, "d-tombstoned".to_string()),
                (EventKind::GroupChanged, "e-skipping-lots".to_string()),
                (EventKind::GroupChanged, "b-skipping-little".to_string()),
                (EventKind::GroupChanged, "a-recovering".to_string()),
                (EventKind::Inactive, "c-jailed".to_string()),
                (EventKind::Inactive, "d-tombstoned".to_string()),
            ]
        );
    }

    #[test]
    fn unclassifiable_count_aborts_the_whole_diff() {
        let older = snapshot(100, vec![entry("a", 0), entry("b", 0)]);
        let newer = snapshot(110, vec![entry("a", 5), entry("b", 101)]);

        let err = diff(&older, &newer, &groups()).expect_err("diff must fail");
        match err {
            DiffError::Classification {
                operator, missed, ..
            } => {
                assert_eq!(operator, "b");
                assert_eq!(missed, 101);
            }
        }
    }

    #[test]
    fn pair_with_one_snapshot_has_nothing_to_diff() {
        let mut pair = SnapshotPair::new();
        pair.commit(snapshot(100, vec![entry("a", 0)]));
        assert_eq!(
            diff_pair(&pair, &groups()).unwrap(),
            DiffOutcome::NoOlderSnapshot
        );

        pair.commit(snapshot(110, vec![entry("a", 0)]));
        assert_eq!(
            diff_pair(&pair, &groups()).unwrap(),
            DiffOutcome::Events(vec![])
        );
    }
}

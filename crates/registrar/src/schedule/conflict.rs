//! Schedule conflict detection between requested and already-held sections.

use super::{overlaps, TimeSlot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A time slot tagged with a human-readable label (usually the section it belongs to).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledSlot {
    pub label: String,
    pub slot: TimeSlot,
}

impl LabeledSlot {
    pub fn new(label: impl Into<String>, slot: TimeSlot) -> Self {
        Self {
            label: label.into(),
            slot,
        }
    }
}

/// The first overlapping pair found: `first` is always a candidate slot,
/// `second` is either an existing slot or a later candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub first: String,
    pub second: String,
}

/// Finds the first overlapping pair among `candidates` and between
/// `candidates` and `existing`. Existing slots are never compared with each
/// other.
///
/// Detection order is deterministic: days Monday through Sunday, then
/// candidates in submission order. For each candidate the existing slots are
/// checked first (in their given order), then the candidates submitted after
/// it.
pub fn find_conflict(candidates: &[LabeledSlot], existing: &[LabeledSlot]) -> Option<Conflict> {
    // day number -> (candidates, existing), each keeping input order
    let mut by_day: BTreeMap<u32, (Vec<&LabeledSlot>, Vec<&LabeledSlot>)> = BTreeMap::new();

    for candidate in candidates {
        by_day
            .entry(candidate.slot.day_number())
            .or_default()
            .0
            .push(candidate);
    }
    for held in existing {
        // Days without candidates cannot produce a conflict.
        if let Some(group) = by_day.get_mut(&held.slot.day_number()) {
            group.1.push(held);
        }
    }

    for (day_candidates, day_existing) in by_day.values() {
        for (i, candidate) in day_candidates.iter().enumerate() {
            if let Some(held) = day_existing
                .iter()
                .find(|held| overlaps(&candidate.slot, &held.slot))
            {
                return Some(Conflict {
                    first: candidate.label.clone(),
                    second: held.label.clone(),
                });
            }

            if let Some(other) = day_candidates[i + 1..]
                .iter()
                .find(|other| overlaps(&candidate.slot, &other.slot))
            {
                return Some(Conflict {
                    first: candidate.label.clone(),
                    second: other.label.clone(),
                });
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(label: &str, slot: &str) -> LabeledSlot {
        LabeledSlot::new(label, slot.parse().unwrap())
    }

    #[test]
    fn test_no_conflict_across_days_or_back_to_back() {
        let existing = vec![labeled("MATH 20A", "Mon 09:00-10:00")];
        let candidates = vec![
            labeled("CSE 11", "Mon 10:00-11:00"),
            labeled("CSE 12", "Tue 09:00-10:00"),
            labeled("CSE 15L", "Mon 08:00-09:00"),
        ];
        assert_eq!(find_conflict(&candidates, &existing), None);
    }

    #[test]
    fn test_candidate_against_existing() {
        let existing = vec![labeled("MATH 20A", "Mon 09:00-10:00")];
        let candidates = vec![labeled("CSE 11", "Mon 09:30-10:30")];

        assert_eq!(
            find_conflict(&candidates, &existing),
            Some(Conflict {
                first: "CSE 11".to_string(),
                second: "MATH 20A".to_string(),
            })
        );
    }

    #[test]
    fn test_candidate_against_candidate() {
        let candidates = vec![
            labeled("CSE 11", "Wed 14:00-15:20"),
            labeled("CSE 12", "Wed 15:00-16:20"),
        ];

        let conflict = find_conflict(&candidates, &[]).unwrap();
        assert_eq!(conflict.first, "CSE 11");
        assert_eq!(conflict.second, "CSE 12");
    }

    #[test]
    fn test_existing_slots_are_not_compared_with_each_other() {
        let existing = vec![
            labeled("A", "Fri 09:00-10:00"),
            labeled("B", "Fri 09:30-10:30"),
        ];
        let candidates = vec![labeled("C", "Fri 12:00-13:00")];
        assert_eq!(find_conflict(&candidates, &existing), None);
    }

    #[test]
    fn test_detection_order_is_by_day_then_submission() {
        let existing = vec![
            labeled("HELD-TUE", "Tue 09:00-10:00"),
            labeled("HELD-MON", "Mon 09:00-10:00"),
        ];
        // The Tuesday clash is submitted first but Monday is reported first.
        let candidates = vec![
            labeled("NEW-TUE", "Tue 09:30-10:30"),
            labeled("NEW-MON-2", "Mon 13:00-14:00"),
            labeled("NEW-MON-1", "Mon 09:30-10:30"),
            labeled("NEW-MON-3", "Mon 13:30-14:30"),
        ];

        let conflict = find_conflict(&candidates, &existing).unwrap();
        assert_eq!(conflict.first, "NEW-MON-2");
        assert_eq!(conflict.second, "NEW-MON-3");

        // Same input twice gives the same answer.
        assert_eq!(find_conflict(&candidates, &existing), Some(conflict));
    }

    #[test]
    fn test_existing_checked_before_later_candidates() {
        let existing = vec![labeled("HELD", "Thu 10:00-11:00")];
        let candidates = vec![
            labeled("NEW-1", "Thu 10:30-11:30"),
            labeled("NEW-2", "Thu 10:45-11:15"),
        ];

        let conflict = find_conflict(&candidates, &existing).unwrap();
        assert_eq!(conflict.second, "HELD");
    }
}

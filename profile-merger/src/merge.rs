use rayon::prelude::*;
use rust_decimal::Decimal;

use crate::{
    error::{EventMergeError, PipelineError},
    select::Selection,
    types::{
        CanonicalRecord, CustomEvent, DuplicateGroup, MergeDecision, MergedEvent, MergedPurchase,
        Profile,
    },
};

/// Splits a group into its canonical record and the discarded profiles, keeping the
/// discarded profiles in group order.
pub fn build_decision(group: DuplicateGroup, selection: Selection) -> MergeDecision {
    let DuplicateGroup {
        email,
        mut profiles,
    } = group;
    let canonical = profiles.remove(selection.index);
    MergeDecision {
        email,
        canonical: CanonicalRecord::new(canonical),
        discarded: profiles,
    }
}

/// Folds an event into one already accumulated from an earlier discarded profile. Counts
/// add up.
pub fn merge_existing(
    existing: &MergedEvent,
    incoming: &CustomEvent,
) -> Result<MergedEvent, EventMergeError> {
    check_names(&existing.name, &incoming.name)?;
    let count = existing
        .count
        .checked_add(incoming.count)
        .ok_or_else(|| EventMergeError::CountOverflow {
            name: existing.name.clone(),
        })?;
    Ok(MergedEvent {
        name: existing.name.clone(),
        time: existing.time.min(incoming.first_seen),
        last: existing.last.max(incoming.last_seen),
        count,
    })
}

/// Folds an event into the canonical profile's own copy of it.
///
/// NOTE: unlike `merge_existing`, the canonical's original count is not added; only the
/// discarded profile's count is kept. This mirrors how the CRM data has always been merged
/// and is kept as-is until someone confirms it should sum.
pub fn merge_new(
    original: &CustomEvent,
    incoming: &CustomEvent,
) -> Result<MergedEvent, EventMergeError> {
    check_names(&original.name, &incoming.name)?;
    Ok(MergedEvent {
        name: original.name.clone(),
        time: original.first_seen.min(incoming.first_seen),
        last: original.last_seen.max(incoming.last_seen),
        count: incoming.count,
    })
}

fn check_names(existing: &str, incoming: &str) -> Result<(), EventMergeError> {
    if existing != incoming {
        return Err(EventMergeError::NameMismatch {
            existing: existing.to_string(),
            incoming: incoming.to_string(),
        });
    }
    Ok(())
}

/// Copies attributes the canonical profile never had. Later discarded profiles overwrite
/// earlier ones; attributes already on the canonical profile are left alone.
pub fn merge_attributes(record: &mut CanonicalRecord, discarded: &Profile) {
    for (key, value) in &discarded.custom_attributes {
        if record.profile.custom_attributes.contains_key(key) {
            continue;
        }
        record
            .new_custom_attributes
            .insert(key.clone(), value.clone());
    }
}

pub fn merge_events(
    record: &mut CanonicalRecord,
    discarded: &Profile,
) -> Result<(), EventMergeError> {
    for event in &discarded.custom_events {
        let merged = if let Some(existing) = record.new_custom_events.get(&event.name) {
            merge_existing(existing, event)?
        } else if let Some(original) = record.profile.event(&event.name) {
            merge_new(original, event)?
        } else {
            MergedEvent::from(event)
        };
        record.new_custom_events.insert(event.name.clone(), merged);
    }
    Ok(())
}

/// Every purchase is carried over; purchases are never deduplicated.
pub fn merge_purchases(record: &mut CanonicalRecord, discarded: &Profile) {
    record
        .new_purchases
        .extend(discarded.purchases.iter().map(MergedPurchase::from));
}

pub fn merge_revenue(record: &mut CanonicalRecord, discarded: &Profile) {
    if discarded.total_revenue > Decimal::ZERO {
        record.new_total_revenue += discarded.total_revenue;
    }
}

pub fn fold_discarded(
    record: &mut CanonicalRecord,
    discarded: &Profile,
) -> Result<(), EventMergeError> {
    merge_attributes(record, discarded);
    merge_events(record, discarded)?;
    merge_purchases(record, discarded);
    merge_revenue(record, discarded);
    Ok(())
}

/// Folds every discarded profile into the canonical record, in group order.
pub fn merge_decision(decision: &mut MergeDecision) -> Result<(), EventMergeError> {
    let MergeDecision {
        canonical,
        discarded,
        ..
    } = decision;
    for profile in discarded.iter() {
        fold_discarded(canonical, profile)?;
    }
    Ok(())
}

/// Merges every decision on the rayon pool. Each decision is owned by exactly one task, and
/// the output keeps the input order.
pub fn merge_all(decisions: Vec<MergeDecision>) -> Result<Vec<MergeDecision>, PipelineError> {
    decisions
        .into_par_iter()
        .map(|mut decision| {
            merge_decision(&mut decision).map_err(|source| PipelineError::EventMerge {
                email: decision.email.clone(),
                source,
            })?;
            Ok(decision)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        select::SelectionRule,
        types::test_support::{event, profile, ts},
    };
    use serde_json::json;

    const EMAIL: &str = "a@example.com";

    fn decision(canonical: Profile, discarded: Vec<Profile>) -> MergeDecision {
        MergeDecision {
            email: EMAIL.to_string(),
            canonical: CanonicalRecord::new(canonical),
            discarded,
        }
    }

    fn with_events(mut p: Profile, events: Vec<CustomEvent>) -> Profile {
        p.custom_events = events;
        p
    }

    fn with_revenue(mut p: Profile, cents: i64) -> Profile {
        p.total_revenue = Decimal::new(cents, 2);
        p
    }

    #[test]
    fn test_build_decision_preserves_discarded_order() {
        let group = DuplicateGroup {
            email: EMAIL.to_string(),
            profiles: vec![
                profile("1", EMAIL),
                profile("2", EMAIL),
                profile("3", EMAIL),
                profile("4", EMAIL),
            ],
        };
        let d = build_decision(
            group,
            Selection {
                index: 2,
                rule: SelectionRule::First,
            },
        );

        assert_eq!(d.canonical.external_id(), "3");
        assert_eq!(d.discarded_ids().collect::<Vec<_>>(), vec!["1", "2", "4"]);
    }

    #[test]
    fn test_empty_discarded_is_noop() {
        let canonical = with_events(with_revenue(profile("c", EMAIL), 500), vec![event("x", 0, 1, 1)]);
        let mut d = decision(canonical.clone(), vec![]);

        merge_decision(&mut d).unwrap();

        assert_eq!(d.canonical, CanonicalRecord::new(canonical));
    }

    #[test]
    fn test_attribute_last_discarded_wins_and_canonical_keys_kept() {
        let mut canonical = profile("c", EMAIL);
        canonical
            .custom_attributes
            .insert("member_tier".to_string(), json!("first"));
        let mut d1 = profile("d1", EMAIL);
        d1.custom_attributes
            .insert("content.push".to_string(), json!(true));
        d1.custom_attributes
            .insert("member_tier".to_string(), json!("second"));
        let mut d2 = profile("d2", EMAIL);
        d2.custom_attributes
            .insert("content.push".to_string(), json!(false));

        let mut d = decision(canonical, vec![d1, d2]);
        merge_decision(&mut d).unwrap();

        assert_eq!(d.canonical.new_custom_attributes.len(), 1);
        assert_eq!(
            d.canonical.new_custom_attributes.get("content.push"),
            Some(&json!(false))
        );
        assert!(!d.canonical.new_custom_attributes.contains_key("member_tier"));
    }

    #[test]
    fn test_events_accumulate_across_discarded_profiles() {
        // Canonical has never seen the event, so the second profile merges into the first's
        let d1 = with_events(profile("d1", EMAIL), vec![event("Episode Watched", 10, 20, 2)]);
        let d2 = with_events(profile("d2", EMAIL), vec![event("Episode Watched", 0, 30, 5)]);

        let mut d = decision(profile("c", EMAIL), vec![d1, d2]);
        merge_decision(&mut d).unwrap();

        assert_eq!(
            d.canonical.new_custom_events["Episode Watched"],
            MergedEvent {
                name: "Episode Watched".to_string(),
                time: ts(0),
                last: ts(30),
                count: 7,
            }
        );
    }

    #[test]
    fn test_event_on_canonical_keeps_discarded_count_only() {
        let canonical = with_events(profile("c", EMAIL), vec![event("Episode Watched", 10, 20, 3)]);
        let d1 = with_events(profile("d1", EMAIL), vec![event("Episode Watched", 0, 30, 5)]);

        let mut d = decision(canonical, vec![d1]);
        merge_decision(&mut d).unwrap();

        // 5, not 3 + 5
        assert_eq!(
            d.canonical.new_custom_events["Episode Watched"],
            MergedEvent {
                name: "Episode Watched".to_string(),
                time: ts(0),
                last: ts(30),
                count: 5,
            }
        );
    }

    #[test]
    fn test_event_accumulated_takes_priority_over_canonical_original() {
        let canonical = with_events(profile("c", EMAIL), vec![event("e", 5, 6, 3)]);
        let d1 = with_events(profile("d1", EMAIL), vec![event("e", 10, 20, 2)]);
        let d2 = with_events(profile("d2", EMAIL), vec![event("e", 8, 9, 4)]);

        let mut d = decision(canonical, vec![d1, d2]);
        merge_decision(&mut d).unwrap();

        // d1 merges with the original (count 2), d2 then sums with that result
        let merged = &d.canonical.new_custom_events["e"];
        assert_eq!(merged.time, ts(5));
        assert_eq!(merged.last, ts(20));
        assert_eq!(merged.count, 6);
    }

    #[test]
    fn test_event_unknown_everywhere_is_copied() {
        let d1 = with_events(profile("d1", EMAIL), vec![event("signup", 1, 2, 1)]);
        let mut d = decision(profile("c", EMAIL), vec![d1]);
        merge_decision(&mut d).unwrap();

        assert_eq!(
            d.canonical.new_custom_events["signup"],
            MergedEvent {
                name: "signup".to_string(),
                time: ts(1),
                last: ts(2),
                count: 1,
            }
        );
    }

    #[test]
    fn test_merge_rejects_mismatched_names() {
        let existing = MergedEvent::from(&event("a", 0, 1, 1));
        let err = merge_existing(&existing, &event("b", 0, 1, 1)).unwrap_err();
        assert_eq!(
            err,
            EventMergeError::NameMismatch {
                existing: "a".to_string(),
                incoming: "b".to_string(),
            }
        );
        assert!(merge_new(&event("a", 0, 1, 1), &event("b", 0, 1, 1)).is_err());
    }

    #[test]
    fn test_count_overflow_is_an_error() {
        let d1 = with_events(profile("d1", EMAIL), vec![event("e", 0, 1, u64::MAX)]);
        let d2 = with_events(profile("d2", EMAIL), vec![event("e", 2, 3, 2)]);
        let mut d = decision(profile("c", EMAIL), vec![d1, d2]);

        let err = merge_decision(&mut d).unwrap_err();
        assert_eq!(
            err,
            EventMergeError::CountOverflow {
                name: "e".to_string()
            }
        );

        let result = merge_all(vec![decision(
            profile("c", EMAIL),
            vec![
                with_events(profile("d1", EMAIL), vec![event("e", 0, 1, u64::MAX)]),
                with_events(profile("d2", EMAIL), vec![event("e", 2, 3, 2)]),
            ],
        )]);
        assert!(matches!(
            result,
            Err(PipelineError::EventMerge { ref email, .. }) if email == EMAIL
        ));
    }

    #[test]
    fn test_purchases_appended_without_dedup() {
        let mut d1 = profile("d1", EMAIL);
        d1.purchases = vec![event("premium", 0, 1, 1), event("premium", 0, 1, 1)];
        let mut d2 = profile("d2", EMAIL);
        d2.purchases = vec![event("annual", 2, 3, 2)];

        let mut d = decision(profile("c", EMAIL), vec![d1, d2]);
        merge_decision(&mut d).unwrap();

        let products: Vec<_> = d
            .canonical
            .new_purchases
            .iter()
            .map(|p| p.product_id.as_str())
            .collect();
        assert_eq!(products, vec!["premium", "premium", "annual"]);
        assert!(d.canonical.new_purchases.iter().all(|p| p.currency == "USD"));
    }

    #[test]
    fn test_revenue_sums_positive_and_never_decreases() {
        let canonical = with_revenue(profile("c", EMAIL), 1000);
        let discarded = vec![
            with_revenue(profile("d1", EMAIL), 250),
            with_revenue(profile("d2", EMAIL), 0),
            with_revenue(profile("d3", EMAIL), 125),
        ];

        let mut record = CanonicalRecord::new(canonical);
        let mut previous = record.new_total_revenue;
        for p in &discarded {
            merge_revenue(&mut record, p);
            assert!(record.new_total_revenue >= previous);
            previous = record.new_total_revenue;
        }

        assert_eq!(record.new_total_revenue, Decimal::new(1375, 2));
    }

    #[test]
    fn test_merge_all_keeps_order() {
        let decisions: Vec<_> = (0..20)
            .map(|i| MergeDecision {
                email: format!("user{i}@example.com"),
                canonical: CanonicalRecord::new(profile(&format!("c{i}"), EMAIL)),
                discarded: vec![with_revenue(profile(&format!("d{i}"), EMAIL), i)],
            })
            .collect();

        let merged = merge_all(decisions).unwrap();

        for (i, d) in merged.iter().enumerate() {
            assert_eq!(d.email, format!("user{i}@example.com"));
            assert_eq!(d.canonical.new_total_revenue, Decimal::new(i as i64, 2));
        }
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::types::{DuplicateGroup, Profile};

/// The ranked predicates used to pick a canonical profile. Rules are tried in declaration
/// order against the whole group; the first rule any profile satisfies wins, and among the
/// profiles satisfying it the earliest in group order is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionRule {
    /// Matched identity, most recently used among matched profiles.
    MatchedMostRecent,
    /// Matched identity, most attributes among matched profiles.
    MatchedMostAttributes,
    /// Any matched identity.
    MatchedAny,
    /// No matched identity, most recently used among unmatched profiles.
    UnmatchedMostRecent,
    /// No matched identity, most attributes among unmatched profiles.
    UnmatchedMostAttributes,
    /// First profile in the group.
    First,
}

impl SelectionRule {
    pub const ALL: [SelectionRule; 6] = [
        SelectionRule::MatchedMostRecent,
        SelectionRule::MatchedMostAttributes,
        SelectionRule::MatchedAny,
        SelectionRule::UnmatchedMostRecent,
        SelectionRule::UnmatchedMostAttributes,
        SelectionRule::First,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionRule::MatchedMostRecent => "matched_most_recent",
            SelectionRule::MatchedMostAttributes => "matched_most_attributes",
            SelectionRule::MatchedAny => "matched_any",
            SelectionRule::UnmatchedMostRecent => "unmatched_most_recent",
            SelectionRule::UnmatchedMostAttributes => "unmatched_most_attributes",
            SelectionRule::First => "first",
        }
    }

    /// Whether `profile` satisfies this rule. `position` is the profile's index in the group.
    pub fn matches(&self, profile: &Profile, position: usize, stats: &GroupStats) -> bool {
        match self {
            SelectionRule::MatchedMostRecent => {
                profile.is_matched() && is_latest(profile.last_used, stats.matched_last_used)
            }
            SelectionRule::MatchedMostAttributes => {
                profile.is_matched() && Some(profile.attribute_count()) == stats.matched_attributes
            }
            SelectionRule::MatchedAny => profile.is_matched(),
            SelectionRule::UnmatchedMostRecent => {
                !profile.is_matched() && is_latest(profile.last_used, stats.unmatched_last_used)
            }
            SelectionRule::UnmatchedMostAttributes => {
                !profile.is_matched()
                    && Some(profile.attribute_count()) == stats.unmatched_attributes
            }
            SelectionRule::First => position == 0,
        }
    }
}

// A profile with no sessions is never "the most recent", even if nobody in its partition
// has sessions.
fn is_latest(last_used: Option<DateTime<Utc>>, max: Option<DateTime<Utc>>) -> bool {
    last_used.is_some() && last_used == max
}

/// Per-group maxima the rules compare against, split by whether the profile has a matched
/// identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupStats {
    pub matched_last_used: Option<DateTime<Utc>>,
    pub matched_attributes: Option<usize>,
    pub unmatched_last_used: Option<DateTime<Utc>>,
    pub unmatched_attributes: Option<usize>,
}

impl GroupStats {
    pub fn from_profiles(profiles: &[Profile]) -> Self {
        let (matched, unmatched): (Vec<&Profile>, Vec<&Profile>) =
            profiles.iter().partition(|p| p.is_matched());

        Self {
            matched_last_used: matched.iter().filter_map(|p| p.last_used).max(),
            matched_attributes: matched.iter().map(|p| p.attribute_count()).max(),
            unmatched_last_used: unmatched.iter().filter_map(|p| p.last_used).max(),
            unmatched_attributes: unmatched.iter().map(|p| p.attribute_count()).max(),
        }
    }
}

/// Which profile in a group was chosen, and by which rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub rule: SelectionRule,
}

/// Runs the rule cascade over one group. Only an empty group yields `None`.
pub fn select_canonical(group: &DuplicateGroup) -> Option<Selection> {
    let stats = GroupStats::from_profiles(&group.profiles);

    SelectionRule::ALL.iter().find_map(|rule| {
        group
            .profiles
            .iter()
            .enumerate()
            .position(|(i, p)| rule.matches(p, i, &stats))
            .map(|index| Selection { index, rule: *rule })
    })
}

/// Selects a canonical profile for every group, one rayon task per group. Groups without a
/// selection are simply absent from the result; the verifier catches them.
pub fn select_all(groups: &[DuplicateGroup]) -> HashMap<String, Selection> {
    groups
        .par_iter()
        .filter_map(|group| select_canonical(group).map(|s| (group.email.clone(), s)))
        .collect()
}

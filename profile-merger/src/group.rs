use std::collections::HashMap;

use crate::types::{DuplicateGroup, Profile};

/// Groups profiles by email and keeps only emails shared by two or more profiles.
///
/// Groups come out in the order their email was first seen, and profiles keep their input
/// order within a group. Profiles without an email can't collide with anything and are
/// dropped.
pub fn group_by_email(profiles: impl IntoIterator<Item = Profile>) -> Vec<DuplicateGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<DuplicateGroup> = Vec::new();

    for profile in profiles {
        if profile.email.is_empty() {
            continue;
        }
        match index.get(&profile.email) {
            Some(&i) => groups[i].profiles.push(profile),
            None => {
                index.insert(profile.email.clone(), groups.len());
                groups.push(DuplicateGroup {
                    email: profile.email.clone(),
                    profiles: vec![profile],
                });
            }
        }
    }

    groups.retain(|g| g.profiles.len() >= 2);
    groups
}

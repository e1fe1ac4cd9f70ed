use std::collections::HashMap;

use crate::{error::IncompleteSelectionError, select::Selection, types::DuplicateGroup};

/// Checks that every duplicate group received a canonical selection. Must run after all
/// selection work has finished and before anything is merged or sent.
pub fn verify_complete(
    groups: &[DuplicateGroup],
    selections: &HashMap<String, Selection>,
) -> Result<(), IncompleteSelectionError> {
    let missing: Vec<String> = groups
        .iter()
        .filter(|g| !selections.contains_key(&g.email))
        .map(|g| g.email.clone())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(IncompleteSelectionError { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{select::select_all, types::test_support::profile};

    #[test]
    fn test_complete_selection_passes() {
        let groups = vec![DuplicateGroup {
            email: "a@example.com".to_string(),
            profiles: vec![profile("1", "a@example.com"), profile("2", "a@example.com")],
        }];
        let selections = select_all(&groups);
        assert!(verify_complete(&groups, &selections).is_ok());
    }

    #[test]
    fn test_empty_group_is_reported() {
        let groups = vec![
            DuplicateGroup {
                email: "a@example.com".to_string(),
                profiles: vec![profile("1", "a@example.com"), profile("2", "a@example.com")],
            },
            DuplicateGroup {
                email: "broken@example.com".to_string(),
                profiles: vec![],
            },
        ];
        let selections = select_all(&groups);

        let err = verify_complete(&groups, &selections).unwrap_err();
        assert_eq!(err.missing, vec!["broken@example.com".to_string()]);
    }
}

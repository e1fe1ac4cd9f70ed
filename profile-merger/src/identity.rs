use std::{collections::HashSet, path::Path};

use crate::error::SourceError;

/// Read-only lookup of external ids known to the authoritative identity store.
pub trait IdentitySource: Send + Sync {
    /// Returns the matched identity for `external_id`, if the store knows it.
    fn lookup(&self, external_id: &str) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentitySource {
    known: HashSet<String>,
}

impl InMemoryIdentitySource {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Loads a newline-delimited list of external ids. Blank lines are ignored.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| SourceError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
        Ok(Self::new(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        ))
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

impl IdentitySource for InMemoryIdentitySource {
    fn lookup(&self, external_id: &str) -> Option<String> {
        self.known.get(external_id).cloned()
    }
}

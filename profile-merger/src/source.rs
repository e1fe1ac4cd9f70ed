use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    error::SourceError,
    identity::IdentitySource,
    types::{CustomEvent, Profile},
};

/// A profile record as exported by the CRM. Anything other than the ids may be missing or
/// null, in which case it is treated as empty.
#[derive(Debug, Clone, Deserialize)]
pub struct RawProfile {
    pub external_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_revenue: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub custom_attributes: HashMap<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub custom_events: Vec<RawEvent>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub purchases: Vec<RawEvent>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub apps: Vec<RawApp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub name: String,
    #[serde(alias = "first_seen")]
    pub first: DateTime<Utc>,
    #[serde(alias = "last_seen")]
    pub last: DateTime<Utc>,
    #[serde(default = "default_count")]
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawApp {
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

fn default_count() -> u64 {
    1
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<RawEvent> for CustomEvent {
    fn from(raw: RawEvent) -> Self {
        Self {
            name: raw.name,
            first_seen: raw.first,
            last_seen: raw.last,
            // A recorded event happened at least once
            count: raw.count.max(1),
        }
    }
}

impl RawProfile {
    pub fn into_profile(self, identities: &dyn IdentitySource) -> Profile {
        let matched_identity = identities.lookup(&self.external_id);
        let last_used = self.apps.iter().filter_map(|a| a.last_used).max();
        Profile {
            external_id: self.external_id,
            email: self.email,
            total_revenue: self.total_revenue.max(Decimal::ZERO),
            custom_attributes: self.custom_attributes,
            custom_events: self.custom_events.into_iter().map(Into::into).collect(),
            purchases: self.purchases.into_iter().map(Into::into).collect(),
            matched_identity,
            last_used,
        }
    }
}

/// Parses a JSON-lines document into profiles, skipping blank lines. `path` is only used
/// to label errors.
pub fn parse_profiles(
    path: &str,
    data: &str,
    identities: &dyn IdentitySource,
) -> Result<Vec<Profile>, SourceError> {
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<RawProfile>(line)
                .map(|raw| raw.into_profile(identities))
                .map_err(|source| SourceError::Parse {
                    path: path.to_string(),
                    line: index + 1,
                    source,
                })
        })
        .collect()
}

/// Reads profiles from a single JSON-lines file, or from every `.json`/`.jsonl` file in a
/// folder. Folder entries are read in name order so that runs over the same export are
/// deterministic.
pub struct ProfileSource {
    pub path: PathBuf,
}

impl ProfileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let read_err = |source| SourceError::Read {
            path: self.path.display().to_string(),
            source,
        };

        let metadata = tokio::fs::metadata(&self.path).await.map_err(read_err)?;
        if !metadata.is_dir() {
            return Ok(vec![self.path.clone()]);
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path).await.map_err(read_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let path = entry.path();
            if is_profile_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub async fn read_all(
        &self,
        identities: &dyn IdentitySource,
    ) -> Result<Vec<Profile>, SourceError> {
        let mut profiles = Vec::new();
        for file in self.files().await? {
            let label = file.display().to_string();
            let data = tokio::fs::read_to_string(&file)
                .await
                .map_err(|source| SourceError::Read {
                    path: label.clone(),
                    source,
                })?;
            let parsed = parse_profiles(&label, &data, identities)?;
            debug!("Read {} profiles from {}", parsed.len(), label);
            profiles.extend(parsed);
        }
        info!(
            "Read {} profiles from {}",
            profiles.len(),
            self.path.display()
        );
        Ok(profiles)
    }
}

fn is_profile_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("jsonl")
    )
}

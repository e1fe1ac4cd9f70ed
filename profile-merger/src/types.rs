use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

/// A behavioural event or purchase as recorded on a platform profile. Both share the
/// same shape: a name, the first and last time it was seen, and how many times.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u64,
}

pub type Purchase = CustomEvent;

/// One platform profile. Built once from the input stream and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub external_id: String,
    pub email: String,
    pub total_revenue: Decimal,
    pub custom_attributes: HashMap<String, Value>,
    pub custom_events: Vec<CustomEvent>,
    pub purchases: Vec<Purchase>,
    /// Present iff `external_id` was found in the identity source.
    pub matched_identity: Option<String>,
    /// Latest `last_used` across the profile's app sessions.
    pub last_used: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn is_matched(&self) -> bool {
        self.matched_identity.is_some()
    }

    pub fn attribute_count(&self) -> usize {
        self.custom_attributes.len()
    }

    pub fn event(&self, name: &str) -> Option<&CustomEvent> {
        self.custom_events.iter().find(|e| e.name == name)
    }
}

/// All profiles sharing one email, in input order. Always holds at least two profiles
/// when produced by the grouper.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub email: String,
    pub profiles: Vec<Profile>,
}

/// An event as it will be sent downstream: `time` is the first occurrence, `last` and
/// `count` travel in the properties object.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedEvent {
    pub name: String,
    pub time: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub count: u64,
}

impl From<&CustomEvent> for MergedEvent {
    fn from(event: &CustomEvent) -> Self {
        Self {
            name: event.name.clone(),
            time: event.first_seen,
            last: event.last_seen,
            count: event.count,
        }
    }
}

/// A discarded profile's purchase, reshaped for the purchase endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedPurchase {
    pub product_id: String,
    pub price: f64,
    pub currency: String,
    pub time: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub count: u64,
}

pub const PURCHASE_PRICE: f64 = 0.0;
pub const PURCHASE_CURRENCY: &str = "USD";

impl From<&Purchase> for MergedPurchase {
    fn from(purchase: &Purchase) -> Self {
        Self {
            product_id: purchase.name.clone(),
            price: PURCHASE_PRICE,
            currency: PURCHASE_CURRENCY.to_string(),
            time: purchase.first_seen,
            last: purchase.last_seen,
            count: purchase.count,
        }
    }
}

/// The profile that survives a duplicate group, together with everything folded into it
/// from the discarded profiles. The accumulators are only ever written by the merge stage.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub profile: Profile,
    pub new_custom_attributes: BTreeMap<String, Value>,
    pub new_custom_events: BTreeMap<String, MergedEvent>,
    pub new_purchases: Vec<MergedPurchase>,
    pub new_total_revenue: Decimal,
}

impl CanonicalRecord {
    pub fn new(profile: Profile) -> Self {
        let new_total_revenue = profile.total_revenue;
        Self {
            profile,
            new_custom_attributes: BTreeMap::new(),
            new_custom_events: BTreeMap::new(),
            new_purchases: Vec::new(),
            new_total_revenue,
        }
    }

    pub fn external_id(&self) -> &str {
        &self.profile.external_id
    }
}

/// The outcome of selection for one email: the canonical record and the profiles that
/// will be folded into it and then deleted, in group order.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeDecision {
    pub email: String,
    pub canonical: CanonicalRecord,
    pub discarded: Vec<Profile>,
}

impl MergeDecision {
    pub fn discarded_ids(&self) -> impl Iterator<Item = &str> {
        self.discarded.iter().map(|p| p.external_id.as_str())
    }
}

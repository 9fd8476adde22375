//! Personal access token views, reconstructed from a token's property bag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Property bag key under which PAT metadata is embedded.
pub const PAT_PROPERTY: &str = "PAT";

/// Caller-supplied metadata embedded in a PAT at issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PersonalAccessTokenMinimum {
    #[serde(default, alias = "name")]
    pub name: String,
    #[serde(default, alias = "description")]
    pub description: String,
}

impl PersonalAccessTokenMinimum {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// JSON form stored in the `PAT` claim.
    pub fn to_claim_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode the `PAT` entry of a raw property bag.
    ///
    /// Fails when the bag is not a JSON object, has no `PAT` entry, or the
    /// entry is not shaped like PAT metadata.
    pub fn from_properties(properties: &str) -> Result<Self, serde_json::Error> {
        let mut bag: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(properties)?;
        let value = bag.remove(PAT_PROPERTY).ok_or_else(|| {
            <serde_json::Error as serde::de::Error>::missing_field(PAT_PROPERTY)
        })?;
        serde_json::from_value(value)
    }
}

/// Listing view of a PAT. Not persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalAccessToken {
    pub name: String,
    pub description: String,
    pub tenant_id: i64,
    pub user_id: i64,
    pub token_id: String,
    pub token_expiry: Option<DateTime<Utc>>,
}

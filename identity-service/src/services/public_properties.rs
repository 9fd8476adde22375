//! Writes a ticket's public properties into the token response.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::models::ticket::PublicPropertyType;

/// Copy type-tagged items (`name#integer` etc.) into `response` as typed
/// JSON values under their bare name. Untagged keys are not public and are
/// ignored.
pub fn apply_public_properties(items: &BTreeMap<String, String>, response: &mut Map<String, Value>) {
    for (key, raw) in items {
        let Some((name, tag)) = key.find('#').map(|at| key.split_at(at)) else {
            continue;
        };
        let Some(property_type) = PublicPropertyType::from_tag(tag) else {
            continue;
        };

        let value = match property_type {
            PublicPropertyType::Boolean => raw.to_ascii_lowercase().parse::<bool>().ok().map(Value::Bool),
            PublicPropertyType::Integer => raw.parse::<i64>().ok().map(Value::from),
            PublicPropertyType::String => Some(Value::String(raw.clone())),
        };

        match value {
            Some(value) => {
                response.insert(name.to_string(), value);
            }
            None => tracing::warn!(property = name, value = %raw, "Skipping unparsable public property"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TicketProperties;

    #[test]
    fn test_ticket_properties_reach_the_response_typed() {
        let properties = TicketProperties {
            refresh_lifetime_seconds: 1209600,
            user_id: "12".to_string(),
            tenant_id: 7,
            is_support_admin: false,
            is_tenant_admin: true,
            language_code: Some("en-us".to_string()),
        };

        let mut response = Map::new();
        apply_public_properties(&properties.to_public_items(), &mut response);

        assert_eq!(response["refresh_expires_in"], Value::from(1209600));
        assert_eq!(response["tenantId"], Value::from(7));
        assert_eq!(response["isTenantAdmin"], Value::Bool(true));
        assert_eq!(response["isSupportAdmin"], Value::Bool(false));
        assert_eq!(response["languageCode"], Value::from("en-us"));
    }

    #[test]
    fn test_untagged_and_malformed_items_are_skipped() {
        let mut items = BTreeMap::new();
        items.insert("internal".to_string(), "secret".to_string());
        items.insert("count#integer".to_string(), "seven".to_string());
        items.insert("flag#float".to_string(), "1.0".to_string());
        items.insert("ok#boolean".to_string(), "True".to_string());

        let mut response = Map::new();
        apply_public_properties(&items, &mut response);

        assert_eq!(response.len(), 1);
        assert_eq!(response["ok"], Value::Bool(true));
    }
}

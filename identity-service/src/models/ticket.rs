//! Ticket model - the in-memory bundle of claims and properties that the
//! transport signs into a bearer token.

use chrono::Duration;
use std::collections::BTreeMap;

/// Claim types emitted on principals.
pub mod claim_types {
    pub const SUBJECT: &str = "sub";
    pub const USER_ID: &str = "id";
    pub const NAME: &str = "name";
    pub const TENANT_ID: &str = "tenantId";
    pub const LANGUAGE_CODE: &str = "languageCode";
    pub const IS_ADMINISTRATOR: &str = "isadministrator";
    pub const IS_TENANT_ADMINISTRATOR: &str = "istenantadministrator";
    pub const SECURITY_STAMP: &str = "security_stamp";
    pub const PAT: &str = "PAT";
}

/// OAuth scopes requested by the flows.
pub mod scopes {
    pub const OFFLINE_ACCESS: &str = "offline_access";
    pub const ROLES: &str = "roles";
}

/// Names of the public ticket properties before type tagging.
pub mod property_names {
    pub const REFRESH_TOKEN_EXPIRES_IN: &str = "refresh_expires_in";
    pub const IS_SUPPORT_ADMIN: &str = "isSupportAdmin";
    pub const IS_TENANT_ADMIN: &str = "isTenantAdmin";
}

/// Scheme marker attached to every ticket issued by the engine.
pub const AUTHENTICATION_SCHEME: &str = "identity.server";

/// Where a claim may be copied when the ticket is turned into tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    AccessToken,
    IdentityToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
    pub destinations: Vec<Destination>,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
            destinations: Vec::new(),
        }
    }

    pub fn set_destinations(&mut self, destinations: &[Destination]) {
        self.destinations = destinations.to_vec();
    }

    pub fn has_destination(&self, destination: Destination) -> bool {
        self.destinations.contains(&destination)
    }
}

/// Authenticated principal: claims plus OAuth-level grants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Principal {
    claims: Vec<Claim>,
    scopes: Vec<String>,
    resources: Vec<String>,
    access_token_lifetime: Option<Duration>,
}

impl Principal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claims(claims: Vec<Claim>) -> Self {
        Self {
            claims,
            ..Self::default()
        }
    }

    pub fn add_claim(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    pub fn add_claims(&mut self, claims: impl IntoIterator<Item = Claim>) {
        self.claims.extend(claims);
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    pub fn claims_mut(&mut self) -> &mut [Claim] {
        &mut self.claims
    }

    /// Value of the first claim of `claim_type`, if any.
    pub fn find_claim(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    pub fn set_scopes<I, S>(&mut self, scopes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn set_resources<I, S>(&mut self, resources: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn set_access_token_lifetime(&mut self, lifetime: Duration) {
        self.access_token_lifetime = Some(lifetime);
    }

    pub fn access_token_lifetime(&self) -> Option<Duration> {
        self.access_token_lifetime
    }
}

/// Type tag appended to a public property name so the transport can
/// reconstruct the typed value from a flat string map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicPropertyType {
    Boolean,
    Integer,
    String,
}

impl PublicPropertyType {
    pub fn tag(&self) -> &'static str {
        match self {
            PublicPropertyType::Boolean => "#boolean",
            PublicPropertyType::Integer => "#integer",
            PublicPropertyType::String => "#string",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "#boolean" => Some(PublicPropertyType::Boolean),
            "#integer" => Some(PublicPropertyType::Integer),
            "#string" => Some(PublicPropertyType::String),
            _ => None,
        }
    }

    /// `name` with this type's tag appended.
    pub fn key(&self, name: &str) -> String {
        format!("{}{}", name, self.tag())
    }
}

/// Non-identity metadata carried beside the principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketProperties {
    pub refresh_lifetime_seconds: i64,
    pub user_id: String,
    pub tenant_id: i64,
    pub is_support_admin: bool,
    pub is_tenant_admin: bool,
    pub language_code: Option<String>,
}

impl TicketProperties {
    /// Flatten into the transport's type-tagged string map.
    pub fn to_public_items(&self) -> BTreeMap<String, String> {
        let mut items = BTreeMap::new();
        items.insert(
            PublicPropertyType::Integer.key(property_names::REFRESH_TOKEN_EXPIRES_IN),
            self.refresh_lifetime_seconds.to_string(),
        );
        items.insert(
            PublicPropertyType::String.key(claim_types::USER_ID),
            self.user_id.clone(),
        );
        items.insert(
            PublicPropertyType::Integer.key(claim_types::TENANT_ID),
            self.tenant_id.to_string(),
        );
        items.insert(
            PublicPropertyType::Boolean.key(property_names::IS_SUPPORT_ADMIN),
            self.is_support_admin.to_string(),
        );
        items.insert(
            PublicPropertyType::Boolean.key(property_names::IS_TENANT_ADMIN),
            self.is_tenant_admin.to_string(),
        );
        if let Some(language_code) = &self.language_code {
            items.insert(
                PublicPropertyType::String.key(claim_types::LANGUAGE_CODE),
                language_code.clone(),
            );
        }
        items
    }
}

/// Principal + properties handed to the transport for signing.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub principal: Principal,
    pub properties: TicketProperties,
    pub authentication_scheme: String,
}

impl Ticket {
    /// Claims that will be embedded in the issued access token.
    pub fn access_token_claims(&self) -> impl Iterator<Item = &Claim> {
        self.principal
            .claims()
            .iter()
            .filter(|c| c.has_destination(Destination::AccessToken))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties() -> TicketProperties {
        TicketProperties {
            refresh_lifetime_seconds: 1_209_600,
            user_id: "12".to_string(),
            tenant_id: 7,
            is_support_admin: false,
            is_tenant_admin: true,
            language_code: None,
        }
    }

    #[test]
    fn test_public_items_are_type_tagged() {
        let items = properties().to_public_items();

        assert_eq!(items.get("refresh_expires_in#integer").map(String::as_str), Some("1209600"));
        assert_eq!(items.get("id#string").map(String::as_str), Some("12"));
        assert_eq!(items.get("tenantId#integer").map(String::as_str), Some("7"));
        assert_eq!(items.get("isSupportAdmin#boolean").map(String::as_str), Some("false"));
        assert_eq!(items.get("isTenantAdmin#boolean").map(String::as_str), Some("true"));
        assert!(!items.contains_key("languageCode#string"));
    }

    #[test]
    fn test_language_code_only_when_present() {
        let mut props = properties();
        props.language_code = Some("en-gb".to_string());

        let items = props.to_public_items();
        assert_eq!(items.get("languageCode#string").map(String::as_str), Some("en-gb"));
    }

    #[test]
    fn test_principal_claim_lookup_and_scopes() {
        let mut principal = Principal::new();
        principal.add_claim(Claim::new(claim_types::TENANT_ID, "7"));
        principal.set_scopes([scopes::ROLES]);

        assert_eq!(principal.find_claim(claim_types::TENANT_ID), Some("7"));
        assert_eq!(principal.find_claim(claim_types::NAME), None);
        assert!(principal.has_scope(scopes::ROLES));
        assert!(!principal.has_scope(scopes::OFFLINE_ACCESS));
    }

    #[test]
    fn test_tag_round_trip() {
        for ty in [
            PublicPropertyType::Boolean,
            PublicPropertyType::Integer,
            PublicPropertyType::String,
        ] {
            assert_eq!(PublicPropertyType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(PublicPropertyType::from_tag("#float"), None);
    }
}

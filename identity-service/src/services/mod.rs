//! Services layer for the identity service.
//!
//! The grant flows, ticket assembly, the tenant-aware token store and the
//! personal access token service, plus the collaborators they run against.

pub mod authenticate;
pub mod claims;
pub mod credentials;
mod database;
pub mod directory;
pub mod error;
mod memory_token_store;
pub mod password_token;
pub mod personal_access_token;
pub mod public_properties;
pub mod sign_in;
pub mod ticket_factory;
pub mod token_store;
pub mod two_factor;

pub use authenticate::AuthenticationEngine;
pub use claims::ClaimsBuilder;
pub use credentials::{CredentialVerifier, PasswordCheck, PasswordCredentialVerifier};
pub use database::{Database, DatabaseSession};
pub use directory::{
    InMemoryTenantDirectory, InMemoryUserDirectory, TenantDirectory, UnitOfWork, UserDirectory,
};
pub use error::ServiceError;
pub use memory_token_store::{Collation, InMemoryTokenStore};
pub use password_token::PasswordTokenIssuer;
pub use personal_access_token::PersonalAccessTokenService;
pub use public_properties::apply_public_properties;
pub use sign_in::{DirectorySignInPolicy, SignInPolicy};
pub use ticket_factory::{TicketFactory, TicketLifetime};
pub use token_store::{
    BaseTokenStore, MemoryTokenCache, TenantAwareTokenStore, TokenCache, TokenStoreOptions,
};
pub use two_factor::{AuthenticatorKey, TwoFactorService};

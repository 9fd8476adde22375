pub mod authentication;
pub mod personal_access_token;
pub mod tenant;
pub mod ticket;
pub mod token;
pub mod user;

pub use authentication::{
    AuthErrorCode, AuthenticationError, AuthenticationResult, TokenRequest, TwoFactorChallenge,
};
pub use personal_access_token::{PersonalAccessToken, PersonalAccessTokenMinimum};
pub use tenant::{Tenant, TenantState};
pub use ticket::{Claim, Destination, Principal, Ticket, TicketProperties};
pub use token::{Application, Token, TokenDescriptor, TokenStatus, TokenType};
pub use user::User;

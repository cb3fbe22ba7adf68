mod anonymous;
pub mod claims;
mod jwt;

pub use anonymous::{AnonymousClient, STAT_CUSTOMIZED_ROLE_COUNT};
pub use jwt::{AUTH_QUERY_PARAM_NAME, JWT_MODULE, JwtClient};

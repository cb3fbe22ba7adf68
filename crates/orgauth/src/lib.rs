#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::large_enum_variant,
    clippy::missing_errors_doc
)]
#![forbid(unsafe_code)]
mod config;
pub mod implementations;
pub mod service;

pub use config::{AnonymousConfig, AuthnConfig, JwtConfig, OrgRoleMapping};
pub use orgauth_ext::{ErrorModel, ErrorResponse};
pub use service::{
    Identity, Namespace, NamespacedId, OrgId, OrgRole, Request, UserId,
    authn::{AuthnChain, AuthnService, AuthnServices},
};

pub use async_trait;
pub use tokio;
pub use tokio_util::sync::CancellationToken;
pub use tracing;

#[cfg(test)]
mod tests;

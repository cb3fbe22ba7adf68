use std::fmt::Debug;

use async_trait::async_trait;

use super::{
    Identity, Namespace, NamespacedId, OrgId, Request,
    error::{AuthenticateError, AuthnError, ResolveIdentityError, SyncError},
};

mod chain;
pub mod clients;
mod service;

pub use chain::AuthnChain;
pub use service::{AuthnService, AuthnServices};

pub const CLIENT_ANONYMOUS: &str = "auth.client.anonymous";
pub const CLIENT_JWT: &str = "auth.client.jwt";

/// One authentication mechanism.
///
/// Clients are stateless across requests apart from their injected services.
#[async_trait]
pub trait AuthnClient: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    /// Lower runs earlier.
    fn priority(&self) -> u32;

    /// Cheap applicability check. Must not perform verification or I/O.
    fn test(&self, request: &Request) -> bool;

    async fn authenticate(&self, request: &mut Request) -> Result<Identity, AuthenticateError>;
}

/// A client that can rebuild an identity of its namespace from a stored reference.
#[async_trait]
pub trait IdentityResolverClient: AuthnClient {
    fn namespace(&self) -> Namespace;

    async fn resolve_identity(
        &self,
        org_id: OrgId,
        id: &NamespacedId,
    ) -> Result<Identity, ResolveIdentityError>;
}

/// Runs after a successful authentication and may amend the identity.
/// A failing hook fails the authentication.
#[async_trait]
pub trait PostAuthHook: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn priority(&self) -> u32;

    async fn run(&self, identity: &mut Identity, request: &Request) -> Result<(), SyncError>;
}

/// Runs after every authentication attempt, successful or not.
#[async_trait]
pub trait PostLoginHook: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn priority(&self) -> u32;

    async fn run(&self, identity: Option<&Identity>, request: &Request, error: Option<&AuthnError>);
}

pub mod authn;
pub mod error;
mod identifier;
mod identity;
pub mod org_switch;
mod request;
mod role;
pub mod store;
pub mod sync;

pub use identifier::{Namespace, NamespacedId, OrgId, UserId};
pub use identity::{ActionScopes, ClientParams, Identity, LookupParams, Permissions};
pub use request::Request;
pub use role::OrgRole;
pub use store::{
    Claims, DeviceInfo, DeviceKind, DeviceStore, MembershipService, NewUser, Org, OrgDirectory,
    OrgMembership, PermissionStore, TokenVerificationError, TokenVerifier, User, UserDirectory,
};

/// Run `fut` unless the request is cancelled first.
///
/// Returns `None` on cancellation; the in-flight call is dropped.
pub(crate) async fn unless_cancelled<F>(request: &Request, fut: F) -> Option<F::Output>
where
    F: std::future::Future,
{
    tokio::select! {
        biased;
        () = request.cancellation_token().cancelled() => None,
        out = fut => Some(out),
    }
}

//! Post-authentication and post-login hooks that reconcile an identity with persisted state.

/// Await a service call, or log and `return $ret` if the request was cancelled first.
macro_rules! or_cancelled {
    ($request:expr, $fut:expr, $ret:expr) => {
        match $crate::service::unless_cancelled($request, $fut).await {
            Some(out) => out,
            None => {
                tracing::warn!(
                    request_id = %$request.request_id(),
                    "Request cancelled, stopping sync"
                );
                return $ret;
            }
        }
    };
}

mod org_sync;
mod user_sync;

pub use org_sync::{
    HOOK_SET_DEFAULT_ORG, HOOK_SYNC_ORG_ROLES, OrgSync, SetDefaultOrgHook, SyncOrgRolesHook,
};
pub use user_sync::{FetchSyncedUserHook, HOOK_FETCH_SYNCED_USER};

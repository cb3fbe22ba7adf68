use super::{
    Identity, Namespace, OrgId, Request, UserDirectory,
    error::OrganizationNotFound,
};

pub const ORG_ID_QUERY_PARAM: &str = "orgId";

/// Persist the organization requested through the `orgId` query parameter
/// as the active organization of the user.
///
/// Returns the new organization id, or `None` if nothing had to change.
/// The identity itself is left untouched.
pub async fn switch_org_from_query(
    request: &Request,
    identity: &Identity,
    users: &dyn UserDirectory,
) -> Result<Option<OrgId>, OrganizationNotFound> {
    let Some(raw) = request.query_param(ORG_ID_QUERY_PARAM) else {
        return Ok(None);
    };
    let Ok(org_id) = raw.parse::<OrgId>() else {
        tracing::debug!(org_id = raw, "Ignoring non-numeric organization switch");
        return Ok(None);
    };
    if org_id == OrgId::GLOBAL || org_id == identity.org_id {
        return Ok(None);
    }

    let Some(user_id) = identity
        .id
        .as_ref()
        .filter(|id| id.is_namespace(Namespace::User))
        .and_then(|id| id.user_id().ok())
    else {
        return Ok(None);
    };

    users
        .set_active_org(user_id, org_id)
        .await
        .map_err(|e| {
            tracing::debug!(%user_id, %org_id, error = %e, "Failed to switch organization");
            OrganizationNotFound::by_id(org_id).append_detail(e.to_string())
        })?;

    Ok(Some(org_id))
}

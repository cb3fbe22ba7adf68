use std::{
    error::Error as StdError,
    fmt::{Display, Formatter},
};

use http::StatusCode;
use orgauth_ext::ErrorModel;

use super::{NamespacedId, OrgId};

macro_rules! impl_error_stack_methods {
    ($error_type:ty) => {
        impl $error_type {
            #[must_use]
            pub fn append_details(mut self, details: impl IntoIterator<Item = String>) -> Self {
                self.stack.extend(details);
                self
            }

            #[must_use]
            pub fn append_detail(mut self, detail: impl Into<String>) -> Self {
                self.stack.push(detail.into());
                self
            }

            pub fn append_details_mut(&mut self, details: impl IntoIterator<Item = String>) {
                self.stack.extend(details);
            }

            pub fn append_detail_mut(&mut self, detail: impl Into<String>) {
                self.stack.push(detail.into());
            }
        }
    };
}

macro_rules! impl_from_with_detail {
    ($from_type:ty => $to_type:ident::$variant:ident, $detail:expr) => {
        impl From<$from_type> for $to_type {
            fn from(err: $from_type) -> Self {
                $to_type::$variant(err.append_detail($detail))
            }
        }
    };
}

/// Defines a fully transparent error enum with automatic conversion implementations.
///
/// This macro generates:
/// - An enum with all variants marked as `#[error(transparent)]`
/// - `impl_from_with_detail!` for each variant to add stack context
/// - `kind()` delegating to the wrapped error
/// - `From<ErrorType> for ErrorModel` that delegates to variant conversions
macro_rules! define_transparent_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $error_name:ident,
        stack_message: $stack_msg:expr,
        variants: [
            $($variant:ident),* $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(thiserror::Error, Debug)]
        $vis enum $error_name {
            $(
                #[error(transparent)]
                $variant($variant),
            )*
        }

        pastey::paste! {
            const [<$error_name:snake:upper _STACK>]: &str = $stack_msg;

            $(
                impl_from_with_detail!($variant => $error_name::$variant, [<$error_name:snake:upper _STACK>]);
            )*

            impl $error_name {
                #[must_use]
                pub fn append_detail(mut self, detail: impl Into<String>) -> Self {
                    match &mut self {
                        $(
                            $error_name::$variant(e) => {
                                e.append_detail_mut(detail);
                            }
                        )*
                    }
                    self
                }

                pub fn append_detail_mut(&mut self, detail: impl Into<String>) -> &mut Self {
                    match self {
                        $(
                            $error_name::$variant(e) => {
                                e.append_detail_mut(detail);
                            }
                        )*
                    }
                    self
                }

                #[must_use]
                pub fn kind(&self) -> ErrorKind {
                    match self {
                        $(
                            $error_name::$variant(e) => e.kind(),
                        )*
                    }
                }
            }

            impl From<$error_name> for ErrorModel {
                fn from(err: $error_name) -> Self {
                    match err {
                        $(
                            $error_name::$variant(e) => e.into(),
                        )*
                    }
                }
            }
        }
    };
}

macro_rules! define_simple_error {
    ($error_name:ident, $error_message:literal, $kind:ident) => {
        #[derive(thiserror::Error, Debug, PartialEq)]
        #[error($error_message)]
        pub struct $error_name {
            pub stack: Vec<String>,
        }

        impl Default for $error_name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $error_name {
            #[must_use]
            pub fn new() -> Self {
                Self { stack: Vec::new() }
            }

            #[must_use]
            pub fn kind(&self) -> ErrorKind {
                ErrorKind::$kind
            }
        }

        impl_error_stack_methods!($error_name);

        impl From<$error_name> for ErrorModel {
            fn from(err: $error_name) -> Self {
                let message = err.to_string();
                error_model(err.kind(), message, err.stack, None)
            }
        }
    };
}

/// Stable, machine-readable classification of every error the pipeline can raise.
///
/// The kebab-case rendering is used as the `type` of the resulting [`ErrorModel`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    strum_macros::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NoApplicableClient,
    InvalidToken,
    MissingClaim,
    InvalidClaim,
    InvalidRole,
    InvalidOrganization,
    InvalidIdentifier,
    DeviceLimit,
    OrganizationNotFound,
    UserNotFound,
    LastOrgAdmin,
    BackendUnavailable,
    InvalidConfiguration,
}

impl ErrorKind {
    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::NoApplicableClient
            | ErrorKind::InvalidToken
            | ErrorKind::MissingClaim
            | ErrorKind::InvalidClaim
            | ErrorKind::InvalidOrganization
            | ErrorKind::InvalidIdentifier
            | ErrorKind::DeviceLimit
            | ErrorKind::UserNotFound => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidRole => StatusCode::FORBIDDEN,
            ErrorKind::OrganizationNotFound => StatusCode::NOT_FOUND,
            ErrorKind::LastOrgAdmin => StatusCode::CONFLICT,
            ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::InvalidConfiguration => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn error_model(
    kind: ErrorKind,
    message: String,
    stack: Vec<String>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
) -> ErrorModel {
    ErrorModel::new(message, kind.to_string(), kind.status_code(), source).append_details(stack)
}

pub(crate) fn error_chain_fmt(
    e: &(dyn StdError + 'static),
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }
    Ok(())
}

// ------------- Backend -------------

/// A collaborating service (membership, directory, device store...) failed.
#[derive(Debug)]
pub struct BackendError {
    pub stack: Vec<String>,
    pub source: Box<dyn StdError + Send + Sync + 'static>,
}

impl_error_stack_methods!(BackendError);

impl PartialEq for BackendError {
    fn eq(&self, other: &Self) -> bool {
        self.stack == other.stack && self.source.to_string() == other.source.to_string()
    }
}

impl BackendError {
    pub fn new<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            stack: Vec::new(),
            source: Box::new(source),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::new(InternalErrorMessage(message.into()))
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BackendUnavailable
    }
}

impl StdError for BackendError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source as &(dyn StdError + 'static))
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Backend error: {}", self.source)?;

        if !self.stack.is_empty() {
            writeln!(f, "Stack:")?;
            for detail in &self.stack {
                writeln!(f, "  {detail}")?;
            }
        }

        if let Some(source) = self.source.source() {
            writeln!(f, "Caused by:")?;
            error_chain_fmt(source, f)?;
        }

        Ok(())
    }
}

impl From<BackendError> for ErrorModel {
    fn from(err: BackendError) -> Self {
        let BackendError { stack, source } = err;
        error_model(
            ErrorKind::BackendUnavailable,
            format!("Backend unavailable: {source}"),
            stack,
            Some(source),
        )
    }
}

#[derive(thiserror::Error, PartialEq, Debug)]
#[error("{0}")]
pub struct InternalErrorMessage(pub String);

// ------------- Leaf errors -------------

define_simple_error!(
    NoApplicableClient,
    "No enabled authentication client accepted the request",
    NoApplicableClient
);
define_simple_error!(
    DeviceLimitReached,
    "Anonymous device limit reached",
    DeviceLimit
);

#[derive(thiserror::Error, Debug)]
#[error("Failed to verify token")]
pub struct InvalidToken {
    pub stack: Vec<String>,
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}
impl_error_stack_methods!(InvalidToken);

impl InvalidToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            source: None,
        }
    }

    pub fn with_source<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            stack: Vec::new(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidToken
    }
}

impl Default for InvalidToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<InvalidToken> for ErrorModel {
    fn from(err: InvalidToken) -> Self {
        let message = err.to_string();
        let InvalidToken { stack, source } = err;
        error_model(ErrorKind::InvalidToken, message, stack, source)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("Missing mandatory claim `{claim}`")]
pub struct MissingClaim {
    pub claim: String,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(MissingClaim);

impl MissingClaim {
    pub fn new(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::MissingClaim
    }
}

impl From<MissingClaim> for ErrorModel {
    fn from(err: MissingClaim) -> Self {
        let message = err.to_string();
        error_model(err.kind(), message, err.stack, None)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("Claim at `{path}` is invalid: {reason}")]
pub struct InvalidClaim {
    pub path: String,
    pub reason: String,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(InvalidClaim);

impl InvalidClaim {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidClaim
    }
}

impl From<InvalidClaim> for ErrorModel {
    fn from(err: InvalidClaim) -> Self {
        let message = err.to_string();
        error_model(err.kind(), message, err.stack, None)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("No valid organization role could be extracted from `{path}`")]
pub struct InvalidRole {
    pub path: String,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(InvalidRole);

impl InvalidRole {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidRole
    }
}

impl From<InvalidRole> for ErrorModel {
    fn from(err: InvalidRole) -> Self {
        let message = err.to_string();
        error_model(err.kind(), message, err.stack, None)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("Identity cannot authenticate in organization {requested}, expected organization {expected}")]
pub struct InvalidOrganization {
    pub requested: OrgId,
    pub expected: OrgId,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(InvalidOrganization);

impl InvalidOrganization {
    #[must_use]
    pub fn new(requested: OrgId, expected: OrgId) -> Self {
        Self {
            requested,
            expected,
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidOrganization
    }
}

impl From<InvalidOrganization> for ErrorModel {
    fn from(err: InvalidOrganization) -> Self {
        let message = err.to_string();
        error_model(err.kind(), message, err.stack, None)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("Invalid identifier `{id}`: {reason}")]
pub struct InvalidIdentifier {
    pub id: String,
    pub reason: String,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(InvalidIdentifier);

impl InvalidIdentifier {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn unexpected(id: &NamespacedId) -> Self {
        Self::new(id.to_string(), "identifier is not known to this client")
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidIdentifier
    }
}

impl From<InvalidIdentifier> for ErrorModel {
    fn from(err: InvalidIdentifier) -> Self {
        let message = err.to_string();
        error_model(err.kind(), message, err.stack, None)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("Organization {org} not found")]
pub struct OrganizationNotFound {
    pub org: String,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(OrganizationNotFound);

impl OrganizationNotFound {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            org: format!("`{}`", name.into()),
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn by_id(id: OrgId) -> Self {
        Self {
            org: format!("with id {id}"),
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::OrganizationNotFound
    }
}

impl From<OrganizationNotFound> for ErrorModel {
    fn from(err: OrganizationNotFound) -> Self {
        let message = err.to_string();
        error_model(err.kind(), message, err.stack, None)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("No user matches the lookup parameters of `{auth_id}`")]
pub struct UserNotFound {
    pub auth_id: String,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(UserNotFound);

impl UserNotFound {
    pub fn new(auth_id: impl Into<String>) -> Self {
        Self {
            auth_id: auth_id.into(),
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UserNotFound
    }
}

impl From<UserNotFound> for ErrorModel {
    fn from(err: UserNotFound) -> Self {
        let message = err.to_string();
        error_model(err.kind(), message, err.stack, None)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("Cannot remove the last admin of organization {org_id}")]
pub struct LastOrgAdmin {
    pub org_id: OrgId,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(LastOrgAdmin);

impl LastOrgAdmin {
    #[must_use]
    pub fn new(org_id: OrgId) -> Self {
        Self {
            org_id,
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::LastOrgAdmin
    }
}

impl From<LastOrgAdmin> for ErrorModel {
    fn from(err: LastOrgAdmin) -> Self {
        let message = err.to_string();
        error_model(err.kind(), message, err.stack, None)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("Invalid configuration for `{setting}`: {reason}")]
pub struct InvalidConfiguration {
    pub setting: String,
    pub reason: String,
    pub stack: Vec<String>,
}
impl_error_stack_methods!(InvalidConfiguration);

impl InvalidConfiguration {
    pub fn new(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            setting: setting.into(),
            reason: reason.into(),
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidConfiguration
    }
}

impl From<InvalidConfiguration> for ErrorModel {
    fn from(err: InvalidConfiguration) -> Self {
        let message = err.to_string();
        error_model(err.kind(), message, err.stack, None)
    }
}

// ------------- Composite errors -------------

define_transparent_error! {
    pub enum AuthenticateError,
    stack_message: "Error authenticating request",
    variants: [
        NoApplicableClient,
        InvalidToken,
        MissingClaim,
        InvalidClaim,
        InvalidRole,
        DeviceLimitReached,
        OrganizationNotFound,
        BackendError,
    ]
}

define_transparent_error! {
    pub enum ResolveIdentityError,
    stack_message: "Error resolving identity",
    variants: [
        InvalidOrganization,
        InvalidIdentifier,
        OrganizationNotFound,
        BackendError,
    ]
}

define_transparent_error! {
    pub enum OrgLookupError,
    stack_message: "Error looking up organization",
    variants: [
        OrganizationNotFound,
        BackendError,
    ]
}

define_transparent_error! {
    pub enum AddMembershipError,
    stack_message: "Error adding organization membership",
    variants: [
        OrganizationNotFound,
        BackendError,
    ]
}

define_transparent_error! {
    pub enum RemoveMembershipError,
    stack_message: "Error removing organization membership",
    variants: [
        LastOrgAdmin,
        BackendError,
    ]
}

define_transparent_error! {
    pub enum TagDeviceError,
    stack_message: "Error tagging device",
    variants: [
        DeviceLimitReached,
        BackendError,
    ]
}

define_transparent_error! {
    pub enum SyncError,
    stack_message: "Error synchronizing identity",
    variants: [
        UserNotFound,
        OrganizationNotFound,
        BackendError,
    ]
}

define_transparent_error! {
    pub enum AuthnError,
    stack_message: "Authentication failed",
    variants: [
        AuthenticateError,
        SyncError,
    ]
}

impl From<OrgLookupError> for AuthenticateError {
    fn from(err: OrgLookupError) -> Self {
        match err {
            OrgLookupError::OrganizationNotFound(e) => e.into(),
            OrgLookupError::BackendError(e) => e.into(),
        }
    }
}

impl From<OrgLookupError> for ResolveIdentityError {
    fn from(err: OrgLookupError) -> Self {
        match err {
            OrgLookupError::OrganizationNotFound(e) => e.into(),
            OrgLookupError::BackendError(e) => e.into(),
        }
    }
}

impl From<AddMembershipError> for SyncError {
    fn from(err: AddMembershipError) -> Self {
        match err {
            AddMembershipError::OrganizationNotFound(e) => e.into(),
            AddMembershipError::BackendError(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_error_kind_renders_kebab_case() {
        assert_eq!(ErrorKind::DeviceLimit.to_string(), "device-limit");
        assert_eq!(
            ErrorKind::NoApplicableClient.to_string(),
            "no-applicable-client"
        );
        assert_eq!(
            ErrorKind::from_str("last-org-admin").unwrap(),
            ErrorKind::LastOrgAdmin
        );
    }

    #[test]
    fn test_transparent_error_appends_stack_and_keeps_kind() {
        let err: AuthenticateError = MissingClaim::new("sub").into();
        let err = err.append_detail("while running client `auth.client.jwt`");
        assert_eq!(err.kind(), ErrorKind::MissingClaim);

        let model = ErrorModel::from(err);
        assert_eq!(model.r#type, "missing-claim");
        assert_eq!(model.code, 401);
        assert_eq!(
            model.stack,
            vec![
                "Error authenticating request".to_string(),
                "while running client `auth.client.jwt`".to_string()
            ]
        );
    }

    #[test]
    fn test_nested_transparent_error_delegates_kind() {
        let err: AuthnError = SyncError::from(BackendError::message("database is gone")).into();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        let model = ErrorModel::from(err);
        assert_eq!(model.code, 503);
        assert!(model.message.contains("database is gone"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ErrorModel::from(InvalidRole::new("roles")).code,
            StatusCode::FORBIDDEN.as_u16()
        );
        assert_eq!(
            ErrorModel::from(OrganizationNotFound::by_name("Main Org.")).code,
            StatusCode::NOT_FOUND.as_u16()
        );
        assert_eq!(
            ErrorModel::from(LastOrgAdmin::new(OrgId::new(1))).code,
            StatusCode::CONFLICT.as_u16()
        );
    }
}

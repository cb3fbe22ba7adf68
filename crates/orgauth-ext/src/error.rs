use std::{
    error::Error as StdError,
    fmt::{Display, Formatter},
};

use http::StatusCode;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;
use valuable::Valuable;

fn error_chain_fmt(e: impl std::error::Error, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }
    Ok(())
}

/// Flattens an error and all of its sources into one line per cause.
#[must_use]
pub fn error_chain_vec(e: &(dyn std::error::Error + Send + Sync + 'static)) -> Vec<String> {
    let mut details = Vec::new();
    let mut current = Some(e as &(dyn std::error::Error + 'static));
    while let Some(cause) = current {
        details.push(format!("{cause}"));
        current = cause.source();
    }
    details
}

impl From<ErrorModel> for ErrorResponse {
    fn from(value: ErrorModel) -> Self {
        ErrorResponse { error: value }
    }
}

impl From<ErrorResponse> for ErrorModel {
    fn from(value: ErrorResponse) -> Self {
        value.error
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// JSON wrapper for all authentication error responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorModel,
}

/// JSON error payload with further details on an authentication failure
#[derive(Default, Debug, TypedBuilder, Serialize, Deserialize)]
pub struct ErrorModel {
    /// Human-readable error message
    #[builder(setter(into))]
    pub message: String,
    /// Stable machine-readable error kind, for example `invalid-organization`
    #[builder(setter(into))]
    pub r#type: String,
    /// HTTP response code
    pub code: u16,
    #[serde(skip)]
    #[builder(default)]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub stack: Vec<String>,
    #[serde(skip)]
    #[builder(default)]
    pub skip_log: bool,
    #[serde(skip)]
    #[builder(default=uuid::Uuid::now_v7())]
    pub error_id: Uuid,
}

impl StdError for ErrorModel {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl Display for ErrorModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} ({}): {}", self.r#type, self.code, self.message)?;

        if !self.stack.is_empty() {
            writeln!(f, "Stack:")?;
            for detail in &self.stack {
                writeln!(f, "  {detail}")?;
            }
        }

        if let Some(source) = self.source.as_ref() {
            writeln!(f, "Caused by:")?;
            error_chain_fmt(&**source, f)?;
        }

        Ok(())
    }
}

impl ErrorModel {
    pub fn new(
        message: impl Into<String>,
        r#type: impl Into<String>,
        code: StatusCode,
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self::builder()
            .message(message)
            .r#type(r#type)
            .code(code.as_u16())
            .source(source)
            .build()
    }

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
}

impl ErrorResponse {
    #[must_use]
    pub fn append_detail(mut self, detail: impl Into<String>) -> Self {
        self.error.stack.push(detail.into());
        self
    }
}

#[derive(Debug)]
struct TracedResponseError<'a> {
    r#type: &'a str,
    code: u16,
    message: &'a str,
    stack: &'a [String],
    error_id: String,
    source: &'a [String],
}

impl valuable::Valuable for TracedResponseError<'_> {
    fn as_value(&self) -> valuable::Value<'_> {
        valuable::Value::Mappable(self)
    }

    fn visit(&self, visit: &mut dyn valuable::Visit) {
        visit.visit_entry(
            valuable::Value::String("type"),
            valuable::Value::String(self.r#type),
        );
        visit.visit_entry(
            valuable::Value::String("code"),
            valuable::Value::U16(self.code),
        );
        visit.visit_entry(
            valuable::Value::String("message"),
            valuable::Value::String(self.message),
        );
        if !self.stack.is_empty() {
            visit.visit_entry(valuable::Value::String("stack"), self.stack.as_value());
        }
        visit.visit_entry(
            valuable::Value::String("error_id"),
            valuable::Value::String(&self.error_id),
        );
        if !self.source.is_empty() {
            visit.visit_entry(valuable::Value::String("source"), self.source.as_value());
        }
    }
}

impl valuable::Mappable for TracedResponseError<'_> {
    fn size_hint(&self) -> (usize, Option<usize>) {
        let mut len = 4; // type, code, message, error_id
        if !self.stack.is_empty() {
            len += 1;
        }
        if !self.source.is_empty() {
            len += 1;
        }
        (len, Some(len))
    }
}

impl ErrorModel {
    /// Emits the error as a structured event, at `error` level for 5xx codes and
    /// `info` otherwise. Does nothing when `skip_log` is set.
    pub fn trace(&self) {
        if self.skip_log {
            return;
        }
        let source = self
            .source
            .as_deref()
            .map(error_chain_vec)
            .unwrap_or_default();
        let traced_error = TracedResponseError {
            r#type: &self.r#type,
            code: self.code,
            message: &self.message,
            stack: &self.stack,
            error_id: self.error_id.to_string(),
            source: &source,
        };
        if self.code >= 500 {
            tracing::error!(
                event_source = "error_response",
                error = tracing::field::valuable(&traced_error.as_value()),
                "Internal authentication error"
            );
        } else {
            tracing::info!(
                event_source = "error_response",
                error = tracing::field::valuable(&traced_error.as_value()),
                "Authentication error"
            );
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ErrorModel {
    fn into_response(self) -> axum::http::Response<axum::body::Body> {
        ErrorResponse { error: self }.into_response()
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::http::Response<axum::body::Body> {
        let Self { error } = self;
        error.trace();
        let ErrorModel {
            message,
            r#type,
            code,
            source: _,
            stack,
            error_id,
            skip_log,
        } = error;

        // Hide the stack from callers for 5xx errors.
        let stack = if code >= 500 {
            vec![format!("Error ID: {error_id}")]
        } else {
            let mut stack = stack;
            stack.push(format!("Error ID: {error_id}"));
            stack
        };

        let mut response = axum::Json(ErrorResponse {
            error: ErrorModel {
                message,
                r#type,
                code,
                source: None,
                stack,
                error_id,
                skip_log,
            },
        })
        .into_response();

        *response.status_mut() = axum::http::StatusCode::from_u16(code)
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        response
    }
}

//! Wire-level error payloads shared by the `orgauth` crates.
//!
//! Every error raised by the authentication pipeline converts into an [`ErrorModel`]
//! whose `type` is the stable, machine-readable error kind and whose `code` is the
//! HTTP status a boundary layer should answer with.
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]

mod error;

pub use error::{ErrorModel, ErrorResponse, error_chain_vec};

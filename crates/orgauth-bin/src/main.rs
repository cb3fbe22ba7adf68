#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use orgauth::{
    AuthnConfig, AuthnService, AuthnServices, ErrorModel, ErrorResponse, OrgId, Request,
    implementations::{
        InMemoryDeviceStore, InMemoryDirectory, KeyFileVerifier, StaticTokenVerifier,
    },
    service::{TokenVerifier, org_switch::switch_org_from_query},
    tokio, tracing,
};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

mod config;
mod fixture;

pub(crate) use config::CONFIG_BIN;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate a synthetic request against fixture-seeded services
    Authenticate {
        #[clap(long, short, help = "JSON file with orgs, users, memberships and tokens.")]
        fixture: PathBuf,
        #[clap(
            long = "header",
            short = 'H',
            value_parser = parse_header,
            help = "Request header as `name=value`. May be repeated."
        )]
        headers: Vec<(HeaderName, HeaderValue)>,
        #[clap(long, short, default_value = "/", help = "Request path and query.")]
        url: Uri,
        #[clap(long, help = "Organization id hint of the request.")]
        org_id: Option<i64>,
    },
    /// Print the effective authentication configuration
    Config {},
    /// Print the version
    Version {},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_writer(std::io::stderr)
        .with_file(CONFIG_BIN.debug.extended_logs)
        .with_line_number(CONFIG_BIN.debug.extended_logs)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    match cli.command {
        Some(Commands::Authenticate {
            fixture,
            headers,
            url,
            org_id,
        }) => {
            authenticate(fixture, headers, &url, org_id.map(OrgId::new)).await?;
        }
        Some(Commands::Config {}) => {
            let mut config = AuthnConfig::load()?;
            if config.jwt.key_secret.is_some() {
                config.jwt.key_secret = Some("<redacted>".to_string());
            }
            print_json(&config)?;
        }
        Some(Commands::Version {}) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
        None => {
            eprintln!("No subcommand provided. Use --help for more information.");
            anyhow::bail!("No subcommand provided");
        }
    }

    Ok(())
}

fn parse_header(raw: &str) -> anyhow::Result<(HeaderName, HeaderValue)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected `name=value`, got `{raw}`"))?;
    Ok((
        HeaderName::try_from(name.trim())?,
        HeaderValue::try_from(value.trim())?,
    ))
}

#[derive(Debug, Serialize)]
struct AuthenticateOutput {
    identity: orgauth::Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    switched_org_id: Option<OrgId>,
    memberships: Vec<orgauth::service::OrgMembership>,
}

async fn authenticate(
    fixture: PathBuf,
    headers: Vec<(HeaderName, HeaderValue)>,
    url: &Uri,
    org_id: Option<OrgId>,
) -> anyhow::Result<()> {
    let config = Arc::new(AuthnConfig::load()?);
    let fixture = fixture::Fixture::load(&fixture)?;

    let verifier: Arc<dyn TokenVerifier> = match KeyFileVerifier::from_config(&config.jwt)? {
        Some(verifier) => Arc::new(verifier),
        None => Arc::new(StaticTokenVerifier::new(fixture.tokens)),
    };
    let directory = Arc::new(InMemoryDirectory::from_fixture(fixture.directory));
    let services = AuthnServices::builder()
        .memberships(directory.clone())
        .orgs(directory.clone())
        .users(directory.clone())
        .permissions(directory.clone())
        .verifier(verifier)
        .devices(Arc::new(InMemoryDeviceStore::new(
            config.anonymous.device_limit,
        )))
        .build();
    let service = AuthnService::from_config(config, services)?;

    let headers = headers.into_iter().collect::<HeaderMap>();
    let mut request = Request::from_parts(Method::GET, url, headers);
    if let Some(org_id) = org_id {
        request = request.with_org_id(org_id);
    }

    let identity = match service.authenticate(&mut request).await {
        Ok(identity) => identity,
        Err(e) => {
            let kind = e.kind();
            print_json(&ErrorResponse::from(ErrorModel::from(e)))?;
            anyhow::bail!("Authentication failed: {kind}");
        }
    };
    tracing::info!(id = ?identity.id, org_id = %identity.org_id, "Request authenticated");

    let switched_org_id = switch_org_from_query(&request, &identity, directory.as_ref()).await?;

    print_json(&AuthenticateOutput {
        identity,
        switched_org_id,
        memberships: directory.memberships().await,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = if CONFIG_BIN.debug.pretty_output {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}

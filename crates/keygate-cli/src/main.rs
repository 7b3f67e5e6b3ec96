//! Keygate CLI entrypoint.
//!
//! A bare invocation runs the full broker state machine and prints exactly
//! one credential-process JSON document on stdout; everything human-facing,
//! including logs, goes to stderr so the output protocol stays pure.

use clap::Parser;
use console::style;
use keygate_cache::{CredentialCache, CredentialStore, KeyringStore, SessionFileStore};
use keygate_core::{BrokerConfig, Error, ProfileConfig, Result, StorageBackend};
use tracing_subscriber::EnvFilter;

mod broker;


use broker::Broker;

#[derive(Parser)]
#[command(name = "keygate")]
#[command(author, version, about = "OIDC credential broker for AWS", long_about = None)]
struct Cli {
    /// Configuration profile to use.
    #[arg(short, long)]
    profile: Option<String>,

    /// Cache backend override: keyring or session.
    #[arg(long)]
    storage: Option<String>,

    /// Invalidate the cached credential and exit.
    #[arg(long)]
    clear_cache: bool,

    /// Exit 0 if the cached credential is still valid, 1 otherwise.
    #[arg(long, conflicts_with = "clear_cache")]
    check_expiration: bool,

    /// Re-authenticate only when the cache is stale (session backend only).
    #[arg(long, conflicts_with_all = ["clear_cache", "check_expiration"])]
    refresh_if_needed: bool,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_env("KEYGATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{} {err}", style("✗").red());
            std::process::exit(err.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = BrokerConfig::load()?;
    let profile_name = resolve_profile_name(
        cli.profile.as_deref(),
        std::env::var("KEYGATE_PROFILE").ok().as_deref(),
        &config,
    );
    let profile = config.profile(&profile_name)?.clone();
    let backend = resolve_storage(
        cli.storage.as_deref(),
        std::env::var("KEYGATE_STORAGE").ok().as_deref(),
        &profile,
    )?;
    let cache = build_cache(backend, &profile_name)?;

    if cli.clear_cache {
        cache.invalidate()?;
        eprintln!(
            "{} Cached credential for profile '{profile_name}' invalidated",
            style("✓").green()
        );
        return Ok(0);
    }

    if cli.check_expiration {
        return Ok(if cache.read().is_some() {
            eprintln!("{} Cached credential is still valid", style("✓").green());
            0
        } else {
            eprintln!("{} No valid cached credential", style("!").yellow());
            1
        });
    }

    if cli.refresh_if_needed && backend == StorageBackend::Keyring {
        return Err(Error::ConfigInvalid(
            "--refresh-if-needed only makes sense with --storage session; \
the keyring has no out-of-band readers to pre-warm"
                .to_string(),
        ));
    }

    let broker = Broker::from_profile(profile, cache)?;
    if cli.refresh_if_needed && broker.cache_is_warm() {
        return Ok(0);
    }

    let document = broker.credentials().await?;
    println!("{}", document.to_json());
    Ok(0)
}

/// Profile precedence: flag, env var, the file's default, literal `default`.
fn resolve_profile_name(flag: Option<&str>, env: Option<&str>, config: &BrokerConfig) -> String {
    config.select_profile(flag.or(env)).to_string()
}

/// Backend precedence: flag, env var, the profile's own setting.
fn resolve_storage(
    flag: Option<&str>,
    env: Option<&str>,
    profile: &ProfileConfig,
) -> Result<StorageBackend> {
    match flag.or(env) {
        Some(value) => value.parse(),
        None => Ok(profile.credential_storage),
    }
}

fn build_cache(backend: StorageBackend, profile_name: &str) -> Result<CredentialCache> {
    let store: Box<dyn CredentialStore> = match backend {
        StorageBackend::Keyring => Box::new(KeyringStore::new(profile_name)?),
        StorageBackend::Session => Box::new(SessionFileStore::new(profile_name)?),
    };
    Ok(CredentialCache::new(store))
}

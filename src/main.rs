use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vaultauth::config::{DatastoreTarget, DEFAULT_SECRET_LENGTH, VAULT_RESOURCE};
use vaultauth::{
    read_secret, CredentialResolver, KeyVaultClient, ResolverConfig, RotationConfig,
    RotationSchedule, SecretRotator, SqlServerAdmin, VaultConfig,
};

/// Resolve credentials, read vault secrets and rotate datastore passwords.
#[derive(Debug, Parser)]
#[command(name = "vaultauth", version)]
struct Cli {
    /// Tenant to request tokens from
    #[arg(long, global = true, env = "AZURE_TENANT_ID")]
    tenant: Option<String>,

    /// Per-source attempt timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    source_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a credential and report which source and principal were used
    Token {
        /// Resource to request a token for
        #[arg(long, default_value = VAULT_RESOURCE)]
        resource: String,
    },
    /// Read a secret from a vault
    GetSecret {
        /// Vault name
        #[arg(long, env = "VAULT_NAME")]
        vault: String,
        /// Secret name
        name: String,
        /// Print the secret value
        #[arg(long)]
        reveal: bool,
    },
    /// Rotate a SQL server administrator password into a vault
    Rotate(RotateArgs),
}

#[derive(Debug, Args)]
struct RotateArgs {
    /// Subscription id (GUID) that owns the SQL server
    #[arg(long, env = "ROTATION_SUBSCRIPTION_ID")]
    subscription: String,
    /// Resource group of the SQL server
    #[arg(long, env = "ROTATION_RESOURCE_GROUP")]
    resource_group: String,
    /// SQL server whose administrator password is replaced
    #[arg(long, env = "ROTATION_SERVER_NAME")]
    server: String,
    /// Vault that receives the new password
    #[arg(long, env = "ROTATION_VAULT_NAME")]
    vault: String,
    /// Secret name the new password is written to
    #[arg(long, env = "ROTATION_SECRET_NAME")]
    secret: String,
    /// Generated password length
    #[arg(long, env = "ROTATION_SECRET_LENGTH", default_value_t = DEFAULT_SECRET_LENGTH)]
    length: usize,
    /// Seconds between scheduled runs
    #[arg(long, env = "ROTATION_INTERVAL_SECS", default_value_t = 86_400)]
    interval_secs: u64,
    /// Run once and exit instead of running on a schedule
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut resolver_config = ResolverConfig::from_env()
        .context("invalid credential configuration")?
        .with_source_timeout(Duration::from_secs(cli.source_timeout));
    if let Some(tenant) = cli.tenant {
        resolver_config = resolver_config.with_tenant(tenant);
    }
    let resolver = CredentialResolver::new(resolver_config)?;

    match cli.command {
        Command::Token { resource } => {
            let credential = resolver.resolve(&resource).await?;
            println!("{}", credential.describe());
            println!("expires: {}", credential.token.expires_on().to_rfc3339());
        }
        Command::GetSecret { vault, name, reveal } => {
            let store = KeyVaultClient::new(&VaultConfig::new(vault))?;
            let lookup = read_secret(&resolver, &store, &name).await?;
            eprintln!("read {} as {}", name, lookup.describe());
            if reveal {
                println!("{}", lookup.secret.value.expose_secret());
            } else if let Some(version) = &lookup.secret.version {
                println!("version: {version}");
            }
        }
        Command::Rotate(args) => rotate(resolver, args).await?,
    }

    Ok(())
}

async fn rotate(resolver: CredentialResolver, args: RotateArgs) -> anyhow::Result<()> {
    let config = RotationConfig::new(
        DatastoreTarget::new(args.subscription, args.resource_group, args.server),
        VaultConfig::new(args.vault),
        args.secret,
    )
    .with_length(args.length)
    .with_interval(Duration::from_secs(args.interval_secs));

    let vault = KeyVaultClient::new(&config.vault)?;
    let rotator = Arc::new(SecretRotator::new(
        config,
        Arc::new(resolver),
        Arc::new(SqlServerAdmin::new()?),
        Arc::new(vault),
    )?);

    if args.once {
        let outcome = rotator.rotate().await.context("rotation failed")?;
        println!(
            "rotated {} on {} (version {})",
            outcome.secret_name,
            outcome.server_name,
            outcome.version.as_deref().unwrap_or("unknown")
        );
        return Ok(());
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown requested");
    };

    let report = RotationSchedule::new(rotator).run_until(shutdown).await;
    if report.partial > 0 {
        anyhow::bail!(
            "{} rotation(s) may have left the datastore and vault out of sync",
            report.partial
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rotate_arguments_are_documented() {
        let cli = Cli::command();
        let rotate = cli.find_subcommand("rotate").unwrap();
        for arg in rotate.get_arguments().filter(|a| a.get_id() != "help") {
            assert!(arg.get_help().is_some(), "--{} has no help text", arg.get_id());
        }
    }
}

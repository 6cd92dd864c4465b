//! Credential chain example.
//!
//! Demonstrates how the resolver walks its sources in priority order, skips
//! the ones that are unavailable, and reports every failure when none works.
//!
//! Run with: cargo run --example credential_chain

use secrecy::ExposeSecret;
use std::time::Duration;
use vaultauth::mock::{CallLog, MockSource, MockVault, StaticCredential};
use vaultauth::source::{CredentialSource, SourceKind};
use vaultauth::{read_secret, CredentialResolver, PrincipalKind};

#[tokio::main]
async fn main() -> vaultauth::Result<()> {
    println!("=== Credential Chain Example ===\n");

    // 1. A developer machine: no managed identity, IDE session expired,
    //    `az` signed in.
    println!("1. Resolving on a developer machine...");
    let log = CallLog::default();
    let sources: Vec<Box<dyn CredentialSource>> = vec![
        Box::new(MockSource::unavailable(
            SourceKind::ManagedIdentity,
            "no identity endpoint",
            log.clone(),
        )),
        Box::new(MockSource::failing(
            SourceKind::DeveloperToolSession,
            "session expired",
            log.clone(),
        )),
        Box::new(MockSource::succeeding(SourceKind::CliSession, log.clone())),
        Box::new(MockSource::succeeding(SourceKind::IntegratedAuth, log.clone())),
    ];
    let resolver = CredentialResolver::with_sources(sources, Duration::from_secs(5));

    let credential = resolver.resolve("https://vault.azure.net").await?;
    println!("   ✓ Authenticated as {}", credential.describe());
    println!("   Availability checked: {:?}", log.availability_checks());
    println!("   Mechanisms invoked:   {:?}\n", log.attempts());

    // 2. Nothing works: every source contributes a reason.
    println!("2. Resolving where no source works...");
    let log = CallLog::default();
    let sources: Vec<Box<dyn CredentialSource>> = SourceKind::ORDERED
        .iter()
        .map(|kind| {
            Box::new(MockSource::unavailable(*kind, "not configured", log.clone()))
                as Box<dyn CredentialSource>
        })
        .collect();
    let resolver = CredentialResolver::with_sources(sources, Duration::from_secs(5));

    match resolver.resolve("https://vault.azure.net").await {
        Ok(credential) => println!("   Unexpectedly authenticated as {}", credential.describe()),
        Err(e) => {
            println!("   ✗ {e}");
            for failure in e.source_failures().unwrap_or_default() {
                println!("     - {failure}");
            }
        }
    }
    println!();

    // 3. Reading a secret reports which principal was used.
    println!("3. Reading a secret...");
    let credential = StaticCredential::new(SourceKind::ManagedIdentity, PrincipalKind::App);
    let vault = MockVault::new();
    vault.set_item("db-password", "hunter2").await;

    let lookup = read_secret(&credential, &vault, "db-password").await?;
    println!(
        "   ✓ Read {} characters as {}",
        lookup.secret.value.expose_secret().len(),
        lookup.describe()
    );

    println!("\n=== Example Complete ===");
    Ok(())
}

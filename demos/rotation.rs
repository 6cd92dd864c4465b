//! Secret rotation example.
//!
//! Demonstrates a rotation run against in-memory doubles: the datastore gets
//! a fresh password first, then the vault records it. A vault failure after
//! the datastore change is reported as a partial rotation.
//!
//! Run with: cargo run --example rotation

use std::sync::Arc;
use vaultauth::mock::{MockDatastore, MockVault, StaticCredential};
use vaultauth::source::SourceKind;
use vaultauth::{
    DatastoreTarget, PrincipalKind, RotationConfig, SecretRotator, VaultConfig, VaultauthError,
};

#[tokio::main]
async fn main() -> vaultauth::Result<()> {
    println!("=== Secret Rotation Example ===\n");

    let credential = Arc::new(StaticCredential::new(
        SourceKind::ManagedIdentity,
        PrincipalKind::App,
    ));
    let datastore = Arc::new(MockDatastore::new());
    let vault = Arc::new(MockVault::new());
    vault.set_item("sql-admin-password", "initial").await;

    let config = RotationConfig::new(
        DatastoreTarget::new("6f1e3a52-9c1b-4d8e-a0f7-2b5c8d9e1f30", "rg-data", "sql-prod"),
        VaultConfig::new("contoso-kv"),
        "sql-admin-password",
    )
    .with_length(24);
    let rotator = SecretRotator::new(config, credential, datastore.clone(), vault.clone())?;

    // 1. A normal run
    println!("1. Rotating...");
    let outcome = rotator.rotate().await?;
    println!(
        "   ✓ Rotated {} on {} (run {})",
        outcome.secret_name, outcome.server_name, outcome.run_id
    );
    println!("   Vault versions: {}", vault.versions("sql-admin-password").await);
    println!(
        "   Datastore and vault agree: {}\n",
        datastore.password().await == vault.current("sql-admin-password").await
    );

    // 2. The vault write fails after the datastore changed
    println!("2. Rotating while the vault is down...");
    vault.fail_next_set(VaultauthError::UnexpectedResponse {
        service: "vault".to_string(),
        status: 503,
        message: "service unavailable".to_string(),
    });
    match rotator.rotate().await {
        Ok(_) => println!("   Unexpected success"),
        Err(e) if e.is_partial() => println!("   ✗ Partial rotation, needs attention: {e}"),
        Err(e) => println!("   ✗ Rotation failed cleanly: {e}"),
    }

    println!("\n=== Example Complete ===");
    Ok(())
}

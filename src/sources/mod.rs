//! Credential source implementations, one per mechanism.
//!
//! The resolver builds them in priority order with [`default_sources`].

mod cli;
mod developer_tool;
mod integrated;
mod managed_identity;

pub use cli::AzureCliSource;
pub use developer_tool::DeveloperToolSource;
pub use integrated::IntegratedAuthSource;
pub use managed_identity::ManagedIdentitySource;

use crate::config::ResolverConfig;
use crate::source::CredentialSource;
use crate::Result;

/// Builds the four sources in fixed priority order.
///
/// When the configuration pins a single source (connection string), only
/// that source is returned.
pub fn default_sources(config: &ResolverConfig) -> Result<Vec<Box<dyn CredentialSource>>> {
    let http = crate::http::client()?;

    let sources: Vec<Box<dyn CredentialSource>> = vec![
        Box::new(ManagedIdentitySource::new(config, http.clone())),
        Box::new(DeveloperToolSource::new(config)),
        Box::new(AzureCliSource::new(config)),
        Box::new(IntegratedAuthSource::new(config, http)),
    ];

    Ok(match config.only {
        Some(kind) => sources.into_iter().filter(|s| s.kind() == kind).collect(),
        None => sources,
    })
}

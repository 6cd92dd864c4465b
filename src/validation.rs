//! Input validation for names that end up in URLs and for rotation alphabets.

use crate::{Result, VaultauthError};

/// Maximum length of a vault secret name.
const MAX_SECRET_NAME_LENGTH: usize = 127;

/// Maximum length of a SQL server name.
const MAX_SERVER_NAME_LENGTH: usize = 63;

/// Validates a vault secret name.
///
/// Secret names are 1-127 characters of ASCII letters, digits and hyphens.
/// Anything else would change the meaning of the request path.
///
/// # Errors
///
/// Returns [`VaultauthError::InvalidName`] if validation fails.
///
/// # Example
///
/// ```
/// use vaultauth::validation::validate_secret_name;
///
/// assert!(validate_secret_name("sql-admin-password").is_ok());
/// assert!(validate_secret_name("ApiKey2").is_ok());
///
/// assert!(validate_secret_name("").is_err());
/// assert!(validate_secret_name("../keys/master").is_err());
/// assert!(validate_secret_name("name?api-version=1").is_err());
/// ```
pub fn validate_secret_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VaultauthError::InvalidName(
            "secret name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_SECRET_NAME_LENGTH {
        return Err(VaultauthError::InvalidName(format!(
            "secret name exceeds maximum length of {} characters",
            MAX_SECRET_NAME_LENGTH
        )));
    }

    if let Some(c) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
        return Err(VaultauthError::InvalidName(format!(
            "secret name contains invalid character {c:?} (allowed: letters, digits, '-')"
        )));
    }

    Ok(())
}

/// Validates a vault name.
///
/// Vault names are 3-24 characters, start with a letter, end with a letter
/// or digit, and contain only letters, digits and non-consecutive hyphens.
pub fn validate_vault_name(name: &str) -> Result<()> {
    if !(3..=24).contains(&name.len()) {
        return Err(VaultauthError::InvalidName(format!(
            "vault name '{name}' must be 3-24 characters"
        )));
    }

    let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    let starts_ok = name.starts_with(|c: char| c.is_ascii_alphabetic());
    let ends_ok = name.ends_with(|c: char| c.is_ascii_alphanumeric());

    if !valid_chars || !starts_ok || !ends_ok || name.contains("--") {
        return Err(VaultauthError::InvalidName(format!(
            "vault name '{name}' must start with a letter, end with a letter or digit, \
             and contain only letters, digits and single hyphens"
        )));
    }

    Ok(())
}

/// Validates a SQL server name.
///
/// Server names are 1-63 lowercase letters, digits and hyphens, and cannot
/// start or end with a hyphen.
pub fn validate_server_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_SERVER_NAME_LENGTH {
        return Err(VaultauthError::InvalidName(format!(
            "server name '{name}' must be 1-{MAX_SERVER_NAME_LENGTH} characters"
        )));
    }

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if !valid_chars || name.starts_with('-') || name.ends_with('-') {
        return Err(VaultauthError::InvalidName(format!(
            "server name '{name}' may only contain lowercase letters, digits and inner hyphens"
        )));
    }

    Ok(())
}

/// Maximum length of a resource group name.
const MAX_RESOURCE_GROUP_LENGTH: usize = 90;

/// Validates a subscription id, which must be a GUID.
///
/// ```
/// use vaultauth::validation::validate_subscription_id;
///
/// assert!(validate_subscription_id("6f1e3a52-9c1b-4d8e-a0f7-2b5c8d9e1f30").is_ok());
/// assert!(validate_subscription_id("sub-1").is_err());
/// assert!(validate_subscription_id("6f1e3a52-9c1b-4d8e-a0f7-2b5c8d9e1f30/../x").is_err());
/// ```
pub fn validate_subscription_id(id: &str) -> Result<()> {
    let groups: Vec<&str> = id.split('-').collect();
    let lengths_ok = groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len);

    if !lengths_ok || !groups.iter().all(|g| g.chars().all(|c| c.is_ascii_hexdigit())) {
        return Err(VaultauthError::InvalidName(format!(
            "subscription id '{id}' is not a GUID"
        )));
    }

    Ok(())
}

/// Validates a resource group name.
///
/// Resource group names are 1-90 characters of letters, digits, `-`, `_`,
/// `.` and parentheses, and cannot end with a period.
pub fn validate_resource_group(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().count() > MAX_RESOURCE_GROUP_LENGTH {
        return Err(VaultauthError::InvalidName(format!(
            "resource group '{name}' must be 1-{MAX_RESOURCE_GROUP_LENGTH} characters"
        )));
    }

    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')')))
    {
        return Err(VaultauthError::InvalidName(format!(
            "resource group '{name}' contains invalid character {c:?}"
        )));
    }

    if name.ends_with('.') {
        return Err(VaultauthError::InvalidName(format!(
            "resource group '{name}' cannot end with a period"
        )));
    }

    Ok(())
}

/// Validates a secret generation alphabet.
///
/// The alphabet must be non-empty printable ASCII without spaces or
/// duplicates. A duplicate would make its character more likely than the
/// others.
pub fn validate_alphabet(alphabet: &str) -> Result<()> {
    if alphabet.is_empty() {
        return Err(VaultauthError::InvalidConfig(
            "alphabet cannot be empty".to_string(),
        ));
    }

    if let Some(c) = alphabet.chars().find(|c| !c.is_ascii_graphic()) {
        return Err(VaultauthError::InvalidConfig(format!(
            "alphabet contains non-printable or non-ASCII character {c:?}"
        )));
    }

    let mut seen = [false; 128];
    for b in alphabet.bytes() {
        if seen[b as usize] {
            return Err(VaultauthError::InvalidConfig(format!(
                "alphabet contains duplicate character {:?}",
                b as char
            )));
        }
        seen[b as usize] = true;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_secret_names() {
        assert!(validate_secret_name("my-secret").is_ok());
        assert!(validate_secret_name("API-KEY-123").is_ok());
        assert!(validate_secret_name(&"a".repeat(127)).is_ok());
    }

    #[test]
    fn test_secret_name_too_long() {
        let result = validate_secret_name(&"a".repeat(128));
        assert!(result.unwrap_err().to_string().contains("maximum length"));
    }

    #[test]
    fn test_secret_name_path_injection() {
        let bad = [
            "name/versions",
            "../other",
            "name?x=1",
            "name#frag",
            "name%2F",
            "name with space",
            "name_underscore",
            "name.dot",
        ];
        for name in bad {
            let result = validate_secret_name(name);
            assert!(result.is_err(), "Expected '{}' to fail validation", name);
            assert!(result.unwrap_err().to_string().contains("invalid character"));
        }
    }

    #[test]
    fn test_vault_names() {
        assert!(validate_vault_name("contoso-kv").is_ok());
        assert!(validate_vault_name("kv1").is_ok());

        assert!(validate_vault_name("kv").is_err());
        assert!(validate_vault_name("1kv").is_err());
        assert!(validate_vault_name("kv-").is_err());
        assert!(validate_vault_name("kv--one").is_err());
        assert!(validate_vault_name(&"k".repeat(25)).is_err());
        assert!(validate_vault_name("kv.evil.com").is_err());
    }

    #[test]
    fn test_server_names() {
        assert!(validate_server_name("sql-prod-01").is_ok());
        assert!(validate_server_name("SqlProd").is_err());
        assert!(validate_server_name("-sql").is_err());
        assert!(validate_server_name("").is_err());
    }

    #[test]
    fn test_subscription_ids() {
        assert!(validate_subscription_id("6F1E3A52-9C1B-4D8E-A0F7-2B5C8D9E1F30").is_ok());

        assert!(validate_subscription_id("").is_err());
        assert!(validate_subscription_id("6f1e3a52-9c1b-4d8e-a0f7").is_err());
        assert!(validate_subscription_id("6f1e3a52-9c1b-4d8e-a0f7-2b5c8d9e1f3z").is_err());
        assert!(validate_subscription_id("6f1e3a52-9c1b-4d8e-a0f7-2b5c8d9e1f30?x=1").is_err());
    }

    #[test]
    fn test_resource_groups() {
        assert!(validate_resource_group("rg-data").is_ok());
        assert!(validate_resource_group("Prod_Data.(eu)").is_ok());

        assert!(validate_resource_group("").is_err());
        assert!(validate_resource_group("rg.").is_err());
        assert!(validate_resource_group("rg/../../other").is_err());
        assert!(validate_resource_group("rg?api-version=1").is_err());
        assert!(validate_resource_group(&"r".repeat(91)).is_err());
    }

    #[test]
    fn test_alphabet() {
        assert!(validate_alphabet("abc123").is_ok());
        assert!(validate_alphabet("aab").unwrap_err().to_string().contains("duplicate"));
        assert!(validate_alphabet("ab c").is_err());
        assert!(validate_alphabet("abé").is_err());
    }
}

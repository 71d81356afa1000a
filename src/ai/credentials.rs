use keyring::Entry;
use tracing::debug;

use crate::error::{PortalError, Result};

const SERVICE_NAME: &str = "com.newsportal.app";

/// API keys for the generator, kept in the OS keychain
pub struct CredentialManager;

impl CredentialManager {
    /// Store an API key in the keychain
    pub fn store_api_key(provider: &str, api_key: &str) -> Result<()> {
        if api_key.trim().is_empty() {
            return Err(PortalError::Config("API key must not be empty".to_string()));
        }
        let entry = Entry::new(SERVICE_NAME, provider)?;
        entry.set_password(api_key.trim())?;
        debug!(provider, "stored API key in keychain");
        Ok(())
    }

    /// Get an API key from the keychain
    pub fn get_api_key(provider: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, provider)?;
        let key = entry.get_password()?;
        debug!(provider, "retrieved API key from keychain");
        Ok(key)
    }

    /// Delete an API key; a missing entry is not an error
    pub fn delete_api_key(provider: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, provider)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if an API key is configured
    pub fn has_api_key(provider: &str) -> bool {
        Self::get_api_key(provider).is_ok()
    }
}

//! Credential references resolved from the process environment.

use beacon_core::ports::SecretSource;
use beacon_core::secrets::SecretValue;

/// Looks each reference up as an environment variable of the same name.
/// Empty variables count as unset.
pub struct EnvSecretSource;

impl SecretSource for EnvSecretSource {
    fn resolve(&self, name: &str) -> Option<SecretValue> {
        std::env::var(name)
            .ok()
            .filter(|value| !value.is_empty())
            .map(SecretValue::new)
    }
}

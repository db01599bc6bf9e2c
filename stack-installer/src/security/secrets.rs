// Secret generation
//
// High-entropy opaque strings for the generated environment file. Values are drawn from
// the OS CSPRNG (ring's SystemRandom) and encoded URL-safe without padding so they can be
// pasted into key=value files without quoting.

use anyhow::Result;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;

use crate::security::crypto::secret_fingerprint;

const SECRET_BYTES: usize = 32;

/// Source of opaque secrets.
pub trait SecretSource: Send + Sync {
    fn generate(&self) -> Result<String>;
}

/// OS-backed secret source.
#[derive(Debug)]
pub struct SystemSecretSource {
    rng: SystemRandom,
}

impl Default for SystemSecretSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSecretSource {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl SecretSource for SystemSecretSource {
    fn generate(&self) -> Result<String> {
        let mut bytes = [0u8; SECRET_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate random secret"))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }
}

/// The five secrets written into a freshly created environment file.
///
/// Generated together, once, and never regenerated individually.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBundle {
    pub postgres_user_secret: String,
    pub postgres_admin_secret: String,
    pub app_secret_key: String,
    pub app_salt: String,
    pub initial_admin_secret: String,
}

impl SecretBundle {
    pub fn generate(source: &dyn SecretSource) -> Result<Self> {
        Ok(Self {
            postgres_user_secret: source.generate()?,
            postgres_admin_secret: source.generate()?,
            app_secret_key: source.generate()?,
            app_salt: source.generate()?,
            initial_admin_secret: source.generate()?,
        })
    }

    /// Look up a secret by its field name (as used in the placeholder table).
    pub fn get(&self, field: SecretField) -> &str {
        match field {
            SecretField::PostgresUser => &self.postgres_user_secret,
            SecretField::PostgresAdmin => &self.postgres_admin_secret,
            SecretField::AppSecretKey => &self.app_secret_key,
            SecretField::AppSalt => &self.app_salt,
            SecretField::InitialAdmin => &self.initial_admin_secret,
        }
    }
}

// Never print secret material through Debug.
impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBundle")
            .field("postgres_user_secret", &secret_fingerprint(&self.postgres_user_secret))
            .field("postgres_admin_secret", &secret_fingerprint(&self.postgres_admin_secret))
            .field("app_secret_key", &secret_fingerprint(&self.app_secret_key))
            .field("app_salt", &secret_fingerprint(&self.app_salt))
            .field("initial_admin_secret", &secret_fingerprint(&self.initial_admin_secret))
            .finish()
    }
}

/// Which member of a [`SecretBundle`] a placeholder receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretField {
    PostgresUser,
    PostgresAdmin,
    AppSecretKey,
    AppSalt,
    InitialAdmin,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn system_source_produces_distinct_urlsafe_values() {
        let src = SystemSecretSource::new();
        let mut seen = HashSet::new();
        for _ in 0..16 {
            let s = src.generate().unwrap();
            assert_eq!(s.len(), 43, "32 bytes base64url without padding");
            assert!(s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert!(seen.insert(s));
        }
    }

    #[test]
    fn bundle_members_are_independent() {
        let bundle = SecretBundle::generate(&SystemSecretSource::new()).unwrap();
        let all: HashSet<&str> = [
            bundle.get(SecretField::PostgresUser),
            bundle.get(SecretField::PostgresAdmin),
            bundle.get(SecretField::AppSecretKey),
            bundle.get(SecretField::AppSalt),
            bundle.get(SecretField::InitialAdmin),
        ]
        .into_iter()
        .collect();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let bundle = SecretBundle::generate(&SystemSecretSource::new()).unwrap();
        let dbg = format!("{:?}", bundle);
        assert!(!dbg.contains(&bundle.initial_admin_secret));
        assert!(!dbg.contains(&bundle.app_secret_key));
    }
}

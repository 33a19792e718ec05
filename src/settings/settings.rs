use anyhow::{Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

const ENV_PREFIX: &str = "MANGAHUB";
const SIGNING_KEY_ENV: &str = "JWT_SIGNING_KEY";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub auth: Auth,
    pub http: Http,
    pub log: Log,
    pub store: Store,
}

#[derive(Deserialize)]
pub struct Auth {
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub refresh_digest_key: Option<String>,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_access_ttl_secs")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_ttl_secs: u64,
    #[serde(default = "default_max_refresh_tokens")]
    pub max_refresh_tokens: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

// Secrets stay out of `info!(?settings)`.
impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field(
                "refresh_digest_key",
                &self.refresh_digest_key.as_ref().map(|_| "<redacted>"),
            )
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("max_refresh_tokens", &self.max_refresh_tokens)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .finish()
    }
}

impl Auth {
    /// `auth.jwt_secret`, else the `JWT_SIGNING_KEY` environment variable.
    pub fn signing_key(&self) -> Result<Vec<u8>> {
        let key = match &self.jwt_secret {
            Some(secret) => secret.clone(),
            None => std::env::var(SIGNING_KEY_ENV)
                .map_err(|_| anyhow!("no auth.jwt_secret and {SIGNING_KEY_ENV} is unset"))?,
        };
        if key.is_empty() {
            return Err(anyhow!("JWT signing key must not be empty"));
        }
        Ok(key.into_bytes())
    }

    /// Falls back to the signing key when no dedicated key is configured.
    pub fn digest_key(&self) -> Result<Vec<u8>> {
        match &self.refresh_digest_key {
            Some(key) if !key.is_empty() => Ok(key.clone().into_bytes()),
            _ => self.signing_key(),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub address: String,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
pub struct Store {
    pub backend: String, // "memory" or "mysql"
    #[serde(default)]
    pub mysql_dsn: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_issuer() -> String {
    "mangahub.auth".to_string()
}

fn default_audience() -> String {
    "mangahub-client".to_string()
}

fn default_access_ttl_secs() -> u64 {
    15 * 60
}

fn default_refresh_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_max_refresh_tokens() -> usize {
    crate::domain_model::DEFAULT_MAX_REFRESH_TOKENS
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_max_connections() -> u32 {
    10
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

impl Settings {
    fn validate(&self) -> Result<()> {
        let auth = &self.auth;
        for (key, value) in [
            ("auth.access_ttl_secs", auth.access_ttl_secs),
            ("auth.refresh_ttl_secs", auth.refresh_ttl_secs),
            ("auth.sweep_interval_secs", auth.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(anyhow!("{key} must be greater than zero"));
            }
        }
        if auth.max_refresh_tokens == 0 {
            return Err(anyhow!("auth.max_refresh_tokens must be greater than zero"));
        }
        Ok(())
    }
}

fn env_overrides() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__")
}

/// Read settings from `path` (or the build-profile default), then apply
/// `MANGAHUB__<SECTION>__<KEY>` environment overrides.
pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(env_overrides())
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    settings.validate()?;
    Ok(settings)
}

/// Parse settings from inline TOML. No environment overrides are applied.
pub fn parse_settings_str(toml: &str) -> Result<Settings> {
    let settings: Settings = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_profiles_parse() {
        for path in ["settings/dev.toml", "settings/release.toml"] {
            let raw = std::fs::read_to_string(path).unwrap();
            let settings = parse_settings_str(&raw).unwrap();
            assert_eq!(settings.auth.max_refresh_tokens, 5, "{path}");
            assert_eq!(settings.auth.access_ttl(), Duration::from_secs(900), "{path}");
        }
    }

    #[test]
    fn minimal_settings_take_defaults() {
        let settings = parse_settings_str(
            r#"
[auth]
jwt_secret = "s3cret"

[http]
address = "127.0.0.1:0"

[log]
filter = "debug"

[store]
backend = "memory"
"#,
        )
        .unwrap();

        assert_eq!(settings.auth.access_ttl_secs, 900);
        assert_eq!(settings.auth.refresh_ttl(), Duration::from_secs(604_800));
        assert_eq!(settings.auth.sweep_interval(), Duration::from_secs(3600));
        assert_eq!(settings.auth.signing_key().unwrap(), b"s3cret".to_vec());
        assert_eq!(settings.auth.digest_key().unwrap(), b"s3cret".to_vec());
        assert!(settings.http.cert_path.is_none());
        assert!(!settings.log.json);
        assert_eq!(settings.store.max_connections, 10);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let settings = parse_settings_str(
            r#"
[auth]
jwt_secret = "do-not-print"

[http]
address = "127.0.0.1:0"

[log]
filter = "info"

[store]
backend = "memory"
"#,
        )
        .unwrap();

        let printed = format!("{settings:?}");
        assert!(!printed.contains("do-not-print"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for (key, line) in [
            ("sweep_interval_secs", "sweep_interval_secs = 0"),
            ("access_ttl_secs", "access_ttl_secs = 0"),
            ("max_refresh_tokens", "max_refresh_tokens = 0"),
        ] {
            let raw = format!(
                r#"
[auth]
jwt_secret = "s3cret"
{line}

[http]
address = "127.0.0.1:0"

[log]
filter = "info"

[store]
backend = "memory"
"#
            );
            let err = parse_settings_str(&raw).unwrap_err();
            assert!(err.to_string().contains(key), "{err}");
        }
    }
}

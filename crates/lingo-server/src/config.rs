use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};

use lingo_api::state::{GuestPolicy, MAX_CREDENTIAL_TTL};

/// Secrets that ship in sample files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "changeme", "change-me", "secret", "password"];
const MIN_SECRET_LEN: usize = 16;

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub guest_jwt_secret: Option<String>,
    pub translate_api_url: String,
    pub translate_api_key: Option<String>,
    pub translate_model: String,
    pub translate_timeout: Duration,
    pub reaper_interval: Duration,
    pub sweep_token: Option<String>,
    pub policy: GuestPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `LINGO_` prefixes are part of the key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup: &lookup };

        let jwt_secret = vars
            .optional("LINGO_JWT_SECRET")
            .ok_or_else(|| anyhow!("LINGO_JWT_SECRET must be set"))?;
        check_secret("LINGO_JWT_SECRET", &jwt_secret)?;

        let guest_jwt_secret = vars.optional("LINGO_GUEST_JWT_SECRET");
        match &guest_jwt_secret {
            Some(secret) => {
                check_secret("LINGO_GUEST_JWT_SECRET", secret)?;
                if *secret == jwt_secret {
                    bail!("LINGO_GUEST_JWT_SECRET must differ from LINGO_JWT_SECRET");
                }
            }
            None => warn!("LINGO_GUEST_JWT_SECRET not set, guest flows are disabled"),
        }

        let translate_api_key = vars.optional("LINGO_TRANSLATE_API_KEY");
        if translate_api_key.is_none() {
            warn!("LINGO_TRANSLATE_API_KEY not set, cross-language translation is disabled");
        }

        let credential_minutes: i64 = vars.load("LINGO_GUEST_CREDENTIAL_TTL_MINUTES", "240")?;
        let credential_ttl = chrono::Duration::minutes(credential_minutes.max(1));
        if credential_ttl > MAX_CREDENTIAL_TTL {
            warn!("LINGO_GUEST_CREDENTIAL_TTL_MINUTES={} exceeds the 4 hour ceiling, clamping", credential_minutes);
        }

        let policy = GuestPolicy {
            credential_ttl: credential_ttl.min(MAX_CREDENTIAL_TTL),
            session_ttl: chrono::Duration::hours(vars.load("LINGO_GUEST_SESSION_TTL_HOURS", "24")?),
            chat_ttl: chrono::Duration::hours(vars.load("LINGO_EPHEMERAL_CHAT_TTL_HOURS", "24")?),
            qr_starts_per_minute: vars.load("LINGO_QR_RATE_LIMIT_PER_MINUTE", "5")?,
            accepts_per_minute: vars.load("LINGO_ACCEPT_RATE_LIMIT_PER_MINUTE", "20")?,
            reuse_guest_chats: vars.load("LINGO_REUSE_GUEST_CHATS", "true")?,
            public_base_url: vars
                .load::<String>("LINGO_PUBLIC_BASE_URL", "http://localhost:3000")?
                .trim_end_matches('/')
                .to_string(),
        };

        Ok(Self {
            host: vars.load("LINGO_HOST", "0.0.0.0")?,
            port: vars.load("LINGO_PORT", "3000")?,
            db_path: PathBuf::from(vars.load::<String>("LINGO_DB_PATH", "lingo.db")?),
            jwt_secret,
            guest_jwt_secret,
            translate_api_url: vars.load("LINGO_TRANSLATE_API_URL", "https://api.openai.com/v1")?,
            translate_api_key,
            translate_model: vars.load("LINGO_TRANSLATE_MODEL", "gpt-4o-mini")?,
            translate_timeout: Duration::from_secs(vars.load("LINGO_TRANSLATE_TIMEOUT_SECS", "15")?),
            reaper_interval: Duration::from_secs(vars.load::<u64>("LINGO_REAPER_INTERVAL_SECS", "900")?.max(1)),
            sweep_token: vars.optional("LINGO_SWEEP_TOKEN"),
            policy,
        })
    }
}

struct Vars<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Vars<'_> {
    /// Set and non-blank.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn load<T: FromStr>(&self, key: &str, default: &str) -> Result<T>
    where
        T::Err: Display,
    {
        let raw = self.optional(key).unwrap_or_else(|| {
            debug!("{key} not set, using default: {default}");
            default.to_string()
        });
        raw.parse()
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("invalid {key} value '{raw}'"))
    }
}

fn check_secret(key: &str, secret: &str) -> Result<()> {
    if PLACEHOLDER_SECRETS.contains(&secret.to_ascii_lowercase().as_str()) {
        bail!("{key} is a placeholder value, set a real secret");
    }
    if secret.len() < MIN_SECRET_LEN {
        bail!("{key} must be at least {MIN_SECRET_LEN} characters");
    }
    info!("{key} loaded");
    Ok(())
}

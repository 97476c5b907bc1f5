use std::{env, time::Duration};

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub public_base_url: String,
    pub backend_url: String,
    pub backend_timeout: Duration,
    pub db_path: String,
    pub static_dir: String,
    pub serve_frontend: bool,
    pub cors_allow_any: bool,
    pub cors_origins: Vec<String>,
    pub allowed_push_hosts: Vec<String>,
    pub vapid_public_key: String,
    pub vapid_private_key: String,
    pub vapid_subject: String,
    pub refresh_interval: Duration,
    pub test_notification_ttl: Duration,
    pub max_push_payload_bytes: usize,
    pub subscription_ttl_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup so it can be
    /// exercised without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:3000");
        let public_base_url = env_or("PUBLIC_BASE_URL", "http://localhost:3000");
        let backend_url = env_or("BACKEND_URL", "http://localhost:8001")
            .trim_end_matches('/')
            .to_string();
        let backend_timeout_ms: u64 = env_or_parse(&lookup, "BACKEND_TIMEOUT_MS", 10_000)?;
        let db_path = env_or("DB_PATH", "code_tracker.redb");
        let static_dir = env_or("STATIC_DIR", "frontend");
        let serve_frontend = env_or_parse(&lookup, "SERVE_FRONTEND", false)?;
        let cors_raw = env_or("CORS_ORIGINS", "http://localhost:3000");
        let (cors_allow_any, cors_origins) = parse_cors_origins(&cors_raw);
        // Host allowlist keeps subscriptions pointed at real push services.
        let allowed_push_hosts = parse_list(&env_or(
            "ALLOWED_PUSH_HOSTS",
            "fcm.googleapis.com,updates.push.services.mozilla.com,wns.windows.com,notify.windows.com,web.push.apple.com",
        ));
        let vapid_public_key =
            lookup("VAPID_PUBLIC_KEY").ok_or_else(|| anyhow::anyhow!("VAPID_PUBLIC_KEY is required"))?;
        let vapid_private_key = lookup("VAPID_PRIVATE_KEY")
            .ok_or_else(|| anyhow::anyhow!("VAPID_PRIVATE_KEY is required"))?;
        let vapid_subject = env_or("VAPID_SUBJECT", "mailto:admin@example.com");
        let refresh_interval_secs: u64 = env_or_parse(&lookup, "REFRESH_INTERVAL_SECS", 300)?;
        let test_notification_secs: u64 = env_or_parse(&lookup, "TEST_NOTIFICATION_SECS", 5)?;
        let max_push_payload_bytes = env_or_parse(&lookup, "MAX_PUSH_PAYLOAD_BYTES", 4096)?;
        let subscription_ttl_days = env_or_parse(&lookup, "SUBSCRIPTION_TTL_DAYS", 30)?;

        if refresh_interval_secs == 0 {
            anyhow::bail!("REFRESH_INTERVAL_SECS must be > 0");
        }
        if max_push_payload_bytes == 0 {
            anyhow::bail!("MAX_PUSH_PAYLOAD_BYTES must be > 0");
        }
        if !backend_url.starts_with("http://") && !backend_url.starts_with("https://") {
            anyhow::bail!("BACKEND_URL must be an http(s) URL");
        }

        Ok(Self {
            bind_addr,
            public_base_url,
            backend_url,
            backend_timeout: Duration::from_millis(backend_timeout_ms),
            db_path,
            static_dir,
            serve_frontend,
            cors_allow_any,
            cors_origins,
            allowed_push_hosts,
            vapid_public_key,
            vapid_private_key,
            vapid_subject,
            refresh_interval: Duration::from_secs(refresh_interval_secs),
            test_notification_ttl: Duration::from_secs(test_notification_secs),
            max_push_payload_bytes,
            subscription_ttl_days,
        })
    }
}

fn env_or_parse<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("{key} is invalid: {err}")),
        None => Ok(default),
    }
}

fn parse_cors_origins(value: &str) -> (bool, Vec<String>) {
    let origins = parse_list(value);

    if origins.iter().any(|item| item == "*") {
        (true, Vec::new())
    } else {
        (false, origins)
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

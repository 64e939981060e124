use anyhow::Context;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:5000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub assigner_webhook_url: Option<String>,
    pub public_base_url: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Blank values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let port = match get("PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("PORT must be a valid port number, got '{value}'"))?,
            None => DEFAULT_PORT,
        };
        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value.parse::<u32>().with_context(|| {
                format!("DATABASE_MAX_CONNECTIONS must be a positive integer, got '{value}'")
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            max_connections,
            assigner_webhook_url: get("ASSIGNER_WEBHOOK_URL"),
            public_base_url: get("PUBLIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string()),
            port,
        })
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }

    /// Address the external assigner calls back with the remedial task.
    pub fn callback_url(&self) -> String {
        format!(
            "{}/api/assign-intervention",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

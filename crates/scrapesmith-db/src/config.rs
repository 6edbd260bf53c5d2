use scrapesmith_core::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection pool settings for the build store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()).ok_or_else(|| {
            AppError::ConfigError("DATABASE_URL not set. Required for stored builds.".into())
        })?;

        let Some(raw) = lookup("DATABASE_MAX_CONNECTIONS") else {
            return Ok(Self::new(url));
        };
        let max_connections: u32 = raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
            ))
        })?;
        if max_connections == 0 {
            return Err(AppError::ConfigError(
                "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }

        Ok(Self::new(url).with_max_connections(max_connections))
    }
}

//! API configuration.

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Submissions are rejected with 503 while the general queue is
    /// deeper than this.
    pub queue_high_water: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8086,
            queue_high_water: 200,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            queue_high_water: std::env::var("QUEUE_HIGH_WATER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.queue_high_water),
        }
    }
}

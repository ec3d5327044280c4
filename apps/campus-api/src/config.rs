/// Campus API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// HMAC secret used to verify access tokens.
    pub jwt_secret: String,
    /// Maximum connections in the database pool.
    pub db_pool_size: usize,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// How long a gateway connection may stay unauthenticated.
    pub auth_timeout_secs: u64,
    /// Interval between server pings on an authenticated connection.
    pub ping_interval_secs: u64,
    /// Spawn coordinate for users without a persisted position.
    pub spawn_x: f64,
    pub spawn_y: f64,
    pub spawn_map: String,
    /// Maximum chat message length in characters.
    pub chat_max_length: usize,
    /// Per-connection outbound queue capacity.
    pub outbound_buffer: usize,
    /// Worker id mixed into generated message ids.
    pub worker_id: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_var("DATABASE_URL"),
            jwt_secret: required_var("JWT_SECRET"),
            db_pool_size: parsed_var("DB_POOL_SIZE", 20),
            port: parsed_var("PORT", 5000),
            auth_timeout_secs: parsed_var("AUTH_TIMEOUT_SECS", 10),
            ping_interval_secs: parsed_var("PING_INTERVAL_SECS", 25),
            spawn_x: parsed_var("SPAWN_X", 400.0),
            spawn_y: parsed_var("SPAWN_Y", 300.0),
            spawn_map: std::env::var("SPAWN_MAP")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "main".to_string()),
            chat_max_length: parsed_var("CHAT_MAX_LENGTH", 1000),
            outbound_buffer: parsed_var("OUTBOUND_BUFFER", 256),
            worker_id: parsed_var("WORKER_ID", 0),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

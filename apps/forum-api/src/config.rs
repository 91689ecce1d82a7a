/// Forum API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string backing the message store.
    pub database_url: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Capacity of each connection's outbound mailbox. A connection whose
    /// mailbox fills up is evicted by the hub.
    pub mailbox_capacity: usize,
    /// Whether the session cookie is marked `Secure` (requires HTTPS).
    pub session_cookie_secure: bool,
}

/// Default mailbox capacity when `MAILBOX_CAPACITY` is unset.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_var("DATABASE_URL"),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            mailbox_capacity: std::env::var("MAILBOX_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(DEFAULT_MAILBOX_CAPACITY),
            session_cookie_secure: std::env::var("SESSION_COOKIE_SECURE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Defaults for tests and in-memory runs. No database is contacted.
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/forum_test".to_string(),
            port: 0,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            session_cookie_secure: false,
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

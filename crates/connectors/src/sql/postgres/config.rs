use std::{fmt, str::FromStr, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(TlsMode::Disable),
            "prefer" | "" => Ok(TlsMode::Prefer),
            "require" => Ok(TlsMode::Require),
            other => Err(format!(
                "unsupported sslmode '{other}' (expected disable, prefer or require)"
            )),
        }
    }
}

/// Everything needed to open a pool against one PostgreSQL database.
#[derive(Clone)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub tls: TlsMode,
    pub pool_size: usize,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    /// Rows per COPY data frame sent to the server.
    pub copy_chunk_rows: usize,
}

impl PgConnectionConfig {
    /// `host:port/database`, safe to log.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl fmt::Debug for PgConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("pool_size", &self.pool_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .field("copy_chunk_rows", &self.copy_chunk_rows)
            .finish()
    }
}

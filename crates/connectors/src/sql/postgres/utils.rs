use crate::sql::{
    base::error::ConnectorError,
    postgres::config::{PgConnectionConfig, TlsMode},
};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::{Config, NoTls, config::SslMode};
use tracing::warn;

pub(crate) fn build_pool(config: &PgConnectionConfig) -> Result<Pool, ConnectorError> {
    let pg_config = client_config(config);
    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let manager = match config.tls {
        TlsMode::Disable => {
            warn!(
                endpoint = %config.endpoint(),
                "Postgres TLS is disabled, credentials are sent in plaintext"
            );
            Manager::from_config(pg_config, NoTls, mgr_config)
        }
        TlsMode::Prefer | TlsMode::Require => {
            let connector = TlsConnector::builder().build()?;
            Manager::from_config(pg_config, MakeTlsConnector::new(connector), mgr_config)
        }
    };

    Pool::builder(manager)
        .max_size(config.pool_size)
        .wait_timeout(Some(config.connect_timeout))
        .create_timeout(Some(config.connect_timeout))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| ConnectorError::Pool(e.to_string()))
}

fn client_config(config: &PgConnectionConfig) -> Config {
    let mut pg_config = Config::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .dbname(&config.database)
        .user(&config.username)
        .password(&config.password)
        .application_name("etl-transfer")
        .connect_timeout(config.connect_timeout)
        .options(&format!(
            "-c statement_timeout={}",
            config.query_timeout.as_millis()
        ))
        .ssl_mode(match config.tls {
            TlsMode::Disable => SslMode::Disable,
            TlsMode::Prefer => SslMode::Prefer,
            TlsMode::Require => SslMode::Require,
        });
    pg_config
}

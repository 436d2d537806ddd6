use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub gates: GateSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let buckets = env::var("ENROLL_BUCKETS")
            .unwrap_or_else(|_| "documents,documents-archive".to_string())
            .split(',')
            .map(|bucket| bucket.trim().to_string())
            .filter(|bucket| !bucket.is_empty())
            .collect::<Vec<_>>();
        if buckets.is_empty() {
            return Err(ConfigError::EmptyBucketRoster);
        }

        let poll_interval_secs = parse_secs("ENROLL_POLL_INTERVAL_SECS", 5)?;
        let poll_ceiling_secs = parse_secs("ENROLL_POLL_CEILING_SECS", 600)?;
        let enrollment_fee_cents = env::var("ENROLL_FEE_CENTS")
            .unwrap_or_else(|_| "9500".to_string())
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidFee)?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            storage: StorageConfig { buckets },
            gates: GateSettings {
                poll_interval_secs,
                poll_ceiling_secs,
                enrollment_fee_cents,
            },
        })
    }
}

fn parse_secs(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidDuration {
            key: key.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Ordered storage buckets: the first receives uploads, later entries are
/// consulted as fallbacks during resolution.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub buckets: Vec<String>,
}

/// External gate timing and the default enrollment fee.
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub poll_interval_secs: u64,
    pub poll_ceiling_secs: u64,
    pub enrollment_fee_cents: u32,
}

impl GateSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_ceiling(&self) -> Duration {
        Duration::from_secs(self.poll_ceiling_secs)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidFee,
    InvalidDuration { key: String },
    EmptyBucketRoster,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidFee => write!(f, "ENROLL_FEE_CENTS must be a valid u32"),
            ConfigError::InvalidDuration { key } => {
                write!(f, "{key} must be a whole number of seconds")
            }
            ConfigError::EmptyBucketRoster => {
                write!(f, "ENROLL_BUCKETS must name at least one bucket")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

/// Configuration management for the SaaSPro gateway
use crate::error::{ApiError, ApiResult};
use std::env;
use std::time::Duration;

const DEV_ACCESS_SECRET: &str = "dev-access-secret-change-me";
const DEV_REFRESH_SECRET: &str = "dev-refresh-secret-change-me";

/// Main server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub providers: ProviderConfig,
    pub email: Option<EmailConfig>,
    pub telegram: TelegramConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
    /// CryptoBot token, carried for the payment integration
    pub crypto_pay_token: Option<String>,
}

/// Service-level configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    /// Empty means any origin
    pub cors_allowed_origins: Vec<String>,
}

/// Postgres configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// JWT and account configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_expiry: Duration,
    pub refresh_expiry: Duration,
    pub remember_access_expiry: Duration,
    pub remember_refresh_expiry: Duration,
    /// Development-only bypass: every request acts as the first user with admin role
    pub skip_auth: bool,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

/// Upstream LLM provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub deepseek_base_url: String,
    pub openai_base_url: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_base_url: String,
    pub yandex_api_key: Option<String>,
    pub yandex_folder_id: Option<String>,
    pub yandex_base_url: String,
    pub gigachat_auth_key: Option<String>,
    pub gigachat_base_url: String,
    pub ollama_base_url: String,
    pub ip_lookup_base_url: String,
    pub request_timeout: Duration,
}

/// SMTP configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

/// Telegram Bot API configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub api_url: String,
    pub admin_chat_id: Option<i64>,
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub json: bool,
}

/// Parse a duration such as `15m`, `24h`, `30d`, `45s` or a bare number of seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let (number, unit) = match value.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], c),
        _ => (value, 's'),
    };

    let amount: u64 = number.trim().parse().ok()?;
    let secs = match unit {
        's' => amount,
        'm' => amount.checked_mul(60)?,
        'h' => amount.checked_mul(3600)?,
        'd' => amount.checked_mul(86400)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// Accept a dotenv load result unless the file exists and failed to parse
fn check_dotenv<T>(result: dotenv::Result<T>) -> ApiResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(ApiError::Validation(format!("Invalid .env file: {}", e))),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and `.env` if present).
    ///
    /// A missing `.env` is fine; a malformed one is a startup error, since
    /// dotenv stops loading at the first bad line.
    pub fn from_env() -> ApiResult<Self> {
        check_dotenv(dotenv::dotenv())?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> ApiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let get_bool = |key: &str| {
            get(key)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false)
        };
        let get_duration = |key: &str, default: &str| -> ApiResult<Duration> {
            let raw = get_or(key, default);
            parse_duration(&raw).ok_or_else(|| {
                ApiError::Validation(format!("Invalid duration for {}: {}", key, raw))
            })
        };

        let port = get_or("PORT", "8080")
            .parse()
            .map_err(|_| ApiError::Validation("Invalid port number".to_string()))?;

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty() && s != "*")
                    .collect()
            })
            .unwrap_or_default();

        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => format!(
                "postgres://{}:{}@{}:{}/{}?sslmode={}",
                get_or("DB_USER", "postgres"),
                get_or("DB_PASSWORD", "postgres"),
                get_or("DB_HOST", "localhost"),
                get_or("DB_PORT", "5432"),
                get_or("DB_NAME", "saaspro"),
                get_or("DB_SSLMODE", "disable"),
            ),
        };

        let email = match (get("SMTP_HOST"), get("SMTP_USER")) {
            (Some(smtp_host), Some(username)) => Some(EmailConfig {
                smtp_port: get_or("SMTP_PORT", "587")
                    .parse()
                    .map_err(|_| ApiError::Validation("Invalid SMTP port".to_string()))?,
                password: get_or("SMTP_PASSWORD", ""),
                from_address: get("EMAIL_FROM").unwrap_or_else(|| username.clone()),
                smtp_host,
                username,
            }),
            _ => None,
        };

        let admin_chat_id = match get("ADMIN_CHAT_ID") {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| ApiError::Validation("Invalid ADMIN_CHAT_ID".to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            service: ServiceConfig {
                host: get_or("HOST", "0.0.0.0"),
                port,
                environment: get_or("APP_ENV", "development"),
                cors_allowed_origins,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: get_or("DB_MAX_CONNECTIONS", "20").parse().unwrap_or(20),
                min_connections: get_or("DB_MIN_CONNECTIONS", "2").parse().unwrap_or(2),
            },
            auth: AuthConfig {
                access_secret: get_or("JWT_ACCESS_SECRET", DEV_ACCESS_SECRET),
                refresh_secret: get_or("JWT_REFRESH_SECRET", DEV_REFRESH_SECRET),
                access_expiry: get_duration("JWT_ACCESS_EXPIRY", "15m")?,
                refresh_expiry: get_duration("JWT_REFRESH_EXPIRY", "24h")?,
                remember_access_expiry: get_duration("JWT_REMEMBER_ACCESS_EXPIRY", "30d")?,
                remember_refresh_expiry: get_duration("JWT_REMEMBER_REFRESH_EXPIRY", "90d")?,
                skip_auth: get_bool("SKIP_AUTH"),
                admin_email: get("ADMIN_EMAIL"),
                admin_password: get("ADMIN_PASSWORD"),
            },
            providers: ProviderConfig {
                deepseek_base_url: get_or("DEEPSEEK_BASE_URL", "https://api.deepseek.com"),
                openai_base_url: get_or("OPENAI_BASE_URL", "https://api.openai.com"),
                openrouter_api_key: get("OPENROUTER_API_KEY"),
                openrouter_base_url: get_or("OPENROUTER_BASE_URL", "https://openrouter.ai/api"),
                yandex_api_key: get("YANDEX_API_KEY"),
                yandex_folder_id: get("YANDEX_FOLDER_ID"),
                yandex_base_url: get_or("YANDEX_BASE_URL", "https://llm.api.cloud.yandex.net"),
                gigachat_auth_key: get("GIGACHAT_AUTH_KEY"),
                gigachat_base_url: get_or(
                    "GIGACHAT_BASE_URL",
                    "https://gigachat.devices.sberbank.ru/api",
                ),
                ollama_base_url: get_or("OLLAMA_BASE_URL", "http://localhost:11434"),
                ip_lookup_base_url: get_or("IP_LOOKUP_BASE_URL", "http://ip-api.com"),
                request_timeout: get_duration("PROVIDER_TIMEOUT_SECS", "30")?,
            },
            email,
            telegram: TelegramConfig {
                bot_token: get("TELEGRAM_BOT_TOKEN"),
                api_url: get_or("TELEGRAM_API_URL", "https://api.telegram.org"),
                admin_chat_id,
            },
            rate_limit: RateLimitConfig {
                enabled: get("RATE_LIMIT_ENABLED")
                    .map(|v| v != "false" && v != "0")
                    .unwrap_or(true),
                requests_per_minute: get_or("RATE_LIMIT_PER_MINUTE", "100").parse().unwrap_or(100),
            },
            logging: LoggingConfig {
                json: get("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
            },
            crypto_pay_token: get("CRYPTO_PAY_TOKEN"),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ApiResult<()> {
        if self.auth.access_secret.is_empty() || self.auth.refresh_secret.is_empty() {
            return Err(ApiError::Validation("JWT secrets must not be empty".to_string()));
        }

        if self.auth.access_secret == self.auth.refresh_secret {
            return Err(ApiError::Validation(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ".to_string(),
            ));
        }

        if self.is_production() {
            if self.auth.skip_auth {
                return Err(ApiError::Validation(
                    "SKIP_AUTH cannot be enabled in production".to_string(),
                ));
            }
            if self.auth.access_secret == DEV_ACCESS_SECRET
                || self.auth.refresh_secret == DEV_REFRESH_SECRET
            {
                return Err(ApiError::Validation(
                    "Development JWT secrets cannot be used in production".to_string(),
                ));
            }
        }

        if self.rate_limit.enabled && self.rate_limit.requests_per_minute == 0 {
            return Err(ApiError::Validation(
                "RATE_LIMIT_PER_MINUTE must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.service.environment.eq_ignore_ascii_case("production")
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.host, self.service.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn config_from(pairs: &[(&str, &str)]) -> ApiResult<ServerConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("30d"), Some(Duration::from_secs(30 * 86400)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.service.port, 8080);
        assert_eq!(config.auth.access_expiry, Duration::from_secs(15 * 60));
        assert_eq!(config.auth.refresh_expiry, Duration::from_secs(24 * 3600));
        assert_eq!(config.auth.remember_access_expiry, Duration::from_secs(30 * 86400));
        assert_eq!(config.auth.remember_refresh_expiry, Duration::from_secs(90 * 86400));
        assert!(!config.auth.skip_auth);
        assert!(config.email.is_none());
        assert!(config.database.url.starts_with("postgres://postgres:"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_rejects_dev_secrets_and_skip_auth() {
        let config = config_from(&[("APP_ENV", "production")]).unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("APP_ENV", "production"),
            ("JWT_ACCESS_SECRET", "a"),
            ("JWT_REFRESH_SECRET", "b"),
            ("SKIP_AUTH", "true"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identical_secrets_rejected() {
        let config = config_from(&[("JWT_ACCESS_SECRET", "same"), ("JWT_REFRESH_SECRET", "same")])
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dotenv_file_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "PORT=9090").unwrap();
        writeln!(file, "SMTP_HOST=smtp.yandex.ru").unwrap();
        writeln!(file, "SMTP_USER=bot@example.com").unwrap();
        writeln!(file, "CORS_ALLOWED_ORIGINS=\"https://a.example, https://b.example\"").unwrap();

        let map = dotenv::from_path_iter(file.path())
            .unwrap()
            .collect::<Result<HashMap<String, String>, _>>()
            .unwrap();
        let config = ServerConfig::from_lookup(|key| map.get(key).cloned()).unwrap();

        assert_eq!(config.service.port, 9090);
        assert_eq!(config.service.cors_allowed_origins.len(), 2);
        let email = config.email.unwrap();
        assert_eq!(email.smtp_port, 587);
        assert_eq!(email.from_address, "bot@example.com");
    }

    #[test]
    fn test_malformed_dotenv_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "SAASPRO_TEST_ORIGINS=https://a.example, https://b.example").unwrap();

        let parsed = dotenv::from_path_iter(file.path())
            .and_then(|iter| iter.collect::<Result<Vec<(String, String)>, _>>());
        let err = check_dotenv(parsed).unwrap_err();
        assert!(err.to_string().starts_with("Invalid .env file"));
    }

    #[test]
    fn test_missing_dotenv_is_fine() {
        let missing = dotenv::from_path("/nonexistent/saaspro/.env");
        assert!(check_dotenv(missing).is_ok());
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub wechat: WechatConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// WeChat Pay v3 merchant credentials. The service runs with payments
/// disabled when these are absent (orders are still creatable for the
/// manual settlement path).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WechatConfig {
    #[serde(default)]
    pub enabled: bool,
    pub mchid: Option<String>,
    pub appid: Option<String>,
    /// 32-byte API v3 key, used as the AEAD key for certificate and
    /// notification payload decryption.
    pub api_v3_key: Option<String>,
    /// Serial number of the merchant certificate whose private key signs
    /// outbound requests.
    pub merchant_serial: Option<String>,
    /// Merchant RSA private key, PKCS#8 PEM.
    pub private_key_pem: Option<String>,
    pub notify_url: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://api.mch.weixin.qq.com".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchedulerConfig {
    /// Bearer token for external cron triggers; reconciliation refuses to
    /// run when unset.
    pub secret: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// When set, an in-process ticker runs reconciliation on this period.
    pub interval_secs: Option<u64>,
}

fn default_batch_size() -> i64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    pub membership_yuan: f64,
    pub membership_days: i64,
    pub token_basic_yuan: f64,
    pub token_basic_grant: i64,
    pub token_pro_yuan: f64,
    pub token_pro_grant: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            membership_yuan: 499.0,
            membership_days: 365,
            token_basic_yuan: 99.0,
            token_basic_grant: 100,
            token_pro_yuan: 249.0,
            token_pro_grant: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TtlConfig {
    /// Orders settled by gateway push notification go stale quickly.
    pub native_minutes: i64,
    /// Orders waiting on manual settlement confirmation get a day.
    pub manual_hours: i64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            native_minutes: 10,
            manual_hours: 24,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("database.url", "sqlite://tollgate.db")?
            .set_default("database.max_connections", 10)?
            .set_default("wechat.enabled", false)?
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (with TOLLGATE__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("TOLLGATE").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://tollgate.db".to_string(),
                max_connections: 10,
            },
            wechat: WechatConfig::default(),
            scheduler: SchedulerConfig::default(),
            pricing: PricingConfig::default(),
            ttl: TtlConfig::default(),
        }
    }
}

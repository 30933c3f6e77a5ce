use serde::Deserialize;

use crate::types::Channel;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string. When absent the in-memory store is used.
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// HTTP listen address (default: 0.0.0.0:3000)
    pub bind_addr: String,

    /// Country code prepended to phone numbers that lack one (default: 55)
    pub default_country_code: String,

    /// Upper bound on every provider call in milliseconds (default: 10000)
    pub provider_timeout_ms: u64,

    /// `maxRetries` stored on new notifications (default: 5)
    pub default_max_retries: u32,

    /// Default provider per channel and vendor credentials
    pub providers: ProvidersConfig,
}

/// Provider selection and credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub default_sms: String,
    pub default_email: String,
    pub default_whatsapp: String,
    pub twilio: TwilioConfig,
    pub sendgrid: SendGridConfig,
    pub meta: MetaConfig,
    pub aws_sns: AwsSnsConfig,
    pub aws_ses: AwsSesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number for SMS
    pub phone_number: String,
    /// Sender number for WhatsApp (without the `whatsapp:` prefix)
    pub whatsapp_number: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendGridConfig {
    pub api_key: String,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaConfig {
    pub access_token: String,
    pub phone_number_id: String,
    /// Graph API version segment, e.g. `v16.0`
    pub api_version: String,
    /// Language code sent with WhatsApp template messages
    pub template_language: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            phone_number_id: String::new(),
            api_version: "v16.0".to_string(),
            template_language: "pt_BR".to_string(),
        }
    }
}

const DEFAULT_AWS_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Deserialize)]
pub struct AwsSnsConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// `AWS.SNS.SMS.SenderID` attribute, shown by carriers that support it
    pub sender_id: String,
}

impl Default for AwsSnsConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_AWS_REGION.to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            sender_id: "NOTIFICATION".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsSesConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub from_email: String,
}

impl Default for AwsSesConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_AWS_REGION.to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            from_email: String::new(),
        }
    }
}

impl ProvidersConfig {
    /// The configured default provider name for a channel.
    pub fn default_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Sms => &self.default_sms,
            Channel::Email => &self.default_email,
            Channel::Whatsapp => &self.default_whatsapp,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_sms: "twilio".to_string(),
            default_email: "sendgrid".to_string(),
            default_whatsapp: "meta-api".to_string(),
            twilio: TwilioConfig::default(),
            sendgrid: SendGridConfig::default(),
            meta: MetaConfig::default(),
            aws_sns: AwsSnsConfig::default(),
            aws_ses: AwsSesConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 20,
            bind_addr: "0.0.0.0:3000".to_string(),
            default_country_code: "55".to_string(),
            provider_timeout_ms: 10_000,
            default_max_retries: 5,
            providers: ProvidersConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let meta_defaults = MetaConfig::default();
        let sns_defaults = AwsSnsConfig::default();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            default_country_code: std::env::var("DEFAULT_COUNTRY_CODE")
                .unwrap_or(defaults.default_country_code),
            provider_timeout_ms: std::env::var("PROVIDER_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PROVIDER_TIMEOUT_MS must be a valid u64"))?,
            default_max_retries: std::env::var("DEFAULT_MAX_RETRIES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DEFAULT_MAX_RETRIES must be a valid u32"))?,
            providers: ProvidersConfig {
                default_sms: std::env::var("DEFAULT_SMS_PROVIDER")
                    .unwrap_or(defaults.providers.default_sms),
                default_email: std::env::var("DEFAULT_EMAIL_PROVIDER")
                    .unwrap_or(defaults.providers.default_email),
                default_whatsapp: std::env::var("DEFAULT_WHATSAPP_PROVIDER")
                    .unwrap_or(defaults.providers.default_whatsapp),
                twilio: TwilioConfig {
                    account_sid: env_or_empty("TWILIO_ACCOUNT_SID"),
                    auth_token: env_or_empty("TWILIO_AUTH_TOKEN"),
                    phone_number: env_or_empty("TWILIO_PHONE_NUMBER"),
                    whatsapp_number: env_or_empty("TWILIO_WHATSAPP_NUMBER"),
                },
                sendgrid: SendGridConfig {
                    api_key: env_or_empty("SENDGRID_API_KEY"),
                    from_email: env_or_empty("SENDGRID_FROM_EMAIL"),
                    from_name: env_or_empty("SENDGRID_FROM_NAME"),
                },
                meta: MetaConfig {
                    access_token: env_or_empty("META_WHATSAPP_ACCESS_TOKEN"),
                    phone_number_id: env_or_empty("META_WHATSAPP_PHONE_NUMBER_ID"),
                    api_version: std::env::var("META_API_VERSION")
                        .unwrap_or(meta_defaults.api_version),
                    template_language: std::env::var("META_TEMPLATE_LANGUAGE")
                        .unwrap_or(meta_defaults.template_language),
                },
                aws_sns: AwsSnsConfig {
                    region: std::env::var("AWS_REGION").unwrap_or(sns_defaults.region),
                    access_key_id: env_or_empty("AWS_ACCESS_KEY_ID"),
                    secret_access_key: env_or_empty("AWS_SECRET_ACCESS_KEY"),
                    sender_id: std::env::var("AWS_SNS_SENDER_ID").unwrap_or(sns_defaults.sender_id),
                },
                aws_ses: AwsSesConfig {
                    region: std::env::var("AWS_SES_REGION")
                        .unwrap_or_else(|_| DEFAULT_AWS_REGION.to_string()),
                    access_key_id: env_or_empty("AWS_SES_ACCESS_KEY_ID"),
                    secret_access_key: env_or_empty("AWS_SES_SECRET_ACCESS_KEY"),
                    from_email: env_or_empty("AWS_SES_FROM_EMAIL"),
                },
            },
        })
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.provider_timeout_ms)
    }
}

fn env_or_empty(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}

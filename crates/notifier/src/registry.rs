//! Provider registry keyed by channel and provider name.
//!
//! Built once at startup, then shared read-only (behind an `Arc`) by the
//! dispatch engine and the health endpoint.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use courier_common::config::AppConfig;
use courier_common::error::AppError;
use courier_common::types::Channel;

use crate::provider::Provider;
use crate::providers::{
    AwsSesProvider, AwsSnsProvider, MetaWhatsappProvider, SendGridProvider, TwilioProvider,
};

/// Health of one channel: its default provider and a health result per registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelHealth {
    pub active: String,
    pub providers: BTreeMap<String, bool>,
}

pub type HealthReport = BTreeMap<Channel, ChannelHealth>;

pub struct ProviderRegistry {
    providers: HashMap<Channel, BTreeMap<String, Arc<dyn Provider>>>,
    defaults: HashMap<Channel, String>,
    health_timeout: Duration,
}

impl ProviderRegistry {
    /// Empty registry with the given per-channel defaults.
    pub fn new(defaults: HashMap<Channel, String>, health_timeout: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            defaults,
            health_timeout,
        }
    }

    /// Register every built-in vendor from configuration.
    ///
    /// Vendors without credentials are still registered; they fail their
    /// health check and any send with `NotConfigured`.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(config.provider_timeout())
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;

        let providers = &config.providers;
        let defaults = Channel::ALL
            .iter()
            .map(|c| (*c, providers.default_for(*c).to_string()))
            .collect();

        let mut registry = Self::new(defaults, config.provider_timeout());
        registry.register(Arc::new(TwilioProvider::sms(
            client.clone(),
            providers.twilio.clone(),
        )));
        registry.register(Arc::new(TwilioProvider::whatsapp(
            client.clone(),
            providers.twilio.clone(),
        )));
        registry.register(Arc::new(SendGridProvider::new(
            client.clone(),
            providers.sendgrid.clone(),
        )));
        registry.register(Arc::new(MetaWhatsappProvider::new(
            client,
            providers.meta.clone(),
        )));
        registry.register(Arc::new(AwsSnsProvider::new(providers.aws_sns.clone())));
        registry.register(Arc::new(AwsSesProvider::new(providers.aws_ses.clone())));

        for channel in Channel::ALL {
            let default = registry.default_name(channel);
            if registry.lookup(channel, default).is_none() {
                tracing::warn!(%channel, provider = default, "Default provider is not registered");
            }
        }

        tracing::info!(
            providers = registry.providers.values().map(BTreeMap::len).sum::<usize>(),
            "Provider registry initialized"
        );
        Ok(registry)
    }

    /// Add `provider` under its own channel and name, replacing any previous entry.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let channel = provider.channel();
        let name = provider.name().to_string();
        tracing::debug!(%channel, provider = %name, "Registering provider");
        self.providers
            .entry(channel)
            .or_default()
            .insert(name, provider);
    }

    /// Configured default provider name for `channel`.
    pub fn default_name(&self, channel: Channel) -> &str {
        self.defaults
            .get(&channel)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Resolve a provider by name, or the channel default when `name` is `None`.
    pub fn get_provider(
        &self,
        channel: Channel,
        name: Option<&str>,
    ) -> Result<Arc<dyn Provider>, AppError> {
        let name = name.unwrap_or_else(|| self.default_name(channel));
        self.lookup(channel, name).ok_or_else(|| {
            AppError::Config(format!("Provider {name} not found for channel {channel}"))
        })
    }

    fn lookup(&self, channel: Channel, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .get(&channel)
            .and_then(|by_name| by_name.get(name))
            .cloned()
    }

    /// Names of providers registered for `channel`, sorted.
    pub fn list_providers(&self, channel: Channel) -> Vec<String> {
        self.providers
            .get(&channel)
            .map(|by_name| by_name.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Health-check every provider concurrently.
    ///
    /// Each check runs on its own task under the registry timeout. An error,
    /// a timeout or a panic counts as unhealthy for that provider only.
    pub async fn check_health(&self) -> HealthReport {
        let timeout = self.health_timeout;
        let checks = self.providers.iter().flat_map(|(channel, by_name)| {
            by_name.iter().map(move |(name, provider)| {
                let provider = Arc::clone(provider);
                let name = name.clone();
                let channel = *channel;
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(timeout, provider.check_health()).await {
                        Ok(Ok(healthy)) => healthy,
                        Ok(Err(e)) => {
                            tracing::warn!(%channel, provider = provider.name(), error = %e, "Health check failed");
                            false
                        }
                        Err(_) => {
                            tracing::warn!(%channel, provider = provider.name(), "Health check timed out");
                            false
                        }
                    }
                });
                async move { (channel, name, handle.await.unwrap_or(false)) }
            })
        });
        let results = futures::future::join_all(checks).await;

        let mut report: HealthReport = Channel::ALL
            .iter()
            .map(|c| {
                (
                    *c,
                    ChannelHealth {
                        active: self.default_name(*c).to_string(),
                        providers: BTreeMap::new(),
                    },
                )
            })
            .collect();

        for (channel, name, healthy) in results {
            if let Some(entry) = report.get_mut(&channel) {
                entry.providers.insert(name, healthy);
            }
        }
        report
    }
}

//! Shared application state for the Axum API server.

use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_engine::dispatch::{DispatchEngine, DispatchSettings};
use courier_engine::preferences::PreferenceService;
use courier_engine::store::{NotificationStore, PreferenceStore, TemplateStore};
use courier_engine::templates::TemplateService;
use courier_notifier::ProviderRegistry;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DispatchEngine>,
    pub templates: TemplateService,
    pub preferences: PreferenceService,
    pub registry: Arc<ProviderRegistry>,
    pub config: AppConfig,
}

impl AppState {
    /// Wire every service over a single store backend.
    pub fn new<S>(store: Arc<S>, registry: ProviderRegistry, config: AppConfig) -> Self
    where
        S: NotificationStore + PreferenceStore + TemplateStore + 'static,
    {
        let registry = Arc::new(registry);
        let templates = TemplateService::new(store.clone());
        let preferences = PreferenceService::new(store.clone());
        let engine = DispatchEngine::new(
            store,
            registry.clone(),
            templates.clone(),
            preferences.clone(),
            DispatchSettings::from_config(&config),
        );

        Self {
            engine: Arc::new(engine),
            templates,
            preferences,
            registry,
            config,
        }
    }
}

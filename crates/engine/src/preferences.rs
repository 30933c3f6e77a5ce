//! Preference gate: per-user channel consent, verification and quiet hours.
//!
//! Records are created lazily with defaults on first access. The delivery window
//! check compares minute-of-day in the user's timezone with `start <= now <= end`;
//! windows that wrap past midnight (e.g. 22:00-08:00) never match.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use courier_common::error::AppError;
use courier_common::types::{Category, Channel, ChannelPreference, DeliveryPreferences, Preference};

use crate::store::PreferenceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptAction {
    OptIn,
    OptOut,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelPreferencePatch {
    pub enabled: Option<bool>,
    pub value: Option<String>,
    pub verified: Option<bool>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryFlagsPatch {
    pub marketing: Option<bool>,
    pub transactional: Option<bool>,
    pub alerts: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyCapsPatch {
    pub max_per_day: Option<u32>,
    pub max_per_week: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPreferencesPatch {
    pub allowed_time_start: Option<String>,
    pub allowed_time_end: Option<String>,
    pub timezone: Option<String>,
    pub categories: Option<CategoryFlagsPatch>,
    pub frequency: Option<FrequencyCapsPatch>,
}

/// Shallow merge applied by [`PreferenceService::update_preferences`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferencesPatch {
    #[serde(default)]
    pub channels: BTreeMap<Channel, ChannelPreferencePatch>,
    pub preferences: Option<DeliveryPreferencesPatch>,
}

#[derive(Clone)]
pub struct PreferenceService {
    store: Arc<dyn PreferenceStore>,
}

impl PreferenceService {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Return the user's record, creating a default one on first access.
    pub async fn get_or_create(&self, user_id: &str) -> Result<Preference, AppError> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("userId is required"));
        }
        if let Some(existing) = self.store.get_preference(user_id).await? {
            return Ok(existing);
        }

        let preference = Preference::new(user_id);
        match self.store.insert_preference(&preference).await {
            Ok(()) => {
                tracing::info!(user_id, "Default preferences created");
                Ok(preference)
            }
            // Lost a create race: the other writer's record wins.
            Err(AppError::Conflict(_)) => self
                .store
                .get_preference(user_id)
                .await?
                .ok_or_else(|| AppError::Internal(format!("Preferences for {user_id} vanished"))),
            Err(e) => Err(e),
        }
    }

    pub async fn update_preferences(
        &self,
        user_id: &str,
        patch: PreferencesPatch,
    ) -> Result<Preference, AppError> {
        let mut preference = self.get_or_create(user_id).await?;

        for (channel, channel_patch) in patch.channels {
            apply_channel_patch(preference.channel_mut(channel), channel_patch);
        }
        if let Some(delivery) = patch.preferences {
            apply_delivery_patch(&mut preference.preferences, delivery)?;
        }

        self.save(preference).await
    }

    pub async fn update_channel_preference(
        &self,
        user_id: &str,
        channel: Channel,
        patch: ChannelPreferencePatch,
    ) -> Result<Preference, AppError> {
        let mut preference = self.get_or_create(user_id).await?;
        apply_channel_patch(preference.channel_mut(channel), patch);
        self.save(preference).await
    }

    /// Enable or disable a channel. A new `value` always clears verification.
    pub async fn opt_in_out(
        &self,
        user_id: &str,
        channel: Channel,
        action: OptAction,
        value: Option<String>,
    ) -> Result<Preference, AppError> {
        let mut preference = self.get_or_create(user_id).await?;
        let entry = preference.channel_mut(channel);
        entry.enabled = action == OptAction::OptIn;
        if let Some(value) = value {
            entry.value = Some(value);
            entry.verified = false;
        }

        tracing::info!(user_id, %channel, ?action, "Channel consent changed");
        self.save(preference).await
    }

    pub async fn verify_channel(
        &self,
        user_id: &str,
        channel: Channel,
    ) -> Result<Preference, AppError> {
        let mut preference = self.get_or_create(user_id).await?;
        let entry = preference.channel_mut(channel);
        if entry.value.as_deref().is_none_or(str::is_empty) {
            return Err(AppError::Validation(format!(
                "No {channel} address on file for user {user_id}"
            )));
        }
        entry.verified = true;

        tracing::info!(user_id, %channel, "Channel verified");
        self.save(preference).await
    }

    /// Lowest-priority-number channel that is enabled, verified and has a value.
    pub async fn preferred_channel(&self, user_id: &str) -> Result<Option<Channel>, AppError> {
        let preference = self.get_or_create(user_id).await?;
        Ok(preferred(&preference))
    }

    pub async fn can_receive(&self, user_id: &str, category: Category) -> bool {
        self.can_receive_at(user_id, category, Utc::now()).await
    }

    /// Consent and quiet-hours check at `now`.
    ///
    /// When the check itself fails (store error, bad timezone or window),
    /// transactional and alert messages are allowed and marketing is not.
    pub async fn can_receive_at(&self, user_id: &str, category: Category, now: DateTime<Utc>) -> bool {
        let evaluated = match self.get_or_create(user_id).await {
            Ok(preference) => evaluate(&preference.preferences, category, now),
            Err(e) => Err(e),
        };

        match evaluated {
            Ok(allowed) => allowed,
            Err(e) => {
                let allowed = matches!(category, Category::Transactional | Category::Alerts);
                tracing::warn!(user_id, %category, allowed, error = %e, "Preference check failed");
                allowed
            }
        }
    }

    async fn save(&self, mut preference: Preference) -> Result<Preference, AppError> {
        preference.updated_at = Utc::now();
        self.store.update_preference(&preference).await?;
        Ok(preference)
    }
}

fn apply_channel_patch(entry: &mut ChannelPreference, patch: ChannelPreferencePatch) {
    if let Some(enabled) = patch.enabled {
        entry.enabled = enabled;
    }
    if let Some(value) = patch.value
        && entry.value.as_deref() != Some(value.as_str())
    {
        entry.value = Some(value);
        entry.verified = false;
    }
    if let Some(verified) = patch.verified {
        entry.verified = verified;
    }
    if let Some(priority) = patch.priority {
        entry.priority = priority;
    }
}

fn apply_delivery_patch(
    prefs: &mut DeliveryPreferences,
    patch: DeliveryPreferencesPatch,
) -> Result<(), AppError> {
    if let Some(start) = patch.allowed_time_start {
        minute_of_day(&start)?;
        prefs.allowed_time_start = start;
    }
    if let Some(end) = patch.allowed_time_end {
        minute_of_day(&end)?;
        prefs.allowed_time_end = end;
    }
    if let Some(timezone) = patch.timezone {
        parse_timezone(&timezone)?;
        prefs.timezone = timezone;
    }
    if let Some(categories) = patch.categories {
        let flags = &mut prefs.categories;
        flags.marketing = categories.marketing.unwrap_or(flags.marketing);
        flags.transactional = categories.transactional.unwrap_or(flags.transactional);
        flags.alerts = categories.alerts.unwrap_or(flags.alerts);
    }
    if let Some(frequency) = patch.frequency {
        let caps = &mut prefs.frequency;
        caps.max_per_day = frequency.max_per_day.unwrap_or(caps.max_per_day);
        caps.max_per_week = frequency.max_per_week.unwrap_or(caps.max_per_week);
    }
    Ok(())
}

pub(crate) fn preferred(preference: &Preference) -> Option<Channel> {
    preference
        .channels
        .iter()
        .filter(|(_, entry)| entry.is_deliverable())
        .min_by_key(|(_, entry)| entry.priority)
        .map(|(channel, _)| *channel)
}

/// Category flag, then the inclusive local-time window.
fn evaluate(prefs: &DeliveryPreferences, category: Category, now: DateTime<Utc>) -> Result<bool, AppError> {
    if !prefs.categories.allows(category) {
        return Ok(false);
    }

    let tz = parse_timezone(&prefs.timezone)?;
    let local = now.with_timezone(&tz);
    let current = local.hour() * 60 + local.minute();
    let start = minute_of_day(&prefs.allowed_time_start)?;
    let end = minute_of_day(&prefs.allowed_time_end)?;

    Ok(start <= current && current <= end)
}

fn parse_timezone(name: &str) -> Result<Tz, AppError> {
    name.parse::<Tz>()
        .map_err(|_| AppError::Validation(format!("Unknown timezone: {name}")))
}

/// Parse `HH:MM` into minutes since midnight.
fn minute_of_day(hhmm: &str) -> Result<u32, AppError> {
    let invalid = || AppError::Validation(format!("Invalid time of day (expected HH:MM): {hhmm}"));
    let (h, m) = hhmm.split_once(':').ok_or_else(invalid)?;
    let hours: u32 = h.trim().parse().map_err(|_| invalid())?;
    let minutes: u32 = m.trim().parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::store::MemoryStore;

    fn service() -> PreferenceService {
        PreferenceService::new(Arc::new(MemoryStore::new()))
    }

    /// UTC instant for a São Paulo wall-clock time on 2024-06-10 (UTC-3, no DST).
    fn sao_paulo(hour: i64, minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 3, 0, 0).unwrap()
            + chrono::Duration::hours(hour)
            + chrono::Duration::minutes(minute)
    }

    #[test]
    fn test_minute_of_day() {
        assert_eq!(minute_of_day("08:00").unwrap(), 480);
        assert_eq!(minute_of_day("22:00").unwrap(), 1320);
        assert!(minute_of_day("24:00").is_err());
        assert!(minute_of_day("8am").is_err());
    }

    #[tokio::test]
    async fn test_quiet_hours_boundaries_are_inclusive() {
        let svc = service();
        assert!(!svc.can_receive_at("u1", Category::Transactional, sao_paulo(7, 59)).await);
        assert!(svc.can_receive_at("u1", Category::Transactional, sao_paulo(8, 0)).await);
        assert!(svc.can_receive_at("u1", Category::Transactional, sao_paulo(22, 0)).await);
        assert!(!svc.can_receive_at("u1", Category::Transactional, sao_paulo(22, 1)).await);
    }

    #[tokio::test]
    async fn test_marketing_is_off_by_default() {
        let svc = service();
        assert!(!svc.can_receive_at("u1", Category::Marketing, sao_paulo(12, 0)).await);
        assert!(svc.can_receive_at("u1", Category::Alerts, sao_paulo(12, 0)).await);
    }

    #[test]
    fn test_overnight_window_never_matches() {
        let prefs = DeliveryPreferences {
            allowed_time_start: "22:00".to_string(),
            allowed_time_end: "08:00".to_string(),
            ..Default::default()
        };
        for hour in [0, 7, 12, 23] {
            assert!(!evaluate(&prefs, Category::Alerts, sao_paulo(hour, 0)).unwrap());
        }
    }

    #[tokio::test]
    async fn test_invalid_timezone_fails_open_only_for_critical_categories() {
        let store = Arc::new(MemoryStore::new());
        let mut pref = Preference::new("u1");
        pref.preferences.timezone = "Mars/Olympus".to_string();
        pref.preferences.categories.marketing = true;
        store.insert_preference(&pref).await.unwrap();

        let svc = PreferenceService::new(store);
        let noon = sao_paulo(12, 0);
        assert!(svc.can_receive_at("u1", Category::Transactional, noon).await);
        assert!(svc.can_receive_at("u1", Category::Alerts, noon).await);
        assert!(!svc.can_receive_at("u1", Category::Marketing, noon).await);
    }

    #[tokio::test]
    async fn test_opt_in_with_new_value_resets_verification() {
        let svc = service();
        svc.opt_in_out("u1", Channel::Email, OptAction::OptIn, Some("a@x.com".to_string()))
            .await
            .unwrap();
        let verified = svc.verify_channel("u1", Channel::Email).await.unwrap();
        assert!(verified.channels[&Channel::Email].verified);

        let changed = svc
            .opt_in_out("u1", Channel::Email, OptAction::OptIn, Some("b@x.com".to_string()))
            .await
            .unwrap();
        let email = &changed.channels[&Channel::Email];
        assert!(email.enabled);
        assert!(!email.verified);
        assert_eq!(email.value.as_deref(), Some("b@x.com"));

        let opted_out = svc
            .opt_in_out("u1", Channel::Email, OptAction::OptOut, None)
            .await
            .unwrap();
        assert!(!opted_out.channels[&Channel::Email].enabled);
        assert_eq!(opted_out.channels[&Channel::Email].value.as_deref(), Some("b@x.com"));
    }

    #[tokio::test]
    async fn test_verify_without_value_is_validation_error() {
        let err = service().verify_channel("u1", Channel::Sms).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_preferred_channel_picks_lowest_priority() {
        let svc = service();
        assert_eq!(svc.preferred_channel("u1").await.unwrap(), None);

        for (channel, value) in [(Channel::Sms, "+5511999999999"), (Channel::Email, "a@x.com")] {
            svc.opt_in_out("u1", channel, OptAction::OptIn, Some(value.to_string()))
                .await
                .unwrap();
            svc.verify_channel("u1", channel).await.unwrap();
        }
        assert_eq!(svc.preferred_channel("u1").await.unwrap(), Some(Channel::Email));

        // Enabled but unverified channels do not qualify.
        svc.opt_in_out("u1", Channel::Whatsapp, OptAction::OptIn, Some("+551199".to_string()))
            .await
            .unwrap();
        assert_eq!(svc.preferred_channel("u1").await.unwrap(), Some(Channel::Email));
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let svc = service();
        let first = svc.get_or_create("u1").await.unwrap();
        let second = svc.get_or_create("u1").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_update_preferences_merges_fields() {
        let svc = service();
        let patch: PreferencesPatch = serde_json::from_value(serde_json::json!({
            "channels": { "sms": { "priority": 0 } },
            "preferences": {
                "timezone": "UTC",
                "categories": { "marketing": true }
            }
        }))
        .unwrap();
        let updated = svc.update_preferences("u1", patch).await.unwrap();

        assert_eq!(updated.channels[&Channel::Sms].priority, 0);
        assert_eq!(updated.preferences.timezone, "UTC");
        assert!(updated.preferences.categories.marketing);
        assert!(updated.preferences.categories.transactional);
        assert_eq!(updated.preferences.allowed_time_start, "08:00");

        let bad: PreferencesPatch = serde_json::from_value(serde_json::json!({
            "preferences": { "allowedTimeEnd": "25:00" }
        }))
        .unwrap();
        assert!(matches!(
            svc.update_preferences("u1", bad).await,
            Err(AppError::Validation(_))
        ));
    }
}

//! Per-user toggles, persisted one field at a time.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::gateway::{Collection, Gateway, Key, Query, StoreError, decode, encode, patch, single};
use crate::record::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Confetti,
    Sound,
    ShowCompleted,
    ShowHistory,
    SortByPriority,
}

impl SettingKey {
    pub const ALL: [SettingKey; 5] = [
        SettingKey::Confetti,
        SettingKey::Sound,
        SettingKey::ShowCompleted,
        SettingKey::ShowHistory,
        SettingKey::SortByPriority,
    ];

    pub fn column(self) -> &'static str {
        match self {
            SettingKey::Confetti => "confetti_enabled",
            SettingKey::Sound => "sound_enabled",
            SettingKey::ShowCompleted => "show_completed",
            SettingKey::ShowHistory => "show_history",
            SettingKey::SortByPriority => "sort_by_priority",
        }
    }

    pub fn read(self, settings: &Settings) -> bool {
        match self {
            SettingKey::Confetti => settings.confetti_enabled,
            SettingKey::Sound => settings.sound_enabled,
            SettingKey::ShowCompleted => settings.show_completed,
            SettingKey::ShowHistory => settings.show_history,
            SettingKey::SortByPriority => settings.sort_by_priority,
        }
    }

    fn slot(self, settings: &mut Settings) -> &mut bool {
        match self {
            SettingKey::Confetti => &mut settings.confetti_enabled,
            SettingKey::Sound => &mut settings.sound_enabled,
            SettingKey::ShowCompleted => &mut settings.show_completed,
            SettingKey::ShowHistory => &mut settings.show_history,
            SettingKey::SortByPriority => &mut settings.sort_by_priority,
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for SettingKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        match key.as_str() {
            "confetti" | "confetti_enabled" => Ok(SettingKey::Confetti),
            "sound" | "sound_enabled" => Ok(SettingKey::Sound),
            "completed" | "show_completed" => Ok(SettingKey::ShowCompleted),
            "history" | "show_history" => Ok(SettingKey::ShowHistory),
            "sort" | "sort_by_priority" => Ok(SettingKey::SortByPriority),
            _ => Err(anyhow!("unknown setting: {s}")),
        }
    }
}

/// How `PreferenceSync::load` ended up with its values.
#[derive(Debug, Clone, PartialEq)]
pub enum PrefsLoad {
    Loaded,
    /// No record existed; defaults were inserted (or the insert failed and
    /// was logged) and are in use.
    Seeded,
    /// The fetch failed for another reason; whatever was in memory (the
    /// defaults, before any successful load) stays in use.
    Degraded(StoreError),
}

#[derive(Debug)]
pub struct PreferenceSync<G> {
    gateway: Arc<G>,
    settings: Settings,
}

impl<G: Gateway> PreferenceSync<G> {
    pub fn new(gateway: Arc<G>, user_id: Uuid) -> Self {
        Self {
            gateway,
            settings: Settings::defaults(user_id),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn get(&self, key: SettingKey) -> bool {
        key.read(&self.settings)
    }

    #[instrument(skip(self), fields(user = %self.settings.user_id))]
    pub async fn load(&mut self) -> PrefsLoad {
        let user_id = self.settings.user_id;
        let query = Query::all().eq("user_id", user_id.to_string());
        let fetched = single(self.gateway.as_ref(), Collection::Settings, &query)
            .await
            .and_then(decode::<Settings>);

        match fetched {
            Ok(settings) => {
                debug!(?settings, "loaded settings");
                self.settings = settings;
                PrefsLoad::Loaded
            }
            Err(err) if err.is_not_found() => {
                info!("no settings yet; seeding defaults");
                let defaults = Settings::defaults(user_id);
                let inserted = match encode(&defaults) {
                    Ok(row) => self.gateway.insert(Collection::Settings, row).await.map(|_| ()),
                    Err(err) => Err(err),
                };
                if let Err(err) = inserted {
                    error!(error = %err, "failed to create default settings");
                }
                self.settings = defaults;
                PrefsLoad::Seeded
            }
            Err(err) => {
                error!(error = %err, "failed to fetch settings; keeping current values");
                PrefsLoad::Degraded(err)
            }
        }
    }

    /// Applies the value locally straight away and persists that single
    /// field. A failed write is reported but not rolled back.
    #[instrument(skip(self))]
    pub async fn set(&mut self, key: SettingKey, value: bool) -> Result<(), StoreError> {
        *key.slot(&mut self.settings) = value;
        let result = self
            .gateway
            .update(
                Collection::Settings,
                &Key::user(self.settings.user_id),
                patch([(key.column(), Value::Bool(value))]),
            )
            .await;
        if let Err(err) = &result {
            warn!(%key, value, error = %err, "failed to persist setting");
        }
        result
    }
}

//! Backup lifecycle notifications
//!
//! The orchestrator reports each lifecycle point to every registered
//! [`NotificationSink`]. [`WebhookNotifier`] posts Discord-style embeds to a
//! webhook, filtered by `notify_on` and rate-limited through a JSON cache file.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::{NotificationConfig, NotifyEvent};
use crate::managers::catalog::CatalogEntry;
use crate::models::{BackupOutcome, BackupRequest};

/// A lifecycle point of a backup or restore
#[derive(Debug, Clone, Copy)]
pub enum BackupEvent<'a> {
    PreBackup {
        request: &'a BackupRequest,
    },
    PostBackup {
        request: &'a BackupRequest,
        outcome: &'a BackupOutcome,
    },
    BackupFailed {
        request: &'a BackupRequest,
        outcome: &'a BackupOutcome,
    },
    PreRestore {
        entry: &'a CatalogEntry,
    },
    PostRestore {
        entry: &'a CatalogEntry,
    },
    RestoreFailed {
        entry: &'a CatalogEntry,
        error: Option<&'a str>,
    },
}

impl BackupEvent<'_> {
    pub fn kind(&self) -> NotifyEvent {
        match self {
            BackupEvent::PreBackup { .. } => NotifyEvent::PreBackup,
            BackupEvent::PostBackup { .. } => NotifyEvent::PostBackup,
            BackupEvent::BackupFailed { .. } => NotifyEvent::BackupFailed,
            BackupEvent::PreRestore { .. } => NotifyEvent::PreRestore,
            BackupEvent::PostRestore { .. } => NotifyEvent::PostRestore,
            BackupEvent::RestoreFailed { .. } => NotifyEvent::RestoreFailed,
        }
    }

    /// Logical backup name the event is about
    pub fn backup_name(&self) -> &str {
        match self {
            BackupEvent::PreBackup { request }
            | BackupEvent::PostBackup { request, .. }
            | BackupEvent::BackupFailed { request, .. } => &request.name,
            BackupEvent::PreRestore { entry }
            | BackupEvent::PostRestore { entry }
            | BackupEvent::RestoreFailed { entry, .. } => &entry.name,
        }
    }

    pub fn storage(&self) -> Option<&str> {
        match self {
            BackupEvent::PreBackup { request }
            | BackupEvent::PostBackup { request, .. }
            | BackupEvent::BackupFailed { request, .. } => request.storage.as_deref(),
            BackupEvent::PreRestore { entry }
            | BackupEvent::PostRestore { entry }
            | BackupEvent::RestoreFailed { entry, .. } => Some(&entry.storage),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            BackupEvent::BackupFailed { outcome, .. } => outcome.error(),
            BackupEvent::RestoreFailed { error, .. } => *error,
            _ => None,
        }
    }

    fn duration_secs(&self) -> Option<u64> {
        match self {
            BackupEvent::PostBackup { outcome, .. } | BackupEvent::BackupFailed { outcome, .. } => {
                outcome.duration_secs().map(|secs| secs.round() as u64)
            }
            _ => None,
        }
    }

    fn message(&self) -> String {
        match self {
            BackupEvent::PreBackup { request } => {
                format!("Starting {} backup '{}'", request.backup_type, request.name)
            }
            BackupEvent::PostBackup { request, .. } => {
                format!("Backup '{}' completed successfully", request.name)
            }
            BackupEvent::BackupFailed { request, .. } => format!("Backup '{}' failed", request.name),
            BackupEvent::PreRestore { entry } => format!("Restoring '{}' ({})", entry.name, entry.id),
            BackupEvent::PostRestore { entry } => {
                format!("Restore of '{}' completed successfully", entry.name)
            }
            BackupEvent::RestoreFailed { entry, .. } => format!("Restore of '{}' failed", entry.name),
        }
    }
}

/// Receives lifecycle events
///
/// An error from a sink is logged by the caller and never changes the
/// outcome of the operation being reported.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &BackupEvent<'_>) -> Result<()>;
}

/// Discord embed color codes (decimal)
#[derive(Debug, Clone, Copy)]
pub enum NotificationColor {
    /// Red - for failures
    Failure = 15158332, // #E74C3C
    /// Green - for success
    Success = 3066993, // #2ECC71
    /// Blue - for info
    Info = 3447003, // #3498DB
}

impl NotificationColor {
    fn as_decimal(&self) -> u32 {
        *self as u32
    }
}

/// Discord webhook payload
#[derive(Debug, Serialize)]
struct DiscordPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<DiscordField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<DiscordFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct DiscordFooter {
    text: String,
}

/// Rate limit cache entry
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// Unix timestamp of last notification
    last_sent: i64,
    /// Count of notifications sent in current window
    count: u32,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct NotificationCache {
    entries: HashMap<String, CacheEntry>,
}

/// Posts lifecycle events to a webhook
pub struct WebhookNotifier {
    config: NotificationConfig,
}

impl WebhookNotifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    /// Check if notifications are enabled for an event type
    pub fn is_enabled(&self, event: NotifyEvent) -> bool {
        !self.config.webhook_url.is_empty() && self.config.notify_on.contains(&event)
    }

    fn cache_key(event: &BackupEvent<'_>) -> String {
        format!(
            "{}:{}:{:?}",
            event.backup_name(),
            event.storage().unwrap_or("all"),
            event.kind()
        )
    }

    fn build_payload(&self, event: &BackupEvent<'_>) -> DiscordPayload {
        let (color, emoji) = match event.kind() {
            NotifyEvent::BackupFailed | NotifyEvent::RestoreFailed => {
                (NotificationColor::Failure, "\u{274C}")
            }
            NotifyEvent::PostBackup | NotifyEvent::PostRestore => (NotificationColor::Success, "\u{2705}"),
            NotifyEvent::PreBackup | NotifyEvent::PreRestore => (NotificationColor::Info, "\u{2139}\u{FE0F}"),
        };

        let mut fields = vec![DiscordField {
            name: "Backup".to_string(),
            value: event.backup_name().to_string(),
            inline: true,
        }];

        if let Some(storage) = event.storage() {
            fields.push(DiscordField {
                name: "Storage".to_string(),
                value: storage.to_string(),
                inline: true,
            });
        }

        if let Some(duration) = event.duration_secs() {
            fields.push(DiscordField {
                name: "Duration".to_string(),
                value: format_duration(duration),
                inline: true,
            });
        }

        if let BackupEvent::PostBackup { outcome, .. } = event {
            if let Some(size) = outcome.size() {
                fields.push(DiscordField {
                    name: "Size".to_string(),
                    value: format!("{} bytes", size),
                    inline: true,
                });
            }
        }

        if let Some(error) = event.error() {
            fields.push(DiscordField {
                name: "Error".to_string(),
                value: format!("```\n{}\n```", truncate(error, 500)),
                inline: false,
            });
        }

        let embed = DiscordEmbed {
            title: format!("{} Backup Orchestrator: {:?}", emoji, event.kind()),
            description: Some(event.message()),
            color: color.as_decimal(),
            fields,
            footer: Some(DiscordFooter {
                text: "backup-orchestrator".to_string(),
            }),
            timestamp: Some(Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        };

        DiscordPayload {
            username: Some("Backup Orchestrator".to_string()),
            content: None,
            embeds: vec![embed],
        }
    }

    fn send_webhook(&self, payload: &DiscordPayload) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .post(&self.config.webhook_url)
            .json(payload)
            .send()
            .context("Failed to send webhook")?;

        let status = response.status();
        if status.is_success() {
            debug!("Webhook sent successfully");
            Ok(())
        } else {
            let body = response.text().unwrap_or_default();
            error!("Webhook failed with status {}: {}", status, body);
            anyhow::bail!("Webhook failed with status {}: {}", status, body)
        }
    }

    fn is_rate_limited(&self, cache_key: &str) -> Result<bool> {
        let cache = self.load_cache()?;
        let window = self.config.rate_limit_minutes as i64 * 60;

        Ok(cache
            .entries
            .get(cache_key)
            .is_some_and(|entry| Utc::now().timestamp() - entry.last_sent < window))
    }

    fn update_cache(&self, cache_key: &str) -> Result<()> {
        let mut cache = self.load_cache()?;
        let now = Utc::now().timestamp();
        let count = cache.entries.get(cache_key).map_or(1, |e| e.count + 1);

        cache.entries.insert(
            cache_key.to_string(),
            CacheEntry {
                last_sent: now,
                count,
            },
        );

        // Drop entries older than a day
        let cutoff = now - 86400;
        cache.entries.retain(|_, v| v.last_sent > cutoff);

        self.save_cache(&cache)
    }

    fn cache_path(&self) -> &PathBuf {
        &self.config.cache_file
    }

    fn load_cache(&self) -> Result<NotificationCache> {
        let path = self.cache_path();
        if !path.exists() {
            return Ok(NotificationCache::default());
        }

        let content = fs::read_to_string(path).context("Failed to read notification cache")?;
        serde_json::from_str(&content).context("Failed to parse notification cache")
    }

    fn save_cache(&self, cache: &NotificationCache) -> Result<()> {
        let path = self.cache_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content =
            serde_json::to_string_pretty(cache).context("Failed to serialize notification cache")?;
        fs::write(path, content).context("Failed to write notification cache")?;
        Ok(())
    }
}

impl NotificationSink for WebhookNotifier {
    fn notify(&self, event: &BackupEvent<'_>) -> Result<()> {
        if !self.is_enabled(event.kind()) {
            debug!("Notification type {:?} not enabled, skipping", event.kind());
            return Ok(());
        }

        let cache_key = Self::cache_key(event);
        if self.is_rate_limited(&cache_key)? {
            debug!("Notification rate-limited for key: {}", cache_key);
            return Ok(());
        }

        let payload = self.build_payload(event);
        self.send_webhook(&payload)?;
        self.update_cache(&cache_key)?;

        info!("Sent {:?} notification for '{}'", event.kind(), event.backup_name());
        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Format duration in human-readable form
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        let minutes = seconds / 60;
        let secs = seconds % 60;
        if secs == 0 {
            format!("{}m", minutes)
        } else {
            format!("{}m {}s", minutes, secs)
        }
    } else {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        if minutes == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, minutes)
        }
    }
}

/// Recording sink for tests
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// One event as a sink saw it
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedEvent {
        pub kind: NotifyEvent,
        pub name: String,
        pub error: Option<String>,
    }

    /// Records every event; clones share the record
    #[derive(Debug, Clone, Default)]
    pub struct RecordingSink {
        events: Arc<Mutex<Vec<RecordedEvent>>>,
        fail: bool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Record, then report an error for every event
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn events(&self) -> Vec<RecordedEvent> {
            self.events.lock().map(|e| e.clone()).unwrap_or_default()
        }

        pub fn kinds(&self) -> Vec<NotifyEvent> {
            self.events().into_iter().map(|e| e.kind).collect()
        }
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, event: &BackupEvent<'_>) -> Result<()> {
            if let Ok(mut events) = self.events.lock() {
                events.push(RecordedEvent {
                    kind: event.kind(),
                    name: event.backup_name().to_string(),
                    error: event.error().map(String::from),
                });
            }
            if self.fail {
                anyhow::bail!("sink unavailable");
            }
            Ok(())
        }
    }
}

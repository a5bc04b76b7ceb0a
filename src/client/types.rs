use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::domain::{PlatformCode, Stage, parse_status_key};

/// Body of `POST /api/{platform}/task/{stage}`.
///
/// Chained ids are always serialized, as `null` when the upstream stage never succeeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobRequest {
    Login {
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
    },
    Collect {
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
    },
    Filter {
        #[serde(rename = "collectTaskId")]
        collect_task_id: Option<String>,
        config: Option<Value>,
    },
    Deliver {
        #[serde(rename = "filterTaskId")]
        filter_task_id: Option<String>,
        config: Option<Value>,
        #[serde(rename = "enableActualDelivery")]
        enable_actual_delivery: bool,
    },
}

/// Body of `POST /api/task/quick-delivery/submit/{platform}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuickDeliveryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Response to any job submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginStatusResponse {
    pub logged_in: bool,
}

/// One value of the status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusEntry {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: None,
            count: None,
            task_id: None,
            updated_at: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    #[must_use]
    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }
}

/// Full read of `GET /api/tasks/status`. Absent keys mean "never submitted".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "BTreeMap<String, Value>")]
pub struct StatusSnapshot {
    entries: BTreeMap<String, StatusEntry>,
}

impl StatusSnapshot {
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, StatusEntry)>,
        K: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, platform: &PlatformCode, stage: Stage) -> Option<&StatusEntry> {
        self.entries.get(&platform.status_key(stage))
    }

    /// Platforms that have at least one recognisable key in this snapshot.
    pub fn platforms(&self) -> Vec<PlatformCode> {
        let mut platforms: Vec<PlatformCode> = self
            .entries
            .keys()
            .filter_map(|key| parse_status_key(key).map(|(platform, _)| platform))
            .collect();
        platforms.sort();
        platforms.dedup();
        platforms
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for StatusSnapshot {
    fn from(raw: BTreeMap<String, Value>) -> Self {
        let entries = raw
            .into_iter()
            .filter_map(
                |(key, value)| match serde_json::from_value::<StatusEntry>(value) {
                    Ok(entry) => Some((key, entry)),
                    Err(error) => {
                        warn!(key = %key, error = %error, "skipping malformed status entry");
                        None
                    }
                },
            )
            .collect();
        Self { entries }
    }
}

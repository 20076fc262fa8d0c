//! Audit events. Only their delivery matters to the pipeline; the content is
//! whatever the host application records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub user: String,
    pub action: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl AuditEvent {
    pub fn new(user: impl Into<String>, action: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            user: user.into(),
            action: action.into(),
            details,
            timestamp: chrono::Utc::now(),
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

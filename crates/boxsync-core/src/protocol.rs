//! # Realtime Wire Messages
//!
//! Messages exchanged over the WebSocket channels.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Hub Channel (edge ◄──► hub)                        │
//! │                                                                         │
//! │  CHANGE FAN-OUT                                                        │
//! │  ──────────────                                                        │
//! │  EDGE ───► UploadTrigger { tenantId }        (after uploads > 0)       │
//! │  HUB  ───► ChangeDetect  { tenantId }        (every member of group)   │
//! │                                                                         │
//! │  TAGGED EVENTS                                                         │
//! │  ─────────────                                                         │
//! │  ANY  ───► RegisterChange { tenantId, tag, data }                      │
//! │  HUB  ───► Event { tag, data }               (every member of group)   │
//! │                                                                         │
//! │  KEEPALIVE / ERROR                                                     │
//! │  ─────────────────                                                     │
//! │  Both ◄──► Ping { timestamp } / Pong { timestamp }                     │
//! │  Both ◄──► Error { code, message }                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                  Companion Channel (edge ◄──► local UI)                 │
//! │                                                                         │
//! │  EDGE ───► GetDeviceId                                                 │
//! │  UI   ───► DeviceId { deviceId }                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Adjacently tagged JSON:
//! ```json
//! { "type": "ChangeDetect", "payload": { "tenantId": "P1" } }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

// =============================================================================
// Hub Messages
// =============================================================================

/// Messages on the edge ↔ hub channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum HubMessage {
    /// Pushed by the hub: some box of this tenant uploaded changes.
    ChangeDetect {
        #[serde(rename = "tenantId")]
        tenant_id: String,
    },

    /// Sent by an edge after a sync that uploaded at least one change.
    UploadTrigger {
        #[serde(rename = "tenantId")]
        tenant_id: String,
    },

    /// Relays an arbitrary tagged payload to a tenant group.
    RegisterChange {
        #[serde(rename = "tenantId")]
        tenant_id: String,
        tag: String,
        #[serde(default)]
        data: serde_json::Value,
    },

    /// Delivery of a `RegisterChange` to group members.
    Event {
        tag: String,
        #[serde(default)]
        data: serde_json::Value,
    },

    /// Keepalive ping.
    Ping { timestamp: String },

    /// Keepalive reply.
    Pong { timestamp: String },

    /// Error reported by the peer.
    Error { code: String, message: String },
}

impl HubMessage {
    /// Returns the message type name (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            HubMessage::ChangeDetect { .. } => "ChangeDetect",
            HubMessage::UploadTrigger { .. } => "UploadTrigger",
            HubMessage::RegisterChange { .. } => "RegisterChange",
            HubMessage::Event { .. } => "Event",
            HubMessage::Ping { .. } => "Ping",
            HubMessage::Pong { .. } => "Pong",
            HubMessage::Error { .. } => "Error",
        }
    }

    /// Creates a ChangeDetect message.
    pub fn change_detect(tenant_id: &str) -> Self {
        HubMessage::ChangeDetect {
            tenant_id: tenant_id.to_string(),
        }
    }

    /// Creates an UploadTrigger message.
    pub fn upload_trigger(tenant_id: &str) -> Self {
        HubMessage::UploadTrigger {
            tenant_id: tenant_id.to_string(),
        }
    }

    /// Creates a RegisterChange message.
    pub fn register_change(tenant_id: &str, tag: &str, data: serde_json::Value) -> Self {
        HubMessage::RegisterChange {
            tenant_id: tenant_id.to_string(),
            tag: tag.to_string(),
            data,
        }
    }

    /// Creates a Ping message.
    pub fn ping() -> Self {
        HubMessage::Ping {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Creates a Pong answering the given ping timestamp.
    pub fn pong(timestamp: &str) -> Self {
        HubMessage::Pong {
            timestamp: timestamp.to_string(),
        }
    }

    /// Creates an Error message.
    pub fn error(code: &str, message: &str) -> Self {
        HubMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Serializes to JSON string.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes from JSON string.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// =============================================================================
// Companion Messages
// =============================================================================

/// Messages on the local companion (box UI) channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CompanionMessage {
    /// Asks the companion for the hardware device id.
    GetDeviceId,

    /// Reply carrying the device id.
    DeviceId {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
}

impl CompanionMessage {
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

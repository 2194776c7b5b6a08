//! # Bootstrap Collaborators
//!
//! Lookups used once per box to resolve its practice binding.
//!
//! ```text
//!  ┌──────────────┐ GetDeviceId  ┌──────────────────┐
//!  │ Provisioner  │─────────────►│ companion (local │
//!  │              │◄─────────────│ ws, box UI)      │
//!  │              │   deviceId   └──────────────────┘
//!  │              │
//!  │              │ GET /devices/{id} ┌──────────────────┐
//!  │              │──────────────────►│ device directory │
//!  │              │◄──────────────────│ (central)        │
//!  └──────────────┘  tags / 404       └──────────────────┘
//! ```

use async_trait::async_trait;
use boxsync_core::{CompanionMessage, DeviceIdentity};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Traits
// =============================================================================

/// Reports the hardware-rooted device id of this box.
#[async_trait]
pub trait DeviceInfoSource: Send + Sync {
    async fn device_id(&self) -> SyncResult<String>;
}

/// Central registry of devices and their practice tags.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Returns `None` when the directory has no record for the device.
    async fn device_tags(&self, device_id: &str) -> SyncResult<Option<DirectoryTags>>;
}

// =============================================================================
// Directory Tags
// =============================================================================

/// Tags attached to a device record in the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DirectoryTags {
    #[serde(default)]
    pub practiceid: Option<String>,
    #[serde(default)]
    pub doctorid: Option<String>,
    #[serde(default)]
    pub doctoremail: Option<String>,
}

impl DirectoryTags {
    /// Turns the tags into an identity.
    ///
    /// A missing practice tag means the device has not been provisioned yet.
    pub fn into_identity(self, device_id: &str) -> SyncResult<DeviceIdentity> {
        let practice_id = match non_empty(self.practiceid) {
            Some(id) => id,
            None => {
                return Err(SyncError::BootstrapUnresolved {
                    device_id: device_id.to_string(),
                })
            }
        };

        let doctor_id = non_empty(self.doctorid)
            .ok_or_else(|| SyncError::Directory(format!("device {} has no doctorid tag", device_id)))?;
        let doctor_email = non_empty(self.doctoremail).ok_or_else(|| {
            SyncError::Directory(format!("device {} has no doctoremail tag", device_id))
        })?;

        Ok(DeviceIdentity::new(
            Some(device_id.to_string()),
            practice_id,
            doctor_id,
            doctor_email,
        ))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    #[serde(default)]
    tags: DirectoryTags,
}

// =============================================================================
// Loopback Companion
// =============================================================================

/// Asks the local companion service for the device id over WebSocket.
pub struct LoopbackDeviceInfo {
    url: String,
    timeout: Duration,
}

impl LoopbackDeviceInfo {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        LoopbackDeviceInfo {
            url: url.into(),
            timeout,
        }
    }

    async fn request(&self) -> SyncResult<String> {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SyncError::DeviceInfo(format!("companion unreachable: {}", e)))?;

        let request = CompanionMessage::GetDeviceId.to_json()?;
        ws.send(WsMessage::Text(request.into())).await?;

        while let Some(frame) = ws.next().await {
            match frame? {
                WsMessage::Text(text) => match CompanionMessage::from_json(&text) {
                    Ok(CompanionMessage::DeviceId { device_id }) => {
                        let _ = ws.close(None).await;
                        if device_id.trim().is_empty() {
                            return Err(SyncError::DeviceInfo(
                                "companion returned an empty device id".into(),
                            ));
                        }
                        return Ok(device_id);
                    }
                    Ok(other) => debug!(?other, "Ignoring companion message"),
                    Err(e) => warn!(?e, "Failed to parse companion message"),
                },
                WsMessage::Ping(data) => ws.send(WsMessage::Pong(data)).await?,
                WsMessage::Close(_) => break,
                _ => {}
            }
        }

        Err(SyncError::DeviceInfo(
            "companion closed before reporting a device id".into(),
        ))
    }
}

#[async_trait]
impl DeviceInfoSource for LoopbackDeviceInfo {
    async fn device_id(&self) -> SyncResult<String> {
        match timeout(self.timeout, self.request()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::DeviceInfo(format!(
                "companion did not answer within {} seconds",
                self.timeout.as_secs()
            ))),
        }
    }
}

// =============================================================================
// HTTP Directory
// =============================================================================

/// Device directory reached over HTTP: `GET {base}/devices/{id}`.
pub struct HttpDeviceDirectory {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpDeviceDirectory {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(format!(
                "directory URL cannot carry a path: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Directory(e.to_string()))?;

        Ok(HttpDeviceDirectory {
            client,
            base_url,
            api_key,
        })
    }

    /// `{base}/devices/{id}`, with the id escaped as one path segment.
    fn device_url(&self, device_id: &str) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("devices")
            .push(device_id);
        Ok(url)
    }
}

#[async_trait]
impl DeviceDirectory for HttpDeviceDirectory {
    async fn device_tags(&self, device_id: &str) -> SyncResult<Option<DirectoryTags>> {
        let url = self.device_url(device_id)?;
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Directory(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(device_id, "Device not found in directory");
            return Ok(None);
        }

        let record: DeviceRecord = response
            .error_for_status()
            .map_err(|e| SyncError::Directory(e.to_string()))?
            .json()
            .await
            .map_err(|e| SyncError::Directory(e.to_string()))?;

        Ok(Some(record.tags))
    }
}

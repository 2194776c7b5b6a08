//! # Tenant Hub
//!
//! Groups live connections by practice and fans messages out to a group.
//!
//! ## Group Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           TenantHub                                     │
//! │                                                                         │
//! │   "P1" ──► { conn-a: tx, conn-b: tx }     UploadTrigger("P1")           │
//! │   "P2" ──► { conn-c: tx }                   └─► ChangeDetect("P1") to   │
//! │                                                 conn-a AND conn-b       │
//! │   PORTAL / no claim ──► not grouped                                     │
//! │                                                                         │
//! │   RegisterChange("P2", tag, data) ──► Event { tag, data } to conn-c     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is fire-and-forget: a member whose queue is full or closed
//! misses the message.

use std::collections::HashMap;

use boxsync_core::{HubMessage, SessionClaims};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifies one socket for the lifetime of the connection.
pub type ConnectionId = Uuid;

/// Outgoing queue of one group member.
pub type MemberSender = mpsc::Sender<HubMessage>;

/// Practice-keyed broadcast groups.
#[derive(Default)]
pub struct TenantHub {
    groups: RwLock<HashMap<String, HashMap<ConnectionId, MemberSender>>>,
}

impl TenantHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to its practice group.
    ///
    /// Returns the group joined, or `None` for administrative connections
    /// and tokens without a practice claim.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        claims: &SessionClaims,
        sender: MemberSender,
    ) -> Option<String> {
        let Some(tenant_id) = claims.tenant() else {
            info!(
                connection_id = %connection_id,
                admin = claims.is_admin(),
                "Ungrouped connection"
            );
            return None;
        };

        let mut groups = self.groups.write().await;
        let members = groups.entry(tenant_id.to_string()).or_default();
        members.insert(connection_id, sender);

        info!(
            connection_id = %connection_id,
            tenant_id = %tenant_id,
            members = members.len(),
            "Connection joined tenant group"
        );
        Some(tenant_id.to_string())
    }

    /// Removes a connection from a group. No-op if it never joined.
    pub async fn leave(&self, connection_id: ConnectionId, tenant_id: Option<&str>) {
        let Some(tenant_id) = tenant_id else {
            return;
        };

        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(tenant_id) {
            if members.remove(&connection_id).is_some() {
                info!(connection_id = %connection_id, tenant_id = %tenant_id, "Connection left tenant group");
            }
            if members.is_empty() {
                groups.remove(tenant_id);
            }
        }
    }

    /// Sends `ChangeDetect(tenant_id)` to every member of the group,
    /// including the caller. Returns how many members were reached.
    pub async fn upload_trigger(&self, tenant_id: &str) -> usize {
        let delivered = self
            .broadcast(tenant_id, HubMessage::change_detect(tenant_id))
            .await;
        info!(tenant_id = %tenant_id, delivered, "Upload trigger broadcast");
        delivered
    }

    /// Relays a tagged payload to every member of the group as an `Event`.
    pub async fn register_change(
        &self,
        tenant_id: &str,
        tag: &str,
        data: serde_json::Value,
    ) -> usize {
        let delivered = self
            .broadcast(
                tenant_id,
                HubMessage::Event {
                    tag: tag.to_string(),
                    data,
                },
            )
            .await;
        debug!(tenant_id = %tenant_id, tag = %tag, delivered, "Change registered");
        delivered
    }

    /// Handles a client-originated message.
    ///
    /// Returns the direct reply for the sender, if any.
    pub async fn dispatch(&self, connection_id: ConnectionId, message: HubMessage) -> Option<HubMessage> {
        match message {
            HubMessage::UploadTrigger { tenant_id } => {
                self.upload_trigger(&tenant_id).await;
                None
            }
            HubMessage::RegisterChange {
                tenant_id,
                tag,
                data,
            } => {
                self.register_change(&tenant_id, &tag, data).await;
                None
            }
            HubMessage::Ping { timestamp } => Some(HubMessage::pong(&timestamp)),
            HubMessage::Pong { .. } => None,
            other => {
                debug!(
                    connection_id = %connection_id,
                    msg_type = %other.type_name(),
                    "Ignoring server-only message from client"
                );
                Some(HubMessage::error(
                    "UNSUPPORTED",
                    &format!("{} is not accepted from clients", other.type_name()),
                ))
            }
        }
    }

    /// Number of live members in a group.
    pub async fn group_size(&self, tenant_id: &str) -> usize {
        self.groups
            .read()
            .await
            .get(tenant_id)
            .map_or(0, HashMap::len)
    }

    /// Number of non-empty groups.
    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }

    async fn broadcast(&self, tenant_id: &str, message: HubMessage) -> usize {
        let groups = self.groups.read().await;
        let Some(members) = groups.get(tenant_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (connection_id, sender) in members {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection_id = %connection_id, tenant_id = %tenant_id, ?e, "Dropped group message");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(practice: Option<&str>) -> SessionClaims {
        SessionClaims {
            sub: "dr@example.com".into(),
            doctor_id: "d-1".into(),
            practice_id: practice.map(str::to_string),
            iss: "boxsync".into(),
            aud: "boxsync".into(),
            iat: 0,
            exp: 0,
            jti: "jti".into(),
        }
    }

    async fn member(
        hub: &TenantHub,
        practice: Option<&str>,
    ) -> (ConnectionId, Option<String>, mpsc::Receiver<HubMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        let tenant = hub.join(id, &claims(practice), tx).await;
        (id, tenant, rx)
    }

    #[tokio::test]
    async fn test_upload_trigger_reaches_whole_group_only() {
        let hub = TenantHub::new();
        let (_, _, mut a) = member(&hub, Some("A")).await;
        let (_, _, mut a2) = member(&hub, Some("A")).await;
        let (_, _, mut b) = member(&hub, Some("B")).await;

        assert_eq!(hub.upload_trigger("A").await, 2);

        assert_eq!(a.try_recv().unwrap(), HubMessage::change_detect("A"));
        assert_eq!(a2.try_recv().unwrap(), HubMessage::change_detect("A"));
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_register_change_is_group_scoped() {
        let hub = TenantHub::new();
        let (_, _, mut a) = member(&hub, Some("A")).await;
        let (_, _, mut b) = member(&hub, Some("B")).await;

        let data = serde_json::json!({ "scan": 7 });
        assert_eq!(hub.register_change("B", "scan-added", data.clone()).await, 1);

        assert_eq!(
            b.try_recv().unwrap(),
            HubMessage::Event {
                tag: "scan-added".into(),
                data
            }
        );
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_admin_and_claimless_connections_are_ungrouped() {
        let hub = TenantHub::new();
        let (_, portal, _rx1) = member(&hub, Some("PORTAL")).await;
        let (_, none, _rx2) = member(&hub, None).await;

        assert!(portal.is_none());
        assert!(none.is_none());
        assert_eq!(hub.group_count().await, 0);
        assert_eq!(hub.upload_trigger("PORTAL").await, 0);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let hub = TenantHub::new();
        let (id, tenant, _rx) = member(&hub, Some("A")).await;
        let (other, _, _rx2) = member(&hub, Some("A")).await;
        assert_eq!(hub.group_size("A").await, 2);

        hub.leave(id, tenant.as_deref()).await;
        hub.leave(id, tenant.as_deref()).await;
        hub.leave(Uuid::new_v4(), None).await;
        assert_eq!(hub.group_size("A").await, 1);

        hub.leave(other, Some("A")).await;
        assert_eq!(hub.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_member_does_not_block_group() {
        let hub = TenantHub::new();
        let (_, _, dropped) = member(&hub, Some("A")).await;
        let (_, _, mut live) = member(&hub, Some("A")).await;
        drop(dropped);

        assert_eq!(hub.upload_trigger("A").await, 1);
        assert!(live.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_dispatch() {
        let hub = TenantHub::new();
        let (id, _, mut rx) = member(&hub, Some("A")).await;

        let reply = hub.dispatch(id, HubMessage::upload_trigger("A")).await;
        assert!(reply.is_none());
        assert_eq!(rx.try_recv().unwrap(), HubMessage::change_detect("A"));

        let reply = hub
            .dispatch(id, HubMessage::Ping { timestamp: "t".into() })
            .await;
        assert_eq!(reply, Some(HubMessage::pong("t")));

        let reply = hub.dispatch(id, HubMessage::change_detect("A")).await;
        assert!(matches!(reply, Some(HubMessage::Error { .. })));
    }
}

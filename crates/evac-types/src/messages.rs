//! Inbound and outbound message records
//!
//! Only the fields the engine consumes are modelled; unknown fields are
//! ignored on deserialization.

use crate::error::Result;
use crate::ids::{ConnectorId, NodeId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert lifecycle marker carried by hazard alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgType {
    Alert,
    Update,
    Cancel,
    #[serde(other)]
    Unknown,
}

/// One info block of a hazard alert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertInfo {
    #[serde(default)]
    pub event: Option<String>,
}

/// Hazard alert as relayed by the alert ingestion service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardAlert {
    #[serde(rename = "msgType")]
    pub msg_type: MsgType,
    #[serde(default)]
    pub info: Vec<AlertInfo>,
}

impl HazardAlert {
    pub fn alert(event: impl Into<String>) -> Self {
        Self::with_type(MsgType::Alert, Some(event.into()))
    }

    pub fn cancel() -> Self {
        Self::with_type(MsgType::Cancel, None)
    }

    pub fn with_type(msg_type: MsgType, event: Option<String>) -> Self {
        Self {
            msg_type,
            info: vec![AlertInfo { event }],
        }
    }

    /// Event type from the first info block, if any
    pub fn event_type(&self) -> Option<&str> {
        self.info
            .first()
            .and_then(|info| info.event.as_deref())
            .filter(|event| !event.is_empty())
    }
}

/// Node reference as it appears in danger reports: a bare integer or a label
/// such as `"N12"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    Id(i64),
    Label(String),
}

impl NodeRef {
    pub fn resolve(&self) -> Result<NodeId> {
        match self {
            NodeRef::Id(id) => Ok(NodeId(*id)),
            NodeRef::Label(label) => label.parse(),
        }
    }
}

impl From<NodeId> for NodeRef {
    fn from(id: NodeId) -> Self {
        NodeRef::Id(id.0)
    }
}

/// A node hosting people in danger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DangerousNode {
    pub node_id: NodeRef,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

/// Aggregated report of nodes currently hosting people in danger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DangerReport {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub dangerous_nodes: Vec<DangerousNode>,
}

impl DangerReport {
    /// Explicit event type, treating an empty string as absent
    pub fn explicit_event(&self) -> Option<&str> {
        self.event_type.as_deref().filter(|event| !event.is_empty())
    }
}

/// Route of one resolved node inside a routes-ready batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteNotice {
    pub node_id: NodeId,
    pub user_ids: Vec<String>,
    pub evacuation_path: Vec<ConnectorId>,
}

/// Signal published once a batch of routes has been persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutesReady {
    pub msg_type: String,
    pub batch_id: Uuid,
    pub event_type: String,
    pub routes: Vec<RouteNotice>,
}

impl RoutesReady {
    pub const MSG_TYPE: &'static str = "paths_ready";

    pub fn new(event_type: impl Into<String>, routes: Vec<RouteNotice>) -> Self {
        Self {
            msg_type: Self::MSG_TYPE.to_string(),
            batch_id: Uuid::new_v4(),
            event_type: event_type.into(),
            routes,
        }
    }
}

/// Per-user evacuation notice republished to end-user relays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRouteNotice {
    #[serde(rename = "msgType")]
    pub msg_type: String,
    pub user_id: String,
    pub node_id: NodeId,
    pub evacuation_path: Vec<ConnectorId>,
}

impl UserRouteNotice {
    pub const MSG_TYPE: &'static str = "Evacuation";

    pub fn new(user_id: impl Into<String>, node_id: NodeId, evacuation_path: Vec<ConnectorId>) -> Self {
        Self {
            msg_type: Self::MSG_TYPE.to_string(),
            user_id: user_id.into(),
            node_id,
            evacuation_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;

    #[test]
    fn test_alert_event_from_first_info() {
        let alert: HazardAlert = serde_json::from_str(
            r#"{"msgType":"Alert","info":[{"event":"Fire"},{"event":"Flood"}],"sender":"x"}"#,
        )
        .unwrap();
        assert_eq!(alert.msg_type, MsgType::Alert);
        assert_eq!(alert.event_type(), Some("Fire"));
    }

    #[test]
    fn test_unknown_msg_type_and_missing_info() {
        let alert: HazardAlert = serde_json::from_str(r#"{"msgType":"Ack"}"#).unwrap();
        assert_eq!(alert.msg_type, MsgType::Unknown);
        assert_eq!(alert.event_type(), None);
    }

    #[test]
    fn test_report_accepts_labels_and_integers() {
        let report: DangerReport = serde_json::from_str(
            r#"{"dangerous_nodes":[{"node_id":"N12","user_ids":["u1"]},{"node_id":7}]}"#,
        )
        .unwrap();
        assert_eq!(report.explicit_event(), None);
        assert_eq!(report.dangerous_nodes[0].node_id.resolve().unwrap(), NodeId(12));
        assert_eq!(report.dangerous_nodes[1].node_id.resolve().unwrap(), NodeId(7));
        assert!(report.dangerous_nodes[1].user_ids.is_empty());
    }

    #[test]
    fn test_bad_label_does_not_resolve() {
        let node = NodeRef::Label("hall".into());
        assert_eq!(node.resolve().unwrap_err(), ModelError::InvalidNodeLabel("hall".into()));
    }

    #[test]
    fn test_routes_ready_shape() {
        let ready = RoutesReady::new(
            "Fire",
            vec![RouteNotice {
                node_id: NodeId(3),
                user_ids: vec!["u1".into()],
                evacuation_path: vec![ConnectorId(8), ConnectorId(9)],
            }],
        );
        let value = serde_json::to_value(&ready).unwrap();
        assert_eq!(value["msg_type"], "paths_ready");
        assert_eq!(value["routes"][0]["evacuation_path"], serde_json::json!([8, 9]));
    }

    #[test]
    fn test_user_notice_uses_camel_msg_type() {
        let notice = UserRouteNotice::new("u1", NodeId(3), vec![ConnectorId(1)]);
        let value = serde_json::to_value(&notice).unwrap();
        assert_eq!(value["msgType"], "Evacuation");
        assert_eq!(value["user_id"], "u1");
    }
}

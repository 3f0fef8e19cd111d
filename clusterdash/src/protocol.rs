/**
 * PROTOCOL - Trames JSON échangées sur la connexion WebSocket partagée
 *
 * Client -> serveur : `{ "op": ..., "msg_id": ..., ...champs }`
 * Serveur -> client : `{ "op": ..., "msg_id"?: ..., ...payload }`
 *
 * Un `msg_id` connu de la table de corrélation = réponse ; sinon broadcast.
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::Workload;

// ops client -> serveur
pub const REGISTER_WORKLOAD: &str = "register_workload";
pub const START_WORKLOAD: &str = "start_workload";
pub const STOP_WORKLOAD: &str = "stop_workload";
pub const GET_WORKLOADS: &str = "get_workloads";

// broadcasts serveur -> client
pub const ACTIVE_WORKLOADS_UPDATE: &str = "active_workloads_update";
pub const ERROR_OP: &str = "error";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object frame")]
    NotAnObject,
    #[error("reply is missing field '{0}'")]
    MissingField(&'static str),
    #[error("server rejected request: {0}")]
    Rejected(String),
}

/// Trame sortante ; `fields` est aplati à côté de `op` et `msg_id`
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    pub op: String,
    pub msg_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OutboundFrame {
    /// Nouvelle trame avec un msg_id UUID v4 frais
    pub fn new(op: &str, fields: Value) -> Self {
        Self::with_id(op, Uuid::new_v4().to_string(), fields)
    }

    pub fn with_id(op: &str, msg_id: String, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self { op: op.to_string(), msg_id, fields }
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn queue(&self) -> Result<QueuedFrame, ProtocolError> {
        Ok(QueuedFrame { msg_id: self.msg_id.clone(), text: self.to_text()? })
    }
}

/// Trame sérialisée en file d'attente vers le socket.
/// Le `msg_id` permet d'écarter une requête abandonnée avant son écriture.
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub msg_id: String,
    pub text: String,
}

/// Trame entrante après parsing minimal
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub op: Option<String>,
    pub msg_id: Option<String>,
    pub body: Value,
}

impl InboundFrame {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let body: Value = serde_json::from_str(raw)?;
        Self::from_value(body)
    }

    pub fn from_value(body: Value) -> Result<Self, ProtocolError> {
        let obj = body.as_object().ok_or(ProtocolError::NotAnObject)?;
        let op = obj.get("op").and_then(Value::as_str).map(str::to_string);
        let msg_id = obj.get("msg_id").and_then(Value::as_str).map(str::to_string);
        Ok(Self { op, msg_id, body })
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }
}

/// Broadcast `active_workloads_update`
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadsUpdate {
    #[serde(alias = "modified_workloads", default)]
    pub workloads: Vec<Workload>,
}

/// Détecte une réponse d'erreur du serveur
pub fn rejection(body: &Value) -> Option<String> {
    let is_error_op = body.get("op").and_then(Value::as_str) == Some(ERROR_OP);
    let message = body
        .get("error_message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string);
    match (is_error_op, message) {
        (_, Some(msg)) => Some(msg),
        (true, None) => Some("unspecified server error".to_string()),
        (false, None) => None,
    }
}

/// Extrait le champ `workload` d'une réponse register/start/stop
pub fn workload_from_reply(body: &Value) -> Result<Workload, ProtocolError> {
    if let Some(msg) = rejection(body) {
        return Err(ProtocolError::Rejected(msg));
    }
    let raw = body.get("workload").ok_or(ProtocolError::MissingField("workload"))?;
    Ok(serde_json::from_value(raw.clone())?)
}

/// Extrait le champ `workloads` d'une réponse `get_workloads`
pub fn workloads_from_reply(body: &Value) -> Result<Vec<Workload>, ProtocolError> {
    if let Some(msg) = rejection(body) {
        return Err(ProtocolError::Rejected(msg));
    }
    let raw = body.get("workloads").ok_or(ProtocolError::MissingField("workloads"))?;
    Ok(serde_json::from_value(raw.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_flattens_fields() {
        let frame = OutboundFrame::with_id(START_WORKLOAD, "abc".into(), json!({"workload_id": "w1"}));
        let v: Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();
        assert_eq!(v, json!({"op": "start_workload", "msg_id": "abc", "workload_id": "w1"}));
    }

    #[test]
    fn test_outbound_ids_are_unique() {
        let a = OutboundFrame::new(GET_WORKLOADS, Value::Null);
        let b = OutboundFrame::new(GET_WORKLOADS, Value::Null);
        assert_ne!(a.msg_id, b.msg_id);
        assert!(a.fields.is_empty());
    }

    #[test]
    fn test_inbound_without_msg_id() {
        let frame = InboundFrame::parse(r#"{"op":"active_workloads_update","workloads":[]}"#).unwrap();
        assert_eq!(frame.op(), Some(ACTIVE_WORKLOADS_UPDATE));
        assert!(frame.msg_id.is_none());
    }

    #[test]
    fn test_inbound_rejects_non_object() {
        assert!(matches!(InboundFrame::parse("[1,2]"), Err(ProtocolError::NotAnObject)));
        assert!(matches!(InboundFrame::parse("{oops"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_workload_reply_shapes() {
        let ok = json!({"op": "register_workload_response", "msg_id": "abc", "workload": {"id": "w1", "name": "demo"}});
        assert_eq!(workload_from_reply(&ok).unwrap().id, "w1");

        let missing = json!({"op": "register_workload_response", "msg_id": "abc"});
        assert!(matches!(workload_from_reply(&missing), Err(ProtocolError::MissingField("workload"))));

        let rejected = json!({"op": "error", "msg_id": "abc", "error_message": "preset not found"});
        match workload_from_reply(&rejected) {
            Err(ProtocolError::Rejected(msg)) => assert_eq!(msg, "preset not found"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_workloads_update_alias() {
        let update: WorkloadsUpdate = serde_json::from_value(json!({"modified_workloads": [{"id": "w2"}]})).unwrap();
        assert_eq!(update.workloads.len(), 1);
    }
}

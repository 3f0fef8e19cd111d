/**
 * DISPATCHER - Routage des messages entrants de la connexion partagée
 *
 * Deux étages indépendants :
 * 1. Corrélation : `msg_id` connu -> la complétion en attente reçoit le message
 * 2. Broadcast : sinon, routage par `op` vers le handler enregistré
 *
 * Un `op` inconnu est journalisé puis ignoré. Un JSON invalide aussi : la
 * boucle de réception ne s'arrête jamais sur un message.
 */

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::correlation::CorrelationTable;
use crate::protocol::InboundFrame;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unexpected payload shape for '{op}': {reason}")]
    Shape { op: String, reason: String },
}

pub type BroadcastHandler = Box<dyn Fn(&InboundFrame) -> Result<(), DispatchError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Reply { msg_id: String },
    Broadcast { op: String },
    HandlerFailed { op: String },
    Unhandled { op: Option<String> },
    Malformed,
}

/// Table op -> handler pour les messages non sollicités
#[derive(Default)]
pub struct BroadcastRegistry {
    handlers: HashMap<String, BroadcastHandler>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, op: &str, handler: BroadcastHandler) {
        self.handlers.insert(op.to_string(), handler);
    }

    pub fn ops(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn handle(&self, frame: &InboundFrame) -> DispatchOutcome {
        let Some(op) = frame.op() else {
            warn!(msg_id = ?frame.msg_id, "inbound message without op and no pending request, dropped");
            return DispatchOutcome::Unhandled { op: None };
        };
        let Some(handler) = self.handlers.get(op) else {
            warn!(op, msg_id = ?frame.msg_id, "no handler for inbound op, dropped");
            return DispatchOutcome::Unhandled { op: Some(op.to_string()) };
        };
        match handler(frame) {
            Ok(()) => DispatchOutcome::Broadcast { op: op.to_string() },
            Err(e) => {
                warn!(op, "broadcast handler failed: {}", e);
                DispatchOutcome::HandlerFailed { op: op.to_string() }
            }
        }
    }
}

pub struct Dispatcher {
    correlation: Arc<CorrelationTable>,
    broadcasts: BroadcastRegistry,
}

impl Dispatcher {
    pub fn new(correlation: Arc<CorrelationTable>, broadcasts: BroadcastRegistry) -> Self {
        Self { correlation, broadcasts }
    }

    /// Vrai tant qu'une complétion attend une réponse à `msg_id`
    pub fn awaiting(&self, msg_id: &str) -> bool {
        self.correlation.contains(msg_id)
    }

    pub fn dispatch_text(&self, raw: &str) -> DispatchOutcome {
        match InboundFrame::parse(raw) {
            Ok(frame) => self.dispatch_frame(frame),
            Err(e) => {
                warn!("malformed inbound message: {} ({} bytes)", e, raw.len());
                DispatchOutcome::Malformed
            }
        }
    }

    pub fn dispatch_value(&self, body: Value) -> DispatchOutcome {
        match InboundFrame::from_value(body) {
            Ok(frame) => self.dispatch_frame(frame),
            Err(e) => {
                warn!("malformed inbound message: {}", e);
                DispatchOutcome::Malformed
            }
        }
    }

    pub fn dispatch_frame(&self, frame: InboundFrame) -> DispatchOutcome {
        if let Some(msg_id) = frame.msg_id.as_deref() {
            if let Some(completion) = self.correlation.take(msg_id) {
                let msg_id = msg_id.to_string();
                debug!(msg_id = %msg_id, op = ?frame.op, "reply correlated");
                completion(frame.body);
                return DispatchOutcome::Reply { msg_id };
            }
        }
        self.broadcasts.handle(&frame)
    }
}

/*!
Gateway WebSocket simulée pour tests sans serveur

Enregistre toutes les trames émises par la session et permet d'injecter
des réponses corrélées ou des broadcasts dans son dispatcher.
*/

use anyhow::Result;
use clusterdash::dispatch::{DispatchOutcome, Dispatcher};
use clusterdash::protocol::QueuedFrame;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Trame émise par la session, telle que la gateway la recevrait
#[derive(Debug, Clone)]
pub struct RecordedFrame {
    pub op: String,
    pub msg_id: String,
    pub body: Value,
}

/// Côté serveur de la connexion partagée
pub struct MockGateway {
    outbound: Mutex<mpsc::UnboundedReceiver<QueuedFrame>>,
    recorded: Mutex<Vec<RecordedFrame>>,
    dispatcher: Arc<Dispatcher>,
}

impl MockGateway {
    pub fn new(outbound: mpsc::UnboundedReceiver<QueuedFrame>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            outbound: Mutex::new(outbound),
            recorded: Mutex::new(Vec::new()),
            dispatcher,
        }
    }

    /// Relève les trames en attente dans le canal sortant
    pub fn drain(&self) -> Result<usize> {
        let mut rx = self.outbound.lock();
        let mut recorded = self.recorded.lock();
        let mut count = 0;
        while let Ok(queued) = rx.try_recv() {
            let body: Value = serde_json::from_str(&queued.text)?;
            let op = body["op"].as_str().unwrap_or_default().to_string();
            let msg_id = queued.msg_id;
            log::info!("[MOCK] session sent {} ({})", op, msg_id);
            recorded.push(RecordedFrame { op, msg_id, body });
            count += 1;
        }
        Ok(count)
    }

    pub fn sent_frames(&self) -> Result<Vec<RecordedFrame>> {
        self.drain()?;
        Ok(self.recorded.lock().clone())
    }

    pub fn find_by_op(&self, op: &str) -> Result<Vec<RecordedFrame>> {
        Ok(self.sent_frames()?.into_iter().filter(|f| f.op == op).collect())
    }

    pub fn last_request(&self, op: &str) -> Result<RecordedFrame> {
        self.find_by_op(op)?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no '{}' frame was sent", op))
    }

    /// Réponse corrélée : `payload` enrichi de `op` et `msg_id`
    pub fn reply(&self, msg_id: &str, op: &str, payload: Value) -> DispatchOutcome {
        let mut body = payload;
        if let Value::Object(map) = &mut body {
            map.insert("op".into(), json!(op));
            map.insert("msg_id".into(), json!(msg_id));
        }
        self.dispatcher.dispatch_value(body)
    }

    /// Répond à la dernière requête `op` avec `<op>_response`
    pub fn reply_to_last(&self, op: &str, payload: Value) -> Result<DispatchOutcome> {
        let request = self.last_request(op)?;
        Ok(self.reply(&request.msg_id, &format!("{op}_response"), payload))
    }

    /// Broadcast non sollicité (sans msg_id)
    pub fn push(&self, op: &str, payload: Value) -> DispatchOutcome {
        let mut body = payload;
        if let Value::Object(map) = &mut body {
            map.insert("op".into(), json!(op));
        }
        log::info!("[MOCK] gateway pushed {}", op);
        self.dispatcher.dispatch_value(body)
    }

    pub fn push_raw(&self, text: &str) -> DispatchOutcome {
        self.dispatcher.dispatch_text(text)
    }

    pub fn clear(&self) {
        let _ = self.drain();
        self.recorded.lock().clear();
    }
}

/// Fixtures des messages de la gateway
pub struct GatewayMessageBuilder;

impl GatewayMessageBuilder {
    pub fn workload(id: &str, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "workload_state": "ready",
            "registered_time": chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn running_workload(id: &str, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "workload_state": "running",
            "started_at": chrono::Utc::now().to_rfc3339(),
            "num_active_sessions": 1,
        })
    }

    pub fn kernel(id: &str, replicas: u32) -> Value {
        let replicas: Vec<Value> = (1..=replicas)
            .map(|r| json!({"replica_id": r, "pod_id": format!("{id}-{r}"), "node_id": format!("node-{r}")}))
            .collect();
        json!({
            "kernel_id": id,
            "num_replicas": replicas.len(),
            "status": "running",
            "aggregate_busy_status": "idle",
            "replicas": replicas,
        })
    }

    pub fn node(id: &str) -> Value {
        json!({
            "node_id": id,
            "node_name": id,
            "ip": "10.0.0.1",
            "node_type": "kubernetes",
            "enabled": true,
        })
    }

    pub fn preset(key: &str) -> Value {
        json!({"key": key, "name": key, "preset_type": "xml"})
    }

    pub fn workload_reply(workload: Value) -> Value {
        json!({ "workload": workload })
    }

    pub fn workloads_reply(workloads: Vec<Value>) -> Value {
        json!({ "workloads": workloads })
    }

    pub fn workloads_update(workloads: Vec<Value>) -> Value {
        json!({ "modified_workloads": workloads })
    }

    pub fn error(message: &str) -> Value {
        json!({ "op": "error", "error_message": message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterdash::correlation::CorrelationTable;
    use clusterdash::dispatch::BroadcastRegistry;
    use clusterdash::protocol::OutboundFrame;

    fn gateway() -> (MockGateway, mpsc::UnboundedSender<QueuedFrame>, Arc<CorrelationTable>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(CorrelationTable::new());
        let dispatcher = Arc::new(Dispatcher::new(correlation.clone(), BroadcastRegistry::new()));
        (MockGateway::new(rx, dispatcher), tx, correlation)
    }

    #[test]
    fn test_records_outbound_frames() {
        let (gw, tx, _) = gateway();
        tx.send(OutboundFrame::with_id("get_workloads", "m1".into(), Value::Null).queue().unwrap()).unwrap();
        tx.send(OutboundFrame::with_id("start_workload", "m2".into(), json!({"workload_id": "w1"})).queue().unwrap()).unwrap();

        assert_eq!(gw.sent_frames().unwrap().len(), 2);
        let start = gw.last_request("start_workload").unwrap();
        assert_eq!(start.msg_id, "m2");
        assert_eq!(start.body["workload_id"], "w1");
        assert!(gw.last_request("stop_workload").is_err());
    }

    #[test]
    fn test_reply_reaches_pending_completion() {
        let (gw, _tx, correlation) = gateway();
        let mut rx = correlation.register_oneshot("m1");

        let outcome = gw.reply("m1", "get_workloads_response", GatewayMessageBuilder::workloads_reply(vec![]));
        assert_eq!(outcome, DispatchOutcome::Reply { msg_id: "m1".into() });
        let payload = rx.try_recv().unwrap();
        assert_eq!(payload["op"], "get_workloads_response");
    }

    #[test]
    fn test_fixtures_decode_into_models() {
        let w: clusterdash::models::Workload = serde_json::from_value(GatewayMessageBuilder::workload("w1", "demo")).unwrap();
        assert_eq!(w.name, "demo");
        let k: clusterdash::models::DistributedKernel = serde_json::from_value(GatewayMessageBuilder::kernel("k1", 3)).unwrap();
        assert_eq!(k.replicas.len(), 3);
        let n: clusterdash::models::ClusterNode = serde_json::from_value(GatewayMessageBuilder::node("n1")).unwrap();
        assert!(n.enabled);
    }
}

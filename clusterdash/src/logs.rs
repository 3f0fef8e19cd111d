/**
 * LOG STREAMING - Logs de pods en flux continu, annulables
 *
 * Le signal d'arrêt est créé une fois par montage de la vue, déclenché par
 * l'utilisateur ("stop logs") ou au teardown, et jamais réarmé : une nouvelle
 * session de streaming exige un signal neuf.
 */

use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::gateway::{check_status, GatewayApi};
use crate::polling::FetchError;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log stream signal already triggered; create a fresh one")]
    SignalSpent,
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl From<reqwest::Error> for LogError {
    fn from(e: reqwest::Error) -> Self {
        LogError::Fetch(FetchError::Transport(e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRequest {
    pub pod: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default = "default_follow")]
    pub follow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStreamEnd {
    Completed,
    Cancelled,
}

/// Signal d'abandon à usage unique
#[derive(Debug, Clone, Default)]
pub struct LogStreamSignal {
    token: CancellationToken,
}

impl LogStreamSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Dernières lignes reçues, bornées
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

/// Découpe un flux de chunks en lignes complètes.
/// Les octets sont décodés ligne par ligne : un caractère UTF-8 coupé entre
/// deux chunks reste intact.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            out.push(decode_line(&line));
        }
        out
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(decode_line(&std::mem::take(&mut self.partial)))
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches(['\n', '\r']).to_string()
}

/// Streame les logs d'un pod dans `buffer` jusqu'à la fin du flux ou l'arrêt du signal
pub async fn stream_pod_logs(
    api: &GatewayApi,
    request: &LogRequest,
    signal: &LogStreamSignal,
    buffer: &LogBuffer,
) -> Result<LogStreamEnd, LogError> {
    if signal.is_triggered() {
        return Err(LogError::SignalSpent);
    }

    let mut req = api
        .stream_client()
        .get(api.url(&format!("/api/logs/pods/{}", request.pod)))
        .query(&[("follow", request.follow.to_string())]);
    if let Some(container) = &request.container {
        req = req.query(&[("container", container)]);
    }

    let resp = tokio::select! {
        resp = req.send() => check_status(resp?)?,
        _ = signal.token().cancelled() => return Ok(LogStreamEnd::Cancelled),
    };
    info!(pod = %request.pod, "log stream opened");

    let mut body = resp.bytes_stream();
    let mut splitter = LineSplitter::default();
    loop {
        tokio::select! {
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for line in splitter.feed(&bytes) {
                        buffer.push(line);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            _ = signal.token().cancelled() => {
                debug!(pod = %request.pod, "log stream cancelled");
                return Ok(LogStreamEnd::Cancelled);
            }
        }
    }
    if let Some(rest) = splitter.finish() {
        buffer.push(rest);
    }
    Ok(LogStreamEnd::Completed)
}

fn default_follow() -> bool {
    true
}

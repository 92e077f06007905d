//! Scripted stand-in for the market-data service, used by unit tests
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::transport::{Dialer, Transport};
use crate::error::SessionError;
use crate::types::Epoch;

/// Per-instrument failure injected into history responses
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    ApiError { code: String, message: String },
    MissingHistory,
    MismatchedLengths,
    Reversed,
    Silent,
}

#[derive(Default)]
struct RemoteState {
    ticks: HashMap<String, Vec<(Epoch, f64)>>,
    faults: HashMap<String, Fault>,
    outbox: VecDeque<String>,
    requests: Vec<Value>,
    dials: usize,
    closes: usize,
    reject_auth: bool,
    silent_auth: bool,
    unreachable: bool,
}

#[derive(Clone, Default)]
pub(crate) struct MockRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemote {
    pub fn new() -> Self {
        MockRemote::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    /// Make ticks available; they are served in epoch order
    pub fn push_ticks(&self, instrument: &str, ticks: &[(Epoch, f64)]) {
        let mut state = self.state();
        let series = state.ticks.entry(instrument.to_string()).or_default();
        series.extend_from_slice(ticks);
        series.sort_by_key(|(epoch, _)| *epoch);
    }

    pub fn set_fault(&self, instrument: &str, fault: Fault) {
        self.state().faults.insert(instrument.to_string(), fault);
    }

    pub fn clear_fault(&self, instrument: &str) {
        self.state().faults.remove(instrument);
    }

    pub fn reject_auth(&self) {
        self.state().reject_auth = true;
    }

    pub fn set_silent_auth(&self) {
        self.state().silent_auth = true;
    }

    pub fn set_unreachable(&self) {
        self.state().unreachable = true;
    }

    /// A late reply to an earlier request, delivered before the next real one
    pub fn queue_stale_reply(&self, req_id: u64) {
        let reply = json!({"history": {"times": [], "prices": []}, "req_id": req_id});
        self.state().outbox.push_back(reply.to_string());
    }

    pub fn dials(&self) -> usize {
        self.state().dials
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    /// Every `ticks_history` request received for `instrument`
    pub fn history_requests(&self, instrument: &str) -> Vec<Value> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.get("ticks_history").and_then(Value::as_str) == Some(instrument))
            .cloned()
            .collect()
    }

    fn respond(state: &mut RemoteState, request: &Value) -> Option<Value> {
        if request.get("authorize").is_some() {
            if state.silent_auth {
                return None;
            }
            if state.reject_auth {
                return Some(json!({
                    "error": {"code": "InvalidToken", "message": "The token is invalid."},
                    "msg_type": "authorize"
                }));
            }
            return Some(json!({
                "authorize": {"loginid": "VRTC000001", "currency": "USD"},
                "msg_type": "authorize"
            }));
        }

        if request.get("ping").is_some() {
            return Some(json!({"ping": "pong", "msg_type": "ping"}));
        }

        let instrument = request.get("ticks_history").and_then(Value::as_str)?;
        let count = request.get("count").and_then(Value::as_u64).unwrap_or(5000) as usize;
        let start = request.get("start").and_then(Value::as_i64);

        let available: Vec<(Epoch, f64)> = state
            .ticks
            .get(instrument)
            .map(|series| {
                series
                    .iter()
                    .filter(|(epoch, _)| start.map_or(true, |s| *epoch >= s))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        // Most recent `count` ticks ending at "latest"
        let served = &available[available.len().saturating_sub(count)..];
        let mut times: Vec<Epoch> = served.iter().map(|(e, _)| *e).collect();
        let mut prices: Vec<f64> = served.iter().map(|(_, p)| *p).collect();

        match state.faults.get(instrument).cloned() {
            Some(Fault::Silent) => None,
            Some(Fault::ApiError { code, message }) => Some(json!({
                "error": {"code": code, "message": message},
                "msg_type": "history"
            })),
            Some(Fault::MissingHistory) => Some(json!({"msg_type": "history"})),
            Some(Fault::MismatchedLengths) => {
                prices.push(0.0);
                Some(json!({"history": {"times": times, "prices": prices}}))
            }
            Some(Fault::Reversed) => {
                times.reverse();
                prices.reverse();
                Some(json!({"history": {"times": times, "prices": prices}}))
            }
            None => Some(json!({
                "history": {"times": times, "prices": prices},
                "msg_type": "history"
            })),
        }
    }
}

struct MockTransport {
    remote: MockRemote,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        let request: Value = serde_json::from_str(&text)?;
        let mut state = self.remote.state();
        state.requests.push(request.clone());

        if let Some(mut reply) = MockRemote::respond(&mut state, &request) {
            if let (Some(obj), Some(req_id)) = (reply.as_object_mut(), request.get("req_id")) {
                obj.insert("req_id".to_string(), req_id.clone());
            }
            state.outbox.push_back(reply.to_string());
        }
        Ok(())
    }

    async fn recv_text(&mut self) -> Result<String, SessionError> {
        let next = self.remote.state().outbox.pop_front();
        match next {
            Some(text) => Ok(text),
            // Nothing queued: behave like a remote that never answers
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.remote.state().closes += 1;
        Ok(())
    }
}

#[async_trait]
impl Dialer for MockRemote {
    async fn dial(&self, _url: &str) -> Result<Box<dyn Transport>, SessionError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(SessionError::WebSocket("Connection refused".to_string()));
        }
        state.dials += 1;
        state.outbox.clear();
        drop(state);

        Ok(Box::new(MockTransport {
            remote: self.clone(),
        }))
    }
}

//! Wire shapes of the market-data WebSocket protocol
use serde::{Deserialize, Serialize};

use crate::types::{Epoch, Instrument};

/// Any request, tagged with the id the remote echoes back
#[derive(Debug, Serialize)]
pub(crate) struct Envelope<'a, T: Serialize> {
    #[serde(flatten)]
    pub body: &'a T,
    pub req_id: u64,
}

#[derive(Serialize)]
pub struct AuthorizeRequest<'a> {
    pub authorize: &'a str,
}

#[derive(Debug, Serialize)]
pub struct PingRequest {
    pub ping: u8,
}

impl Default for PingRequest {
    fn default() -> Self {
        PingRequest { ping: 1 }
    }
}

/// Historical ticks ending at "latest", optionally bounded below by `start`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicksHistoryRequest {
    pub ticks_history: String,
    pub style: &'static str,
    pub end: &'static str,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<Epoch>,
}

impl TicksHistoryRequest {
    /// Resume one second after `cursor`, the last epoch already on disk
    pub fn new(instrument: &Instrument, count: u32, cursor: Option<Epoch>) -> Self {
        TicksHistoryRequest {
            ticks_history: instrument.as_str().to_string(),
            style: "ticks",
            end: "latest",
            count,
            start: cursor.map(|epoch| epoch + 1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeDetails {
    pub loginid: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeResponse {
    pub error: Option<ApiErrorBody>,
    pub authorize: Option<AuthorizeDetails>,
}

#[derive(Debug, Deserialize)]
pub struct PingResponse {
    pub error: Option<ApiErrorBody>,
    pub ping: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawHistory {
    pub times: Option<Vec<Epoch>>,
    pub prices: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub error: Option<ApiErrorBody>,
    pub history: Option<RawHistory>,
}

//! Authenticated session management
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::messages::{
    AuthorizeRequest, AuthorizeResponse, Envelope, PingRequest, PingResponse,
};
use crate::api::transport::{Dialer, Transport, WsDialer};
use crate::error::{ConnectionError, FetchError, SessionError};
use crate::types::{Config, Credential};

/// Establishes one authenticated session per cycle
pub struct Connector {
    url: String,
    credential: Option<Credential>,
    connect_timeout: Duration,
    request_timeout: Duration,
    dialer: Box<dyn Dialer>,
}

impl Connector {
    pub fn new(url: impl Into<String>, credential: Option<Credential>, dialer: Box<dyn Dialer>) -> Self {
        Connector {
            url: url.into(),
            credential,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            dialer,
        }
    }

    /// Real WebSocket connector configured from `config`
    pub fn websocket(config: &Config, credential: Option<Credential>) -> Self {
        Connector::new(
            config.api_url.clone(),
            credential,
            Box::new(WsDialer::new(config.connect_timeout())),
        )
        .with_timeouts(config.connect_timeout(), config.request_timeout())
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, request_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.request_timeout = request_timeout;
        self
    }

    /// Dial and authenticate.
    ///
    /// A transport that was opened is closed again on every failure path, so a
    /// failed connect never leaks a socket.
    pub async fn connect(&self) -> Result<Session, ConnectionError> {
        let credential = self
            .credential
            .as_ref()
            .ok_or_else(|| {
                ConnectionError::MissingCredential("no credential supplied to connector".to_string())
            })?;

        let transport = tokio::time::timeout(self.connect_timeout, self.dialer.dial(&self.url))
            .await
            .map_err(|_| ConnectionError::Timeout(self.connect_timeout))??;

        let mut session = Session::new(transport, self.request_timeout);

        match self.authorize(&mut session, credential).await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn authorize(&self, session: &mut Session, credential: &Credential) -> Result<(), ConnectionError> {
        let request = AuthorizeRequest {
            authorize: credential.expose(),
        };

        let response: AuthorizeResponse =
            tokio::time::timeout(self.connect_timeout, session.request(&request))
                .await
                .map_err(|_| ConnectionError::Timeout(self.connect_timeout))??;

        if let Some(error) = response.error {
            return Err(ConnectionError::AuthenticationFailed {
                code: error.code,
                message: error.message,
            });
        }

        let details = response.authorize.ok_or_else(|| {
            ConnectionError::UnexpectedResponse("neither authorize nor error present".to_string())
        })?;

        info!(
            "✅ Authenticated (account: {}, currency: {})",
            details.loginid.as_deref().unwrap_or("unknown"),
            details.currency.as_deref().unwrap_or("-")
        );
        Ok(())
    }
}

/// A live connection, usable for the remainder of one cycle
pub struct Session {
    transport: Box<dyn Transport>,
    request_timeout: Duration,
    next_req_id: u64,
    closed: bool,
}

impl Session {
    fn new(transport: Box<dyn Transport>, request_timeout: Duration) -> Self {
        Session {
            transport,
            request_timeout,
            next_req_id: 0,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send one request and wait for the response carrying the same `req_id`.
    ///
    /// Responses with another id are replies to earlier, abandoned requests
    /// and are skipped.
    pub async fn request<Req, Resp>(&mut self, body: &Req) -> Result<Resp, SessionError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        if self.closed {
            return Err(SessionError::Closed);
        }

        self.next_req_id += 1;
        let req_id = self.next_req_id;
        let text = serde_json::to_string(&Envelope { body, req_id })?;
        self.transport.send_text(text).await?;

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        loop {
            let text = match tokio::time::timeout_at(deadline, self.transport.recv_text()).await {
                Ok(Ok(text)) => text,
                Ok(Err(SessionError::Closed)) => {
                    // Remote hung up; nothing left to close on our side
                    self.closed = true;
                    return Err(SessionError::Closed);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(SessionError::Timeout(self.request_timeout)),
            };

            let value: Value = serde_json::from_str(&text)?;
            match value.get("req_id").and_then(Value::as_u64) {
                Some(id) if id != req_id => {
                    debug!("Skipping stale response for req_id {} (waiting for {})", id, req_id);
                }
                _ => return Ok(serde_json::from_value(value)?),
            }
        }
    }

    /// Liveness check
    pub async fn ping(&mut self) -> Result<(), FetchError> {
        let response: PingResponse = self.request(&PingRequest::default()).await?;
        if let Some(error) = response.error {
            return Err(FetchError::Api {
                code: error.code,
                message: error.message,
            });
        }
        match response.ping.as_deref() {
            Some("pong") => Ok(()),
            other => Err(FetchError::Api {
                code: "UnexpectedPing".to_string(),
                message: format!("unexpected ping reply {:?}", other),
            }),
        }
    }

    /// Close the underlying transport. Only the first call reaches the wire.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        match self.transport.close().await {
            Ok(()) => info!("Disconnected from market-data service"),
            Err(e) => warn!("Error while closing session: {}", e),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Session dropped without close()");
        }
    }
}

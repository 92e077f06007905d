//! Bounded historical tick requests
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::connector::Session;
use crate::api::messages::{HistoryResponse, TicksHistoryRequest};
use crate::error::FetchError;
use crate::types::{Batch, Config, Epoch, Instrument};
use crate::utils::{format_epoch, RateLimiter};

pub struct BatchFetcher {
    max_retries: u32,
    retry_delay: Duration,
    limiter: RateLimiter,
}

impl BatchFetcher {
    pub fn new(max_retries: u32, retry_delay: Duration, requests_per_second: u32) -> Self {
        BatchFetcher {
            max_retries: max_retries.max(1),
            retry_delay,
            limiter: RateLimiter::new(requests_per_second),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        BatchFetcher::new(config.max_retries, config.retry_delay(), config.requests_per_second)
    }

    /// Pull up to `max_count` ticks ending at "latest".
    ///
    /// With a cursor the request starts at `cursor + 1`, which excludes the tick
    /// already on disk. An empty batch means the instrument is caught up.
    pub async fn fetch(
        &self,
        session: &mut Session,
        instrument: &Instrument,
        max_count: u32,
        cursor: Option<Epoch>,
    ) -> Result<Batch, FetchError> {
        let request = TicksHistoryRequest::new(instrument, max_count, cursor);
        if let Some(start) = request.start {
            info!("Continuing {} from {} ({})", instrument, start, format_epoch(start));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            match self.fetch_once(session, instrument, &request).await {
                Ok(batch) => return Ok(batch),
                Err(e) if e.is_retryable() && attempt < self.max_retries && !session.is_closed() => {
                    warn!(
                        "Fetch attempt {}/{} for {} failed: {} - retrying in {:?}",
                        attempt, self.max_retries, instrument, e, self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(
        &self,
        session: &mut Session,
        instrument: &Instrument,
        request: &TicksHistoryRequest,
    ) -> Result<Batch, FetchError> {
        let response: HistoryResponse = session.request(request).await?;

        if let Some(error) = response.error {
            return Err(FetchError::Api {
                code: error.code,
                message: error.message,
            });
        }

        let history = response.history.ok_or(FetchError::MissingHistory)?;
        let (times, prices) = match (history.times, history.prices) {
            (Some(times), Some(prices)) => (times, prices),
            _ => return Err(FetchError::MissingHistory),
        };

        let batch = Batch::from_history(instrument, times, prices)?;
        if batch.len() > request.count as usize {
            return Err(FetchError::Oversized {
                len: batch.len(),
                max: request.count as usize,
            });
        }

        debug!("Received {} ticks for {}", batch.len(), instrument);
        Ok(batch)
    }
}

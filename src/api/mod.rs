pub mod connector;
pub mod fetcher;
pub mod messages;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use connector::{Connector, Session};
pub use fetcher::BatchFetcher;
pub use transport::{Dialer, Transport, WsDialer, WsTransport};

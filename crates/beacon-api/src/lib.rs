// beacon-api: Phoenix-channel realtime transport for Beacon display devices

pub mod envelope;
pub mod error;
pub mod phoenix;
pub mod transport;
pub mod websocket;

pub use envelope::{EventKind, InboundEnvelope};
pub use error::Error;
pub use transport::RealtimeTransport;
pub use websocket::{PhoenixSocket, SocketConfig, realtime_url};

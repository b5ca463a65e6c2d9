//! Live change stream from the task server

mod channel;
mod message;
mod transport;

pub use channel::{
    ChannelState, PushChannel, PushControl, PushHandler, PushOptions, ReconnectPolicy,
    MAX_RECONNECT_ATTEMPTS, PING_INTERVAL, RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY,
};
pub use message::{Inbound, Outbound};
pub use transport::{PushConnection, PushTransport, WebSocketTransport};

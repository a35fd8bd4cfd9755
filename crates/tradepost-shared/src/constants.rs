/// Event carrying a direct message from client to server
pub const EVENT_SEND_MESSAGE: &str = "sendMessage";

/// Event carrying a channel message from client to server
pub const EVENT_SEND_CHANNEL_MESSAGE: &str = "send-channel-message";

/// Event delivering a direct message to a client
pub const EVENT_RECEIVE_MESSAGE: &str = "receiveMessage";

/// Event delivering a channel message to a client
pub const EVENT_RECEIVE_CHANNEL_MESSAGE: &str = "receive-channel-message";

/// Event reporting a rejected client event
pub const EVENT_ERROR: &str = "error";

/// Maximum accepted size of a single WebSocket text frame (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Maximum upload size in bytes (50 MiB)
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8747;

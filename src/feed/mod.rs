//! Push channel: transport lifecycle, frame decoding, typed events.

pub mod decode;
pub mod events;
pub mod link;
pub mod stream;

pub use decode::decode;
pub use events::StreamEvent;
pub use link::{Link, LinkState};
pub use stream::{ConnectionHandle, ConnectionManager, ConnectionStatus, Connector, Frame, FrameStream, WsConnector};

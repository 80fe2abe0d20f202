pub mod client;
pub mod listeners;
pub mod transport;

pub use client::{SocketClient, SocketSettings};
pub use transport::{socket_url_from_api_url, WsConnector};

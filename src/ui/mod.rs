//! HTTP front end: client WebSocket, status API, live playlist and static files

pub mod handlers;
pub mod server;
pub mod websocket;

pub use server::{AppState, WebServer};

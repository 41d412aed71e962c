//! HTTP request handlers

pub mod handle_websocket;

pub use handle_websocket::websocket_handler;

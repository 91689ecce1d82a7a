pub mod connection;
pub mod events;
pub mod handler;
pub mod hub;
pub mod server;

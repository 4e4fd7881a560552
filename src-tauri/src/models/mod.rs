pub mod account;
pub mod connection;
pub mod error;
pub mod server;

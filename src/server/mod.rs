// src/server/mod.rs
pub mod handler;
pub mod supervisor;

pub use handler::RequestHandler;
pub use supervisor::ProxyServer;

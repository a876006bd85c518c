pub mod client;
pub mod config;
pub mod error;
pub mod gesture;
pub mod model_download;
pub mod pipeline;
pub mod publish;
pub mod retry;
pub mod server;
pub mod types;

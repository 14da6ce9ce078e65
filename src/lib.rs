pub mod config;
pub mod errors;
pub mod generator;
pub mod github;
pub mod hosting;
pub mod llm;
pub mod logging;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod publisher;
pub mod sanitize;
pub mod server;
pub mod util;

mod error;
mod handlers;
mod router;

use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

pub use router::handle_request;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

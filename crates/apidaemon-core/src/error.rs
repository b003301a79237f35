use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown plugin type '{kind}' for namespace '{name}'")]
    UnknownPluginKind { name: String, kind: String },

    #[error("Plugin '{name}': {message}")]
    Plugin { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

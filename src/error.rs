use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuesynthError {
    #[error("template error: {0}")]
    Template(String),
    #[error("unrecognized dataset \"{0}\"")]
    Dataset(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QuesynthError>;

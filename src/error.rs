use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid SSH public key: {0}")]
    InvalidKey(String),

    #[error("invalid repository name: {0}")]
    InvalidRepoName(String),

    #[error("git {service} exited with code {code}: {stderr}")]
    GitService {
        service: &'static str,
        code: i32,
        stderr: String,
    },

    #[error("{0}")]
    Hook(String),
}

pub type Result<T> = std::result::Result<T, Error>;

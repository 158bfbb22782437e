use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid partition count: {0}")]
    InvalidPartitionCount(u32),

    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Not enough nodes: need at least 1, have {0}")]
    NoNodes(usize),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

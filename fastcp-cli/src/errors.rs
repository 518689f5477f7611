use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid params JSON: {0}")]
    InvalidParams(#[source] serde_json::Error),

    #[error("Params must be a JSON object")]
    ParamsNotObject,

    #[error("Unexpected response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("{0}")]
    Client(#[from] fastcp_protocol::errors::ClientError),
}

pub type Result<T> = std::result::Result<T, CliError>;

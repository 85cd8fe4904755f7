use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("Invalid device group prefix {0:?}, expected \"<prefix>/<group>\"")]
    InvalidGroupPrefix(String),
    #[error("Pod {pod} no longer fits on node {node}: {reasons}")]
    PodNoLongerFits {
        pod: String,
        node: String,
        reasons: String,
    },
    #[error("Unknown device scheduler {0:?}")]
    UnknownScheduler(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::Error> for SchedError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<String> for SchedError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for SchedError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}

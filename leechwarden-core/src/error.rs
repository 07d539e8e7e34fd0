use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("Duration out of range: {0:?}")]
    DurationOutOfRange(std::time::Duration),
}

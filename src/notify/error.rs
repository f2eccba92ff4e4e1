use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint rejected request with status {status}")]
    Rejected { status: u16 },
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("User {user_id} is not a participant of session {session_id}")]
    NotParticipant { session_id: String, user_id: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Notification failure: {0}")]
    NotificationFailure(String),

    #[error("Corrupt document: {0}")]
    Corrupt(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

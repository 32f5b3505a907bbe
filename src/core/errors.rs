use thiserror::Error;

#[derive(Error, Debug)]
pub enum TutorError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Remote authorization failed: {0}")]
    RemoteAuth(String),

    #[error("Remote request failed ({status}): {message}")]
    RemoteTransport { status: u16, message: String },

    #[error("Unexpected content format: {0}")]
    ContentFormat(String),

    #[error("Local and remote data differ: {0}")]
    Conflict(String),

    #[error("Not signed in to cloud sync")]
    NotAuthenticated,

    #[error("I/O error: {0}")]
    Io(Box<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Reqwest error: {0}")]
    Reqwest(Box<reqwest::Error>),

    #[error("TutorError: {0}")]
    Custom(String),
}

impl TutorError {
    /// True when the stored credential should be dropped and the user asked to sign in again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, TutorError::RemoteAuth(_) | TutorError::NotAuthenticated)
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self, TutorError::RemoteTransport { .. } | TutorError::Reqwest(_))
    }
}

impl From<std::io::Error> for TutorError {
    fn from(error: std::io::Error) -> Self {
        TutorError::Io(Box::new(error))
    }
}

impl From<reqwest::Error> for TutorError {
    fn from(error: reqwest::Error) -> Self {
        if error.status().map(|s| s.as_u16()) == Some(401) {
            return TutorError::RemoteAuth(error.to_string());
        }
        TutorError::Reqwest(Box::new(error))
    }
}

impl From<base64::DecodeError> for TutorError {
    fn from(error: base64::DecodeError) -> Self {
        TutorError::ContentFormat(format!("invalid base64 audio: {error}"))
    }
}

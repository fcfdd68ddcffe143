use thiserror::Error;

/// Cluster API errors.
#[derive(Debug, Error)]
pub enum KubeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{reason} ({code}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("kubeconfig error: {0}")]
    Config(String),

    #[error("unexpected response from {path}: {message}")]
    Decode { path: String, message: String },
}

impl KubeError {
    pub fn api(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            KubeError::Api { code, .. } => Some(*code),
            KubeError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }
}

use std::fmt;

/// Failures raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("workbook encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("corrupt row in sheet '{sheet}': {detail}")]
    Corrupt { sheet: String, detail: String },

    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Why a model call failed, so the router can report a useful reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// 401/403
    Auth,
    /// 429 or quota exhausted
    RateLimit,
    /// DNS, connection refused, reset
    Network,
    Timeout,
    /// 5xx
    Server,
    /// 2xx with no usable text
    Malformed,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ModelErrorKind::Auth,
            402 | 429 => ModelErrorKind::RateLimit,
            408 => ModelErrorKind::Timeout,
            500..=599 => ModelErrorKind::Server,
            _ => ModelErrorKind::Unknown,
        };
        let message: String = body.chars().take(300).collect();
        Self {
            kind,
            status: Some(status),
            message,
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ModelErrorKind::Timeout
        } else if err.is_decode() {
            ModelErrorKind::Malformed
        } else {
            ModelErrorKind::Network
        };
        Self::new(kind, err.to_string())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Malformed, message)
    }

    /// Short plain-language reason for the end user.
    pub fn user_reason(&self) -> &'static str {
        match self.kind {
            ModelErrorKind::Auth => "the API key was rejected",
            ModelErrorKind::RateLimit => "the model quota is exhausted",
            ModelErrorKind::Network => "the model service is unreachable",
            ModelErrorKind::Timeout => "the model took too long to answer",
            ModelErrorKind::Server => "the model service is having an outage",
            ModelErrorKind::Malformed => "the model sent back an unusable answer",
            ModelErrorKind::Unknown => "the model call failed",
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{:?} ({}): {}", self.kind, status, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ModelError {}

/// Errors surfaced to the person using the coach.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A write failed part way through applying the parsed intents.
    #[error("{}", persistence_message(.saved, .failed, .source))]
    Persistence {
        saved: Vec<String>,
        failed: String,
        source: StoreError,
    },

    /// Something failed after the message's updates were written. Those
    /// writes stay in place and are listed here.
    #[error("{}", interrupted_message(.saved, .source))]
    Interrupted {
        saved: Vec<String>,
        #[source]
        source: Box<CoachError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn persistence_message(saved: &[String], failed: &str, source: &StoreError) -> String {
    if saved.is_empty() {
        format!("Could not save {}: {}. Nothing was saved.", failed, source)
    } else {
        format!(
            "Could not save {}: {}. Already saved: {}.",
            failed,
            source,
            saved.join(", ")
        )
    }
}

fn interrupted_message(saved: &[String], source: &CoachError) -> String {
    if saved.is_empty() {
        format!("{}. Nothing was saved from this message.", source)
    } else {
        format!("{}. Your update was saved: {}.", source, saved.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ModelError::from_status(401, "").kind, ModelErrorKind::Auth);
        assert_eq!(ModelError::from_status(429, "slow down").kind, ModelErrorKind::RateLimit);
        assert_eq!(ModelError::from_status(503, "").kind, ModelErrorKind::Server);
        assert_eq!(ModelError::from_status(418, "").kind, ModelErrorKind::Unknown);
    }

    #[test]
    fn test_persistence_message_lists_saved_writes() {
        let err = CoachError::Persistence {
            saved: vec!["Pullups = 15".to_string()],
            failed: "meal".to_string(),
            source: StoreError::Invalid("disk full".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("Already saved: Pullups = 15"));

        let err = CoachError::Persistence {
            saved: Vec::new(),
            failed: "Dips = 20".to_string(),
            source: StoreError::Poisoned,
        };
        assert!(err.to_string().contains("Nothing was saved"));
    }

    #[test]
    fn test_interrupted_message_states_saved_writes() {
        let err = CoachError::Interrupted {
            saved: vec!["Pullups = 15".to_string(), "Dips = 20".to_string()],
            source: Box::new(StoreError::Poisoned.into()),
        };
        assert_eq!(err.to_string(), "store lock poisoned. Your update was saved: Pullups = 15, Dips = 20.");

        let err = CoachError::Interrupted {
            saved: Vec::new(),
            source: Box::new(CoachError::Config("no key".to_string())),
        };
        assert_eq!(err.to_string(), "configuration error: no key. Nothing was saved from this message.");
    }
}

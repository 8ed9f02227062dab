use crate::error::ConfabError;
use tokio_util::sync::CancellationToken;

/// How an error ends a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// User-initiated; never shown as an error.
    Cancelled,
    /// A real failure, with the text to show the user.
    Failed(String),
}

/// Separate cancellation from genuine failures. The session token is the
/// only source of user cancellation, so anything that arrives after it fired
/// is a consequence of the stop. A connection dropped by the peer is a
/// failure like any other.
pub fn classify(error: &ConfabError, cancel: &CancellationToken) -> Termination {
    if cancel.is_cancelled() || matches!(error, ConfabError::Cancelled) {
        Termination::Cancelled
    } else {
        Termination::Failed(user_message(error))
    }
}

/// Human-readable text for the error message written into the thread.
pub fn user_message(error: &ConfabError) -> String {
    match error {
        ConfabError::Http(e) if e.is_connect() => {
            "Could not connect to the model provider. Is it running and reachable?".to_string()
        }
        ConfabError::Http(e) if e.is_timeout() => "The model provider timed out.".to_string(),
        ConfabError::Status { status, .. } if *status == 401 || *status == 403 => {
            format!("The model provider rejected the credentials ({status}).")
        }
        ConfabError::Status { status: 429, .. } => {
            "The model provider is rate limiting requests. Try again shortly.".to_string()
        }
        ConfabError::Status { status, body } => {
            let body: String = body.chars().take(200).collect();
            format!("The model provider returned {status}: {body}")
        }
        other => other.to_string(),
    }
}

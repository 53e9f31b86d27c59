use crate::signing::VerificationError;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

const MESSAGE_UNAUTHORIZED: &str = "Access token is not valid";
const MESSAGE_INTERNAL: &str = "An internal error has occurred, please try again later";
const MESSAGE_NOT_IMPLEMENTED: &str = "This operation is currently not supported";
const MESSAGE_PARSING_BODY: &str = "Error parsing body";

/// Classification of an [`Error`], stable across context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or transport failure reaching the provider.
    Transport,
    /// Provider answered with a non-2xx status.
    Provider,
    /// Inbound signature missing, malformed, unknown or mismatched.
    Authentication,
    /// Local configuration is unusable (bad secret encoding, empty keyring).
    Configuration,
    /// The known backlog tail was not successfully handled.
    IncompleteDrain,
    /// Inbound message version is not supported.
    NotImplemented,
    /// Inbound request could not be understood.
    BadRequest,
    /// The operation was cancelled before it completed.
    Cancelled,
}

/// Errors produced by the client, the verifier and the background pipelines.
///
/// Errors crossing a component boundary are wrapped with [`Error::context`];
/// [`Error::kind`], [`Error::status`] and [`Error::user_message`] always
/// answer for the innermost error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned {status}: {code}: {description}")]
    Provider {
        status: u16,
        code: String,
        description: String,
    },

    #[error("authentication failed: {0}")]
    Authentication(#[from] VerificationError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("last undeliverable message {message_id} was not handled")]
    IncompleteDrain { message_id: String },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("failed to decode body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn provider(status: u16, code: impl Into<String>, description: impl Into<String>) -> Self {
        Error::Provider {
            status,
            code: code.into(),
            description: description.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Wrap with an operation name.
    ///
    /// Wrapping an already-wrapped error extends its context chain
    /// (`"outer: inner"`) instead of nesting another layer.
    pub fn context(self, context: impl Into<String>) -> Self {
        match self {
            Error::Context {
                context: inner,
                source,
            } => Error::Context {
                context: format!("{}: {inner}", context.into()),
                source,
            },
            other => Error::Context {
                context: context.into(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error beneath any context wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::Transport(_) => ErrorKind::Transport,
            Error::Provider { .. } => ErrorKind::Provider,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::IncompleteDrain { .. } => ErrorKind::IncompleteDrain,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
            Error::BadRequest(_) | Error::Decode(_) => ErrorKind::BadRequest,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Context { .. } => unreachable!("root() never returns a context wrapper"),
        }
    }

    /// HTTP status a front end should answer with.
    pub fn status(&self) -> u16 {
        match self.root() {
            Error::Provider { status, .. } if matches!(status, 400 | 404) => *status,
            Error::Authentication(_) => 401,
            Error::NotImplemented(_) => 501,
            Error::BadRequest(_) | Error::Decode(_) => 400,
            _ => 500,
        }
    }

    /// Message that is safe to show to the caller of a front end.
    pub fn user_message(&self) -> String {
        match self.root() {
            Error::Provider {
                status,
                description,
                ..
            } if matches!(status, 400 | 404) => description.clone(),
            Error::Authentication(_) => MESSAGE_UNAUTHORIZED.to_string(),
            Error::NotImplemented(_) => MESSAGE_NOT_IMPLEMENTED.to_string(),
            Error::BadRequest(message) => message.clone(),
            Error::Decode(_) => MESSAGE_PARSING_BODY.to_string(),
            _ => MESSAGE_INTERNAL.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::Provider { status: 404, .. })
    }
}

/// Adds operation context to any result whose error converts into [`Error`].
pub trait ResultExt<T> {
    fn context(self, context: &str) -> Result<T>;

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_context_collapses_into_one_chain() {
        let err = Error::provider(404, "not_found", "Hook not found")
            .context("getHook")
            .context("reconcile");

        match &err {
            Error::Context { context, source } => {
                assert_eq!(context, "reconcile: getHook");
                assert!(matches!(**source, Error::Provider { .. }));
            }
            other => panic!("expected context wrapper, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "reconcile: getHook: provider returned 404: not_found: Hook not found"
        );
    }

    #[test]
    fn classification_survives_wrapping() {
        let err = Error::provider(400, "invalid_scope", "Scope is invalid").context("updateHookScope");
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert_eq!(err.status(), 400);
        assert_eq!(err.user_message(), "Scope is invalid");

        let err = Error::provider(503, "unavailable", "try later").context("listHooks");
        assert_eq!(err.status(), 500);
        assert_eq!(err.user_message(), MESSAGE_INTERNAL);

        let err = Error::from(VerificationError::MissingHeader).context("verify");
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.status(), 401);
        assert_eq!(err.user_message(), MESSAGE_UNAUTHORIZED);
    }

    #[test]
    fn result_ext_wraps_foreign_errors() {
        let parsed: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("{not json");
        let err = parsed.context("decodeMessage").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.user_message(), MESSAGE_PARSING_BODY);
        assert!(err.to_string().starts_with("decodeMessage: failed to decode body"));
    }

    #[test]
    fn not_found_is_detected_through_context() {
        assert!(Error::provider(404, "x", "y").context("a").is_not_found());
        assert!(!Error::provider(400, "x", "y").is_not_found());
    }
}

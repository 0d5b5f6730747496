use std::{fmt::Display, path::PathBuf, time::Duration};

#[derive(Debug, thiserror::Error)]
pub(crate) enum ExoError {
    #[error("{count} {kind}s are named {name:?}, use an ID instead")]
    Ambiguous {
        kind: String,
        name: String,
        count: usize,
    },

    #[error("API request failed ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Config(String),

    #[error("unable to access configuration file {}: {source}", .path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration file {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("file error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(
        "CLI command implementation error: {0}. This is a bug, and should be reported to the exo maintainers."
    )]
    Implementation(String),

    #[error("interactive prompt error: {0}")]
    Interactive(String),

    #[error("unable to introspect command output: {0}")]
    Introspection(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no API secret available for profile {0:?}")]
    MissingSecret(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("operation {id} failed: {reason}")]
    OperationFailed { id: String, reason: String },

    #[error("operation {0} timed out")]
    OperationTimeout(String),

    #[error("profile {0:?} already exists")]
    ProfileExists(String),

    #[error("profile {0:?} not found")]
    ProfileNotFound(String),

    #[error("configuration file {} is read-only", .0.display())]
    ReadOnlyConfig(PathBuf),

    #[error("template error: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("template error: {0}")]
    Template(#[from] Box<handlebars::TemplateError>),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Usage(String),

    #[error("xdg base directory error: {0}")]
    Xdg(#[from] xdg::BaseDirectoriesError),
}

impl ExoError {
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            ExoError::Usage(_) => 2,
            ExoError::Cancelled => 130,
            _ => 1,
        }
    }

    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, ExoError::NotFound(_))
    }

    pub(crate) fn usage(message: impl Into<String>) -> Self {
        ExoError::Usage(message.into())
    }
}

impl From<inquire::InquireError> for ExoError {
    fn from(err: inquire::InquireError) -> Self {
        match err {
            inquire::InquireError::OperationCanceled
            | inquire::InquireError::OperationInterrupted => ExoError::Cancelled,
            other => ExoError::Interactive(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ExoError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ExoError::Cancelled
        } else {
            ExoError::Implementation(format!("background task panicked: {err}"))
        }
    }
}

// Output values are introspected through a serde serializer whose error type is this one.
impl serde::ser::Error for ExoError {
    fn custom<T: Display>(msg: T) -> Self {
        ExoError::Introspection(msg.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::ExoError;

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(ExoError::usage("missing NAME").exit_code(), 2);
        assert_eq!(ExoError::Cancelled.exit_code(), 130);
        assert_eq!(ExoError::NotFound("instance \"foo\"".into()).exit_code(), 1);
        assert_eq!(ExoError::ProfileNotFound("prod".into()).exit_code(), 1);
        let ambiguous = ExoError::Ambiguous {
            kind: "instance".into(),
            name: "web".into(),
            count: 2,
        };
        assert_eq!(ambiguous.exit_code(), 1);
        assert_eq!(
            ambiguous.to_string(),
            "2 instances are named \"web\", use an ID instead"
        );
    }

    #[test]
    fn interrupted_prompts_become_cancellation() {
        let err: ExoError = inquire::InquireError::OperationInterrupted.into();
        assert!(matches!(err, ExoError::Cancelled));
    }
}

/// Result alias that carries the custom [`VignetteError`] type.
pub type Result<T> = std::result::Result<T, VignetteError>;

/// Common error type for the core crate.
///
/// Most failures are absorbed where they happen and only traced. The variants
/// below exist so the few fallible entry points (construction, config loading,
/// artwork fetching, transport setup) can say what went wrong.
#[derive(Debug, thiserror::Error)]
pub enum VignetteError {
    /// Free-form message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// The render surface could not provide a container to draw into.
    #[error("container not found: {0}")]
    MissingContainer(String),
    /// Websocket construction, handshake or send failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Artwork could not be fetched or read.
    #[error("artwork error: {0}")]
    Artwork(String),
    /// Wrapper around image decoding errors.
    #[error("{0}")]
    Image(#[from] image::ImageError),
    /// Wrapper around JSON (de)serialisation errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl VignetteError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for VignetteError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VignetteError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<tungstenite::Error> for VignetteError {
    fn from(value: tungstenite::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_container_names_selector() {
        let err = VignetteError::MissingContainer("now-playing".into());
        assert_eq!(err.to_string(), "container not found: now-playing");
    }

    #[test]
    fn converts_from_strings() {
        let err: VignetteError = "boom".into();
        assert!(matches!(err, VignetteError::Message(ref m) if m == "boom"));
    }
}

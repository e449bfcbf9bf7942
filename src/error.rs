use serde::{Deserialize, Serialize};

/// Result type for duplex-rpc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire error code carried when a call reaches a channel that has begun
/// closing, and the reason a disconnected channel rejects work.
pub const CODE_CHANNEL_CLOSED: &str = "ERR_IPC_CHANNEL_CLOSED";
/// Wire error code carried when a call names a procedure the peer never
/// registered.
pub const CODE_UNDEFINED_FUNCTION: &str = "ERR_UNDEFINED_FUNCTION";

/// Error type for duplex-rpc.
///
/// Errors are `Clone` because one destroy reason settles every call that is
/// still pending on the channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The channel is not open: `emit` and `call` on a closing or closed
    /// channel, an inbound call bounced by a closing peer, or a disconnect.
    #[error("channel is closed")]
    ChannelClosed,
    /// The peer has no function registered under the called name.
    #[error(transparent)]
    UndefinedFunction(RemoteError),
    /// A function was registered twice under one name. Registration is
    /// permanent, so the second registration is refused.
    #[error("function '{name}' has already been registered")]
    DuplicateRegistration {
        /// The name that was already taken.
        name: String,
    },
    /// The called function failed on the peer. Code, message, and stack are
    /// preserved from the remote failure.
    #[error(transparent)]
    Remote(RemoteError),
    /// The channel was destroyed with no more specific reason.
    #[error("cancelled")]
    Cancelled,
    /// The transport under the channel failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<RemoteError> for Error {
    /// Reconstitute a response error payload as a typed error. Known wire
    /// codes map back to their local variants; everything else is a plain
    /// remote failure.
    fn from(payload: RemoteError) -> Self {
        match payload.code.as_deref() {
            Some(CODE_CHANNEL_CLOSED) => Error::ChannelClosed,
            Some(CODE_UNDEFINED_FUNCTION) => Error::UndefinedFunction(payload),
            _ => Error::Remote(payload),
        }
    }
}

/// A failure that occurred on the peer while it executed a called procedure.
///
/// This is also the wire payload of a failed response: `{code?, message,
/// stack?}`. Handlers fail with a `RemoteError`; the channel ships it to the
/// caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    /// Machine-readable code, when the failure has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable description of the failure.
    pub message: String,
    /// Stack trace captured where the failure happened, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RemoteError {
    /// A failure with a message and nothing else.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            stack: None,
        }
    }

    /// Attach a machine-readable code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub(crate) fn channel_closed() -> Self {
        Self::new("channel is closed").with_code(CODE_CHANNEL_CLOSED)
    }

    pub(crate) fn undefined_function(name: &str) -> Self {
        Self::new(format!("{name} is not defined")).with_code(CODE_UNDEFINED_FUNCTION)
    }

    pub(crate) fn from_panic(panic: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(text) = panic.downcast_ref::<&str>() {
            (*text).to_owned()
        } else if let Some(text) = panic.downcast_ref::<String>() {
            text.clone()
        } else {
            "function panicked".to_owned()
        };
        Self::new(message)
    }
}

impl From<String> for RemoteError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for RemoteError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Failure of the transport under a channel. Unrecoverable for that channel:
/// the driver destroys itself when it observes one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer end of the transport is gone.
    #[error("transport is closed")]
    Closed,
    /// The transport failed to move bytes.
    #[error("i/o failure: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_codes_map_to_typed_variants() {
        let closed = RemoteError::channel_closed();
        assert!(matches!(Error::from(closed), Error::ChannelClosed));

        let undefined = RemoteError::undefined_function("missing");
        let error = Error::from(undefined);
        assert!(matches!(error, Error::UndefinedFunction(_)));
        assert_eq!(error.to_string(), "missing is not defined");
    }

    #[test]
    fn unknown_codes_stay_remote() {
        let payload = RemoteError::new("boom").with_code("ERR_CUSTOM");
        match Error::from(payload) {
            Error::Remote(remote) => assert_eq!(remote.message, "boom"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EkoError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Header-level failures. Any of these poisons the framer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported encoding tag {0}")]
    UnsupportedEncoding(u8),

    #[error("unsupported packet type {0}")]
    UnsupportedType(u8),

    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("framer already failed")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("encoded payload is {0} bytes, over the packet limit")]
    TooLarge(usize),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Unsupported handshake version {0}")]
    UnsupportedVersion(u8),

    #[error("Malformed handshake message: expected {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} is {len} bytes (max {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} contains control characters")]
    ControlCharacters { field: &'static str },

    #[error("{field} is not a #RRGGBB color")]
    BadColor { field: &'static str },

    #[error("{0}")]
    Invalid(String),
}

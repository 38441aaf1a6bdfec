use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("unknown message tag: {0}")]
    UnknownTag(u8),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("missing field `{0}` in {1} payload")]
    MissingField(&'static str, &'static str),

    #[error("payload does not match tag `{kind}`: {reason}")]
    PayloadShape { kind: &'static str, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

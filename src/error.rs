use std::process::ExitCode;

/// Errors that cause placeherd to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("cannot listen on {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl ExitError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::Config(_) => ExitCode::from(2),
            ExitError::Bind { .. } => ExitCode::from(3),
            ExitError::Other(_) => ExitCode::from(1),
        }
    }
}

/// A collaborator (canvas snapshot or template document) could not be fetched.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fetched bytes could not be turned into a bitmap or a template document.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("undecodable bitmap: {0}")]
    Image(#[from] image::ImageError),

    #[error("malformed template document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("template document is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// A template refresh that left the previous template in place.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A worker sent something the dispatch loop cannot process.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not a JSON object: {0}")]
    Malformed(String),

    #[error("binary frames are not part of the protocol")]
    BinaryFrame,
}

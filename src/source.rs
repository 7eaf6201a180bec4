//! External collaborators: canvas snapshots and the template document.
//!
//! Both are blocking (`ureq` or the filesystem); the maintenance task calls
//! them from `spawn_blocking`. HTTP bodies are capped at
//! [`DEFAULT_MAX_BODY_BYTES`] unless configured otherwise.

use std::path::PathBuf;
use std::time::Duration;

use image::RgbImage;

use crate::error::{DecodeError, FetchError};

/// Largest HTTP body read from a canvas or template location.
pub const DEFAULT_MAX_BODY_BYTES: u64 = 256 * 1024 * 1024;

/// Where the template descriptor comes from.
pub trait TemplateSource: Send + Sync {
    /// Raw document bytes; decoding is the caller's job.
    fn fetch_document(&self) -> Result<Vec<u8>, FetchError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Where canvas snapshots come from.
pub trait CanvasSource: Send + Sync {
    /// One result per selected region. `enabled` lists region indices to
    /// fetch; `None` selects every region. A failed region does not prevent
    /// the others from being returned.
    fn fetch_regions(&self, enabled: Option<&[usize]>) -> Vec<Result<RegionBytes, FetchError>>;
}

/// Encoded bitmap for one region plus where it goes on the board.
#[derive(Debug, Clone)]
pub struct RegionBytes {
    pub origin: String,
    pub bytes: Vec<u8>,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl RegionBytes {
    pub fn decode(&self) -> Result<RgbImage, DecodeError> {
        Ok(image::load_from_memory(&self.bytes)?.to_rgb8())
    }
}

/// A URL or a local path. Anything starting with `http` is fetched over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Http(String),
    File(PathBuf),
}

impl Location {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Http(raw.to_string())
        } else {
            Self::File(PathBuf::from(raw))
        }
    }

    fn fetch(&self, agent: &ureq::Agent, max_body: u64) -> Result<Vec<u8>, FetchError> {
        match self {
            Self::Http(url) => {
                let response = agent.get(url).call().map_err(|e| http_error(url, e))?;
                let mut body = response.into_body();
                body.with_config()
                    .limit(max_body)
                    .read_to_vec()
                    .map_err(|e| http_error(url, e))
            }
            Self::File(path) => std::fs::read(path).map_err(|source| FetchError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(url) => f.write_str(url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

fn http_error(url: &str, error: ureq::Error) -> FetchError {
    match error {
        ureq::Error::StatusCode(status) => FetchError::Status {
            url: url.to_string(),
            status,
        },
        other => FetchError::Transport {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Template document from a URL or file.
pub struct DocumentSource {
    location: Location,
    agent: ureq::Agent,
    max_body: u64,
}

impl DocumentSource {
    pub fn new(location: &str, timeout: Duration) -> Self {
        Self {
            location: Location::parse(location),
            agent: agent(timeout),
            max_body: DEFAULT_MAX_BODY_BYTES,
        }
    }

    #[must_use]
    pub const fn with_max_body(mut self, bytes: u64) -> Self {
        self.max_body = bytes;
        self
    }
}

impl TemplateSource for DocumentSource {
    fn fetch_document(&self) -> Result<Vec<u8>, FetchError> {
        self.location.fetch(&self.agent, self.max_body)
    }

    fn describe(&self) -> String {
        self.location.to_string()
    }
}

/// Fixed list of snapshot locations, each placed at an offset.
pub struct RegionSource {
    regions: Vec<(Location, u32, u32)>,
    agent: ureq::Agent,
    max_body: u64,
}

impl RegionSource {
    pub fn new(regions: impl IntoIterator<Item = (String, u32, u32)>, timeout: Duration) -> Self {
        Self {
            regions: regions
                .into_iter()
                .map(|(raw, x, y)| (Location::parse(&raw), x, y))
                .collect(),
            agent: agent(timeout),
            max_body: DEFAULT_MAX_BODY_BYTES,
        }
    }

    #[must_use]
    pub const fn with_max_body(mut self, bytes: u64) -> Self {
        self.max_body = bytes;
        self
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl CanvasSource for RegionSource {
    fn fetch_regions(&self, enabled: Option<&[usize]>) -> Vec<Result<RegionBytes, FetchError>> {
        self.regions
            .iter()
            .enumerate()
            .filter(|(index, _)| enabled.is_none_or(|list| list.contains(index)))
            .map(|(_, (location, offset_x, offset_y))| {
                location.fetch(&self.agent, self.max_body).map(|bytes| RegionBytes {
                    origin: location.to_string(),
                    bytes,
                    offset_x: *offset_x,
                    offset_y: *offset_y,
                })
            })
            .collect()
    }
}

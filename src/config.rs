use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::auth::AdminAuth;
use crate::coordinator::CoordinatorOptions;
use crate::error::ExitError;
use crate::palette::{ColorId, Palette, WHITE};
use crate::session::DEFAULT_MAX_CAPACITY;
use crate::source::{DEFAULT_MAX_BODY_BYTES, DocumentSource, RegionSource};

/// Config file name constants.
pub const CONFIG_TOML: &str = "placeherd.toml";
pub const CONFIG_JSON: &str = "placeherd.json";

pub const DEFAULT_TEMPLATE_SOURCE: &str = "https://placede.github.io/pixel/pixel.json";

/// Largest board the server will allocate (4096 x 4096 cells).
pub const MAX_BOARD_CELLS: u64 = 16_777_216;

/// Environment variables that override file settings.
pub const ENV_LISTEN: &str = "PLACEHERD_LISTEN";
pub const ENV_TEMPLATE_SOURCE: &str = "PLACEHERD_TEMPLATE_SOURCE";
pub const ENV_ADMIN_DIGEST: &str = "PLACEHERD_ADMIN_DIGEST";
pub const ENV_ADMIN_SALT: &str = "PLACEHERD_ADMIN_SALT";

/// Find the config file path, preferring placeherd.toml over placeherd.json.
/// Returns None if neither exists.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    let toml_path = dir.join(CONFIG_TOML);
    if toml_path.exists() {
        return Some(toml_path);
    }
    let json_path = dir.join(CONFIG_JSON);
    if json_path.exists() {
        return Some(json_path);
    }
    None
}

/// Per-user config location (`$XDG_CONFIG_HOME/placeherd/placeherd.toml` on Linux).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("placeherd").join(CONFIG_TOML))
}

/// Top-level server configuration.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServerConfig {
    /// Address the WebSocket and HTTP listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub template: TemplateConfig,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            board: BoardConfig::default(),
            template: TemplateConfig::default(),
            canvas: CanvasConfig::default(),
            sessions: SessionsConfig::default(),
            admin: AdminConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BoardConfig {
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    /// Palette id every cell holds before the first observation.
    #[serde(default = "default_background")]
    pub background: ColorId,
    /// Start with every cell undetermined instead of `background`.
    #[serde(default)]
    pub start_unknown: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            width: default_dimension(),
            height: default_dimension(),
            background: default_background(),
            start_unknown: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TemplateConfig {
    /// URL (http/https) or local path of the template document.
    #[serde(default = "default_template_source")]
    pub source: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            source: default_template_source(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

/// One canvas snapshot placed at a board offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RegionConfig {
    pub url: String,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CanvasConfig {
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
    #[serde(default = "default_cycle_delay")]
    pub cycle_delay_secs: u64,
    /// Applies to canvas and template fetches.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Largest HTTP body accepted from canvas and template fetches.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            cycle_delay_secs: default_cycle_delay(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionsConfig {
    /// Largest capacity a single handshake may declare.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AdminConfig {
    /// Hex SHA-512 of salt followed by password (see `placeherd hash-password`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_digest: Option<String>,
    #[serde(default)]
    pub salt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReconcileConfig {
    /// Fixed jitter seed for reproducible queue order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

// Default value functions for serde
fn default_listen() -> String { "0.0.0.0:8080".into() }
const fn default_dimension() -> u32 { 2000 }
const fn default_background() -> ColorId { WHITE }
fn default_template_source() -> String { DEFAULT_TEMPLATE_SOURCE.into() }
const fn default_refresh_interval() -> u64 { 60 }
const fn default_cycle_delay() -> u64 { 30 }
const fn default_fetch_timeout() -> u64 { 20 }
const fn default_max_body_bytes() -> u64 { DEFAULT_MAX_BODY_BYTES }
const fn default_max_capacity() -> u32 { DEFAULT_MAX_CAPACITY }

impl ServerConfig {
    /// Load config from a file (TOML or JSON, auto-detected by extension).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "toml" => Self::parse_toml(&contents),
            "json" => Self::parse_json(&contents),
            _ => Self::parse_toml(&contents).or_else(|_| Self::parse_json(&contents)),
        }
    }

    /// Parse config from a TOML string.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_TOML}: {e}")).into())
    }

    /// Parse config from a JSON string.
    pub fn parse_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_JSON}: {e}")).into())
    }

    /// Serialize config to a TOML string with section comments.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        fn set_table_comment(doc: &mut toml_edit::DocumentMut, key: &str, comment: &str) {
            if let Some(tbl) = doc.get_mut(key).and_then(toml_edit::Item::as_table_mut) {
                tbl.decor_mut().set_prefix(comment);
            }
        }

        let raw = toml::to_string_pretty(self).context("serializing config to TOML")?;
        let mut doc: toml_edit::DocumentMut = raw
            .parse()
            .context("parsing generated TOML for comment injection")?;

        doc.decor_mut()
            .set_prefix("# placeherd server configuration\n# Print the full schema with `placeherd schema`\n\n");

        set_table_comment(&mut doc, "board", "\n# Canvas dimensions and the color assumed before observation\n");
        set_table_comment(&mut doc, "template", "\n# Target template document (URL or local path)\n");
        set_table_comment(
            &mut doc,
            "canvas",
            "\n# Canvas snapshots, each a PNG placed at (x, y)\n# [[canvas.regions]]\n# url = \"https://example.com/canvas-0.png\"\n# x = 0\n# y = 0\n",
        );
        set_table_comment(&mut doc, "sessions", "\n# Worker session limits\n");
        set_table_comment(
            &mut doc,
            "admin",
            "\n# Privileged bot-count query; set password_digest to enable\n",
        );
        set_table_comment(&mut doc, "reconcile", "\n# Set seed for reproducible queue order\n");

        Ok(doc.to_string())
    }

    /// Load from `explicit`, else the first config found in `cwd`, else the
    /// per-user config, else defaults. Environment overrides and validation
    /// are applied in every case.
    pub fn resolve(explicit: Option<&Path>, cwd: &Path) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(
                    ExitError::Config(format!("{} does not exist", path.display())).into(),
                );
            }
            Some(path) => Some(path.to_path_buf()),
            None => find_config(cwd).or_else(|| default_config_path().filter(|p| p.exists())),
        };

        let mut config = match &path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::load(path)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok((config, path))
    }

    /// Apply `PLACEHERD_*` overrides. Empty values are ignored.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(listen) = var(ENV_LISTEN) {
            self.listen = listen;
        }
        if let Some(source) = var(ENV_TEMPLATE_SOURCE) {
            self.template.source = source;
        }
        if let Some(digest) = var(ENV_ADMIN_DIGEST) {
            self.admin.password_digest = Some(digest);
        }
        if let Some(salt) = var(ENV_ADMIN_SALT) {
            self.admin.salt = salt;
        }
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let invalid = |msg: String| -> anyhow::Result<()> { Err(ExitError::Config(msg).into()) };

        self.listen_addr()?;
        if self.board.width == 0 || self.board.height == 0 {
            return invalid(format!(
                "board dimensions must be positive, got {}x{}",
                self.board.width, self.board.height
            ));
        }
        if u64::from(self.board.width) * u64::from(self.board.height) > MAX_BOARD_CELLS {
            return invalid(format!(
                "board {}x{} exceeds the {MAX_BOARD_CELLS}-cell limit",
                self.board.width, self.board.height
            ));
        }
        if !Palette::global().contains(self.board.background) {
            return invalid(format!(
                "board.background {} is not a palette id",
                self.board.background
            ));
        }
        if self.template.source.trim().is_empty() {
            return invalid("template.source must not be empty".into());
        }
        if self.canvas.fetch_timeout_secs == 0 {
            return invalid("canvas.fetch_timeout_secs must be positive".into());
        }
        if self.canvas.max_body_bytes == 0 {
            return invalid("canvas.max_body_bytes must be positive".into());
        }
        if let Some(region) = self.canvas.regions.iter().find(|r| r.url.trim().is_empty()) {
            return invalid(format!(
                "canvas region at ({}, {}) has no url",
                region.x, region.y
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            ExitError::Config(format!("invalid listen address {:?}: {e}", self.listen)).into()
        })
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            width: self.board.width,
            height: self.board.height,
            background: (!self.board.start_unknown).then_some(self.board.background),
            refresh_interval: Duration::from_secs(self.template.refresh_interval_secs),
            max_capacity: self.sessions.max_capacity,
            seed: self.reconcile.seed,
        }
    }

    pub fn admin_auth(&self) -> AdminAuth {
        AdminAuth::new(self.admin.salt.clone(), self.admin.password_digest.as_deref())
    }

    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.canvas.fetch_timeout_secs)
    }

    pub const fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.canvas.cycle_delay_secs)
    }

    pub fn template_source(&self) -> DocumentSource {
        DocumentSource::new(&self.template.source, self.fetch_timeout())
            .with_max_body(self.canvas.max_body_bytes)
    }

    pub fn canvas_source(&self) -> RegionSource {
        RegionSource::new(
            self.canvas
                .regions
                .iter()
                .map(|r| (r.url.clone(), r.x, r.y)),
            self.fetch_timeout(),
        )
        .with_max_body(self.canvas.max_body_bytes)
    }
}

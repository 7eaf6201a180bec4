use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::config::{CONFIG_TOML, ServerConfig};
use crate::error::ExitError;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Where to write the config (a directory or a file path)
    #[arg(long)]
    pub path: Option<PathBuf>,
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Write a commented default config.
    pub fn execute(&self) -> Result<()> {
        let target = match &self.path {
            Some(path) if path.is_dir() => path.join(CONFIG_TOML),
            Some(path) => path.clone(),
            None => std::env::current_dir()
                .context("reading current directory")?
                .join(CONFIG_TOML),
        };

        if target.exists() && !self.force {
            return Err(ExitError::Config(format!(
                "{} already exists (use --force to overwrite)",
                target.display()
            ))
            .into());
        }

        let contents = ServerConfig::default().to_toml()?;
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&target, contents).with_context(|| format!("writing {}", target.display()))?;

        println!("Wrote {}", target.display());
        Ok(())
    }
}

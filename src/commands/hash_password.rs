use std::io::IsTerminal;

use anyhow::Context;
use clap::Args;

use crate::auth::AdminAuth;
use crate::error::ExitError;

#[derive(Debug, Args)]
pub struct HashPasswordArgs {
    /// Salt prepended to the password before hashing
    #[arg(long, default_value = "")]
    pub salt: String,
    /// Password to hash (prompted for when omitted)
    #[arg(long)]
    pub password: Option<String>,
}

impl HashPasswordArgs {
    /// Print the digest to paste into `[admin] password_digest`.
    pub fn execute(&self) -> anyhow::Result<()> {
        let password = match &self.password {
            Some(password) => password.clone(),
            None if std::io::stdin().is_terminal() => dialoguer::Password::new()
                .with_prompt("Admin password")
                .with_confirmation("Repeat password", "passwords do not match")
                .interact()
                .context("reading password")?,
            None => {
                return Err(ExitError::Other(
                    "--password is required when stdin is not a terminal".into(),
                )
                .into());
            }
        };
        if password.is_empty() {
            return Err(ExitError::Other("password must not be empty".into()).into());
        }

        println!("{}", AdminAuth::digest(&self.salt, &password));
        Ok(())
    }
}

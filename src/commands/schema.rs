use schemars::schema_for;

use crate::config::ServerConfig;

/// Print the JSON Schema for `placeherd.toml` to stdout.
pub fn run_schema() -> anyhow::Result<()> {
    let schema = schema_for!(ServerConfig);
    let json = serde_json::to_string_pretty(&schema)?;
    println!("{json}");
    Ok(())
}

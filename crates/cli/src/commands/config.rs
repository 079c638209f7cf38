use anyhow::{Context, Result};
use searchd::config::Config;

/// Print the effective config as TOML
pub fn cmd_config_show(config: &Config) -> Result<()> {
  let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
  match Config::user_config_path() {
    Some(path) if path.exists() => println!("# user config: {}\n", path.display()),
    _ => println!("# no config file found, showing defaults\n"),
  }
  print!("{}", rendered);
  Ok(())
}

/// Configuration management command handlers
use anyhow::Result;
use clap::Subcommand;
use flowstate_core::{config::default_config_path, EngineConfig};

use super::helpers::print_rule;

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

pub fn handle_config_command(action: ConfigAction) -> Result<()> {
    let path = default_config_path()?;
    match action {
        ConfigAction::Show => {
            let config = EngineConfig::load(&path)?;
            println!("Configuration ({})", path.display());
            print_rule(28);
            if !path.exists() {
                println!("# no config file, showing defaults");
            }
            println!("{}", mask_api_key(&config.to_toml()?));
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                println!("{} already exists (use --force to overwrite)", path.display());
                return Ok(());
            }
            EngineConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}

/// Hide all but the first characters of `api_key` lines
fn mask_api_key(toml: &str) -> String {
    toml.lines()
        .map(|line| match line.split_once(" = ") {
            Some(("api_key", value)) => {
                let visible: String = value.trim_matches('"').chars().take(8).collect();
                format!("api_key = \"{visible}***\"")
            }
            _ => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_api_key() {
        let masked = mask_api_key("[ai]\napi_key = \"gsk_1234567890abcdef\"\nenabled = true");
        assert_eq!(masked, "[ai]\napi_key = \"gsk_1234***\"\nenabled = true");
    }
}

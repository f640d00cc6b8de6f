use clap::Subcommand;
use worktally_core::Config;

use super::{load_config, print_json, CliResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file plus environment) as JSON
    Show,
    /// Get a config value
    Get {
        /// Config key (e.g. "effort.hours_per_push", "states.activate_to")
        key: String,
    },
    /// Set a value in the config file
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// Print the config file location
    Path,
}

pub fn run(action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Show => {
            let config = load_config()?;
            let mut json = serde_json::to_value(&config)?;
            if !config.azure_devops.pat.is_empty() {
                json["azure_devops"]["pat"] = "********".into();
            }
            print_json(&json)?;
        }
        ConfigAction::Get { key } => {
            let config = load_config()?;
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => return Err(format!("unknown key: {key}").into()),
            }
        }
        ConfigAction::Set { key, value } => {
            // Environment overrides are not written back to the file.
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            println!("ok");
        }
        ConfigAction::Path => {
            println!("{}", Config::path()?.display());
        }
    }
    Ok(())
}

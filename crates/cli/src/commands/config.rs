//! Show or write the resolved configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use personalizer_common::SuiteConfig;

use crate::output::print_success;

#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Write the resolved configuration to this file instead of printing it
    #[arg(long)]
    pub write: Option<PathBuf>,
}

pub fn execute(args: ConfigArgs, config: &SuiteConfig) -> Result<bool> {
    match args.write {
        Some(path) => {
            config.save(&path)?;
            print_success(&format!("Configuration written to {}", path.display()));
        }
        None => println!("{}", toml::to_string_pretty(config)?),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("personalizer.toml");

        let mut config = SuiteConfig::default();
        config.retry.max_retries = 4;
        execute(ConfigArgs { write: Some(path.clone()) }, &config).unwrap();

        let loaded = SuiteConfig::load(&path).unwrap();
        assert_eq!(loaded.retry.max_retries, 4);
        assert_eq!(loaded.endpoints.rank_path, "/personalizerwrapperapi/v01/rank");
    }
}

//! `qbit config`: print the resolved client configuration.

use std::path::Path;

use qbit_client::ClientConfig;

use crate::VERSION;

const REDACTED: &str = "********";

pub fn run(config: &ClientConfig, data_dir: &Path, config_path: &Path) -> anyhow::Result<()> {
    println!();
    println!("  QBit v{}", VERSION);
    println!("  Data dir: {}", data_dir.display());
    if config_path.exists() {
        println!("  Config file: {}", config_path.display());
    } else {
        println!("  Config file: {} (not found, using defaults)", config_path.display());
    }
    println!();
    print!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

fn redacted(config: &ClientConfig) -> ClientConfig {
    let mut shown = config.clone();
    if shown.auth_token.is_some() {
        shown.auth_token = Some(REDACTED.to_string());
    }
    shown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_never_printed() {
        let config = ClientConfig {
            auth_token: Some("secret-token".into()),
            ..Default::default()
        };
        let out = toml::to_string_pretty(&redacted(&config)).unwrap();
        assert!(!out.contains("secret-token"));
        assert!(out.contains(REDACTED));
        assert!(out.contains("base_url"));
    }
}

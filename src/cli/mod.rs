//! CLI module for keyward
//!
//! Offline helpers around the key service:
//! - `generate`: mint plaintext keys and their digests
//! - `hash`: digest an existing key
//! - `sweep`: remove expired records from the configured key store

pub mod generate;
pub mod hash;
pub mod sweep;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// keyward - API key issuance, verification and rate limiting
#[derive(Parser)]
#[command(name = "keyward")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate plaintext keys and print them with their digests
    Generate(generate::GenerateArgs),

    /// Print the stored digest of a key
    Hash(hash::HashArgs),

    /// Remove one batch of expired keys
    Sweep(sweep::SweepArgs),
}

/// Load `.env` and the layered config, then install logging
fn bootstrap() -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    logging::init_logging(&config.logging)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["keyward", "generate", "--count", "3", "--kind", "hex"])
            .unwrap();
        match cli.command {
            Command::Generate(args) => {
                assert_eq!(args.count, 3);
                assert_eq!(args.kind.as_deref(), Some("hex"));
            }
            _ => panic!("Expected generate"),
        }

        let cli = Cli::try_parse_from(["keyward", "hash", "sk_abc", "--secret", "pepper"]).unwrap();
        match cli.command {
            Command::Hash(args) => {
                assert_eq!(args.key, "sk_abc");
                assert_eq!(args.secret.as_deref(), Some("pepper"));
            }
            _ => panic!("Expected hash"),
        }

        let cli = Cli::try_parse_from(["keyward", "sweep", "--batch-size", "50"]).unwrap();
        match cli.command {
            Command::Sweep(args) => {
                assert_eq!(args.batch_size, 50);
                assert_eq!(args.older_than_secs, None);
            }
            _ => panic!("Expected sweep"),
        }
    }

    #[test]
    fn test_hash_requires_key() {
        assert!(Cli::try_parse_from(["keyward", "hash"]).is_err());
    }
}

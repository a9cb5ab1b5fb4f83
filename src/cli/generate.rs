//! Generate command - prints fresh keys with their digests

use clap::Args;

use crate::config::{AppConfig, KeysConfig};
use crate::domain::{DomainError, RandomSource};
use crate::infrastructure::key::{KeyGenerator, KeyHasher, KeyKind, OsRandom};

/// Arguments for the generate command
#[derive(Args, Clone, Debug)]
pub struct GenerateArgs {
    /// Key kind: uuid, url_safe, hex or base32 (overrides config)
    #[arg(long)]
    pub kind: Option<String>,

    /// Body length in characters (overrides config)
    #[arg(long)]
    pub length: Option<usize>,

    /// Key prefix (overrides config)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Number of keys to generate
    #[arg(long, default_value_t = 1)]
    pub count: usize,
}

/// Run the generate command
pub async fn run(args: GenerateArgs) -> anyhow::Result<()> {
    let config: AppConfig = super::bootstrap()?;

    for (plaintext, digest) in generate_keys(&args, &config.keys, &OsRandom)? {
        println!("{}\t{}", plaintext, digest);
    }

    Ok(())
}

/// (plaintext, digest) pairs; the digest is what a key store would persist
pub fn generate_keys(
    args: &GenerateArgs,
    settings: &KeysConfig,
    random: &dyn RandomSource,
) -> Result<Vec<(String, String)>, DomainError> {
    let settings = KeysConfig {
        prefix: args.prefix.clone().unwrap_or_else(|| settings.prefix.clone()),
        kind: args.kind.clone().unwrap_or_else(|| settings.kind.clone()),
        length: args.length.unwrap_or(settings.length),
        ..settings.clone()
    };

    crate::domain::key::validate_prefix(&settings.prefix)
        .map_err(|e| DomainError::validation(e.to_string()))?;

    let generator = KeyGenerator::new(
        &settings.prefix,
        KeyKind::from_name(&settings.kind, settings.length)?,
    );
    let hasher = KeyHasher::from_secret(settings.hash_secret.as_deref());

    (0..args.count)
        .map(|_| {
            let plaintext = generator.generate(random)?;
            let digest = hasher.hash(&plaintext);
            Ok((plaintext, digest))
        })
        .collect()
}

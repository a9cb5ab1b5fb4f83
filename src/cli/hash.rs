//! Hash command - prints the digest a key store would index

use clap::Args;

use crate::infrastructure::key::KeyHasher;

/// Arguments for the hash command
#[derive(Args, Clone, Debug)]
pub struct HashArgs {
    /// Plaintext key
    pub key: String,

    /// HMAC secret (defaults to keys.hash_secret)
    #[arg(long)]
    pub secret: Option<String>,
}

/// Run the hash command
pub async fn run(args: HashArgs) -> anyhow::Result<()> {
    let config = super::bootstrap()?;

    let secret = args.secret.as_deref().or(config.keys.hash_secret.as_deref());
    println!("{}", digest(&args.key, secret));

    Ok(())
}

pub fn digest(key: &str, secret: Option<&str>) -> String {
    KeyHasher::from_secret(secret).hash(key)
}

//! Keys commands: generate key files and show `did:key` identities.

use std::path::{Path, PathBuf};

use clap::Args;
use clusterdir_crypto::{KeyPair, PublicKey};

use crate::theme::Theme;

/// Where to read a key from. Exactly one must be given.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub(crate) struct KeySource {
    /// Raw 32-byte secret key file
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Secret key seed, hex or base64
    #[arg(long)]
    secret: Option<String>,

    /// Public key as did:key, multibase, hex or base64
    #[arg(long)]
    public_key: Option<String>,
}

impl KeySource {
    fn public_key(&self) -> anyhow::Result<PublicKey> {
        if let Some(path) = &self.key_file {
            return Ok(KeyPair::load(path)?.export_public_key());
        }
        if let Some(secret) = &self.secret {
            return Ok(KeyPair::from_encoded_secret(secret)?.export_public_key());
        }
        match &self.public_key {
            Some(encoded) => parse_public_key(encoded),
            None => anyhow::bail!("no key given"),
        }
    }
}

/// Accept any of the encodings clients use for a public key.
fn parse_public_key(encoded: &str) -> anyhow::Result<PublicKey> {
    let encoded = encoded.trim();
    let parsed = if encoded.starts_with("did:") {
        PublicKey::from_did(encoded)
    } else if encoded.starts_with('z') {
        PublicKey::from_multibase(encoded).or_else(|_| PublicKey::from_base64(encoded))
    } else if encoded.len() == 64 && encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
        PublicKey::from_hex(encoded)
    } else {
        PublicKey::from_base64(encoded)
    };
    Ok(parsed?)
}

/// Generate a key file at `path`, refusing to replace one unless `force`.
pub(crate) fn generate_key(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() {
        if !force {
            println!("{}", Theme::warning("A key already exists at this path."));
            println!(
                "{}",
                Theme::warning("Tokens it signed become unverifiable if it is replaced.")
            );
            anyhow::bail!("{} exists; pass --force to replace it", path.display());
        }
        // Remove existing key so load_or_generate creates a new one.
        std::fs::remove_file(path)?;
    }

    let key = KeyPair::load_or_generate(path)?;

    println!("{}", Theme::success("Generated new key"));
    println!("{}", Theme::kv("DID", &key.did()));
    println!("{}", Theme::kv("Key ID", &key.key_id_hex()));
    println!("{}", Theme::kv("Key file", &path.display().to_string()));
    println!();
    println!(
        "{}",
        Theme::dimmed("Point authority.secret_key_path at this file to sign with it.")
    );

    Ok(())
}

/// Print the `did:key` of a key.
pub(crate) fn show_did(source: &KeySource) -> anyhow::Result<()> {
    let public = source.public_key()?;
    println!("{}", public.did());
    Ok(())
}

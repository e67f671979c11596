use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use keysign::{
    DigestAlgorithm, KeyManager, KeyOptions, KeyPair, KeyStore, SignableRequest, StoreConfig,
    config::DEFAULT_MODULUS_BITS, config::default_store_path,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(about = "Manage request-signing keys and sign requests")]
struct Args {
    /// Location of the key database
    #[clap(long, env = "KEYSIGN_STORE", default_value_os_t = default_store_path())]
    store: PathBuf,
    #[clap(long, env = "KEYSIGN_BITS", default_value_t = DEFAULT_MODULUS_BITS)]
    bits: usize,
    #[clap(long, env = "KEYSIGN_DIGEST", default_value = "SHA-256")]
    digest: DigestAlgorithm,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a key for an owner unless one exists
    Generate { owner: String },
    /// Attach a server-issued key id and expiry
    Register {
        owner: String,
        #[clap(long)]
        key_id: String,
        #[clap(long)]
        valid_until: DateTime<Utc>,
    },
    /// Make an owner the default signer
    Activate { owner: String },
    /// Describe an owner's key (the active owner if omitted)
    Show { owner: Option<String> },
    /// Print an owner's public key
    PublicKey {
        owner: String,
        #[clap(long)]
        jwk: bool,
    },
    /// Print signature headers for a request
    Sign {
        #[clap(long, default_value = "GET")]
        method: String,
        #[clap(long)]
        path: String,
        #[clap(long, default_value = "")]
        body: String,
        /// Sign as this owner instead of the active one
        #[clap(long)]
        owner: Option<String>,
    },
    /// Replace an owner's key with a new unregistered one
    Rotate { owner: String },
    /// Remove an owner's key
    Delete { owner: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KEYSIGN_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let store = KeyStore::new(StoreConfig::at_path(&args.store));
    store
        .open()
        .await
        .with_context(|| format!("failed to open key store at {}", args.store.display()))?;

    let options = KeyOptions {
        modulus_bits: args.bits,
        digest: args.digest,
    };
    let manager = KeyManager::new(store, options);
    let outcome = run(&manager, args.command).await;

    manager.store().close().await.context("failed to close key store")?;
    outcome
}

async fn run(manager: &KeyManager, command: Command) -> Result<()> {
    match command {
        Command::Generate { owner } => {
            let key = manager
                .load_or_create(&owner, true)
                .await
                .context("failed to load or generate key")?;
            describe(&owner, &key);
        }
        Command::Register {
            owner,
            key_id,
            valid_until,
        } => {
            let key = manager
                .register(&owner, &key_id, valid_until)
                .await
                .context("failed to register key")?;
            describe(&owner, &key);
        }
        Command::Activate { owner } => {
            manager
                .set_active(&owner)
                .await
                .context("failed to set active owner")?;
        }
        Command::Show { owner } => {
            let (owner, key) = owner_key(manager, owner).await?;
            describe(&owner, &key);
        }
        Command::PublicKey { owner, jwk } => {
            let key = manager
                .load_or_create(&owner, false)
                .await
                .context("failed to load key")?;
            if jwk {
                println!("{}", serde_json::to_string_pretty(&key.public_jwk())?);
            } else {
                print!("{}", key.public_key_pem()?);
            }
        }
        Command::Sign {
            method,
            path,
            body,
            owner,
        } => {
            let (_, key) = owner_key(manager, owner).await?;
            let request = SignableRequest::now(method, path, body.into_bytes());
            let headers = keysign::sign(Some(&key), &request).context("failed to sign request")?;
            for (name, value) in headers.iter() {
                println!("{name}: {value}");
            }
        }
        Command::Rotate { owner } => {
            let key = manager.rotate(&owner).await.context("failed to rotate key")?;
            describe(&owner, &key);
        }
        Command::Delete { owner } => {
            manager.delete(&owner).await.context("failed to delete key")?;
        }
    }
    Ok(())
}

async fn owner_key(manager: &KeyManager, owner: Option<String>) -> Result<(String, KeyPair)> {
    match owner {
        Some(owner) => {
            let key = manager
                .load_or_create(&owner, false)
                .await
                .context("failed to load key")?;
            Ok((owner, key))
        }
        None => {
            let session = manager.resume().await.context("failed to resume active owner")?;
            Ok((session.owner().to_string(), session.key().clone()))
        }
    }
}

fn describe(owner: &str, key: &KeyPair) {
    println!("owner:        {owner}");
    println!("state:        {:?}", key.state(Utc::now()));
    println!("modulus bits: {}", key.modulus_bits());
    println!("digest:       {}", key.digest());
    println!("salt length:  {}", key.salt_length());
    if let Some(registration) = key.registration() {
        println!("key id:       {}", registration.key_id);
        println!("valid until:  {}", registration.valid_until.to_rfc3339());
    }
}

pub mod canonical;
pub mod config;
pub mod error;
pub mod hook;
pub mod keys;
pub mod manager;
pub mod registration;
pub mod signer;
pub mod store;
pub mod verify;

pub use canonical::{CanonicalHeaderSet, SignableRequest, build_header_set, to_signing_string};
pub use config::{HookConfig, KeyOptions, StoreConfig, VerifierConfig};
pub use error::{KeysignError, Result};
pub use hook::SigningHook;
pub use keys::{DigestAlgorithm, KeyGenerator, KeyPair, KeyState, PublicJwk};
pub use manager::{KeyManager, Session};
pub use registration::{LoginRequest, LoginResponse};
pub use signer::{RequestSigner, SignatureHeaders, sign};
pub use store::KeyStore;
pub use verify::{VerificationKey, Verifier, parse_authorization};

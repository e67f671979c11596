mod digest;
mod export;
pub(crate) mod generator;
mod pair;
mod pss;

pub use digest::DigestAlgorithm;
pub use export::{PublicJwk, decode_public_key_pem};
pub(crate) use export::{decode_private_key_pem, encode_private_key_pem, encode_public_key_pem};
pub use generator::KeyGenerator;
pub use pair::{KeyPair, KeyState, Registration};
pub use pss::verify_pss;

mod crypto;
mod crypto_hash;
mod env;

pub use crypto::{blake3_hash, encrypt, decrypt};
pub use crypto_hash::CryptoHash;
pub use env::EnvVars;

pub fn get_current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

use rand::Rng;
use sha2::{Digest, Sha256};

/// Stored form is `<salt-hex>$<sha256-hex>`.
pub fn hash_password(password: &str) -> String {
    let salt = format!("{:032x}", rand::random::<u128>());
    let digest = salted_digest(&salt, password);
    format!("{}${}", salt, digest)
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    salted_digest(salt, password) == expected
}

/// Six decimal digits, never starting with zero.
pub fn six_digit_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

fn salted_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

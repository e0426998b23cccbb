/// Password digest sent in place of the plain password
use sha2::{Digest, Sha256};

/// SHA-256 of the password, lowercase hex
pub fn password_hash(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

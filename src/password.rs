//! Random secrets for generated credentials and object names.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use uuid::Uuid;

const NAME_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// An alphanumeric secret of `length` characters drawn from the OS random source.
pub fn generate_secret(length: usize) -> String {
    OsRng.sample_iter(&Alphanumeric).take(length).map(char::from).collect()
}

/// A random version 4 UUID rendered as 32 lowercase hex characters without dashes.
pub fn generate_password() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A suffix usable in object names: lowercase letters and digits only.
pub fn generate_name_suffix(length: usize) -> String {
    (0..length)
        .map(|_| char::from(NAME_CHARS[OsRng.gen_range(0..NAME_CHARS.len())]))
        .collect()
}

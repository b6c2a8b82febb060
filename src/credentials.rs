//! Credential Engine: password salting, Argon2 hashing, constant-time
//! comparison, and session-key generation/validation.
//!
//! Grounded on `original_source/passwordutils.py`. The client is assumed to
//! have already derived a PBKDF2 "password equivalent" from the raw
//! password (salt `"user@org"`, count 10000); this engine treats that
//! equivalent as the effective secret and Argon2-hashes it with a
//! server-side salt.

use argon2::Argon2;
use rand::rngs::OsRng;
use rand::Rng;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

/// Lower/upper bound, inclusive, on generated salt length.
const SALT_MIN_LEN: usize = 50;
const SALT_MAX_LEN: usize = 60;

/// Argon2 time cost used by this service, matching the original's
/// `params={'t': 5}`. Memory/parallelism cost use the `argon2` crate's
/// recommended defaults, since the original relied on its C binding's
/// defaults for everything but `t`.
const ARGON2_T_COST: u32 = 5;
const ARGON2_M_COST: u32 = 19 * 1024; // argon2 crate's Params::DEFAULT_M_COST
const ARGON2_P_COST: u32 = 1;

/// Hash algorithms recognized by [`hash_password`]. The selectable surface
/// exists but only `Argon2` is implemented, matching the original's
/// `hashPassword(algo='argon2')` with any other name raising `ValueError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Argon2,
}

impl Algorithm {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "argon2" => Ok(Algorithm::Argon2),
            other => Err(Error::ValidationError(format!(
                "unknown algorithm \"{other}\""
            ))),
        }
    }
}

/// Generate a fresh salt: 50-60 printable ASCII characters (codepoints
/// 32-126 inclusive), length chosen uniformly in that range, drawn from a
/// cryptographically strong source.
pub fn generate_salt() -> String {
    let mut rng = OsRng;
    let len = rng.gen_range(SALT_MIN_LEN..=SALT_MAX_LEN);
    (0..len)
        .map(|_| rng.gen_range(32u8..=126u8) as char)
        .collect()
}

/// Hash `password` (the client's PBKDF2 password-equivalent) with `salt`
/// using `algo`. Output is hex-encoded lowercase, matching the original's
/// `binascii.hexlify(argon2_hash(...)).decode()`.
pub fn hash_password(password: &str, salt: &str, algo: Algorithm) -> Result<String> {
    match algo {
        Algorithm::Argon2 => argon2_hash_hex(password, salt),
    }
}

fn argon2_hash_hex(password: &str, salt: &str) -> Result<String> {
    let params = argon2::Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, None)
        .map_err(|e| Error::ValidationError(format!("invalid argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2i, argon2::Version::V0x13, params);

    // The original's `argon2_hash` binding produces a raw 32-byte digest,
    // not a PHC string; the stored schema keeps hash and salt as two
    // separate text columns, so this service hashes into a raw output
    // buffer rather than adopting the crate's PHC-string API.
    let mut out = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut out)
        .map_err(|e| Error::ValidationError(format!("argon2 hashing failed: {e}")))?;

    Ok(hex::encode(out))
}

/// Constant-time comparison of two hex-encoded hash strings, so a timing
/// side channel cannot leak how many leading bytes matched.
pub fn verify_hash(computed: &str, stored: &str) -> bool {
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Generate an opaque, cryptographically random session key with at least
/// 128 bits of entropy (this service uses 256 bits), hex-encoded.
pub fn generate_session_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_length_within_bounds() {
        for _ in 0..50 {
            let salt = generate_salt();
            assert!(salt.chars().count() >= SALT_MIN_LEN);
            assert!(salt.chars().count() <= SALT_MAX_LEN);
            assert!(salt.chars().all(|c| (32..=126).contains(&(c as u32))));
        }
    }

    #[test]
    fn hash_password_is_pure_function_of_inputs() {
        let a = hash_password("pbkdf2-equivalent", "fixed-salt", Algorithm::Argon2).unwrap();
        let b = hash_password("pbkdf2-equivalent", "fixed-salt", Algorithm::Argon2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_password_differs_per_salt() {
        let a = hash_password("same-password", "salt-one", Algorithm::Argon2).unwrap();
        let b = hash_password("same-password", "salt-two", Algorithm::Argon2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_hex_encoded_lowercase() {
        let hash = hash_password("p", "s", Algorithm::Argon2).unwrap();
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn verify_hash_matches_equal_strings() {
        let hash = hash_password("p", "s", Algorithm::Argon2).unwrap();
        assert!(verify_hash(&hash, &hash));
    }

    #[test]
    fn verify_hash_rejects_mismatch() {
        let a = hash_password("p", "s1", Algorithm::Argon2).unwrap();
        let b = hash_password("p", "s2", Algorithm::Argon2).unwrap();
        assert!(!verify_hash(&a, &b));
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = Algorithm::parse("md5").unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[test]
    fn session_key_has_sufficient_entropy_and_is_hex() {
        let key = generate_session_key();
        assert_eq!(key.len(), 64); // 32 bytes hex-encoded
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn session_keys_are_not_repeated() {
        let a = generate_session_key();
        let b = generate_session_key();
        assert_ne!(a, b);
    }
}

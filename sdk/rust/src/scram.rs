//! Client proof for the challenge response login.

use crate::error::{ErrorCode, MrsResult, ResultExt};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Length of the derived salted password in bytes.
const SALTED_PASSWORD_LEN: usize = 32;

/// A fresh client nonce: 10 random bytes, hex encoded.
pub fn client_nonce() -> String {
    let mut bytes = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `n=<user>,r=<client nonce>`
pub fn client_first(user: &str, nonce: &str) -> String {
    format!("n={},r={}", user, nonce)
}

/// `r=<server nonce>,s=<base64 salt>,i=<iterations>`
pub fn server_first(nonce: &str, salt: &[u8], iterations: u32) -> String {
    format!("r={},s={},i={}", nonce, STANDARD.encode(salt), iterations)
}

/// `r=<server nonce>`
pub fn client_final(nonce: &str) -> String {
    format!("r={}", nonce)
}

fn hmac(key: &[u8], data: &[u8]) -> MrsResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_mrs_err(ErrorCode::InternalError)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// XORs the overlapping prefix of two byte strings into a copy of the
/// longer one. The tail of the longer input is kept as is.
pub fn xor_into_longer(a: &[u8], b: &[u8]) -> Vec<u8> {
    let (longer, shorter) = if a.len() > b.len() { (a, b) } else { (b, a) };
    let mut out = longer.to_vec();
    for (o, s) in out.iter_mut().zip(shorter) {
        *o ^= s;
    }
    out
}

/// Computes the proof that the client knows `password`.
pub fn client_proof(
    password: &str,
    salt: &[u8],
    iterations: u32,
    auth_message: &str,
) -> MrsResult<Vec<u8>> {
    let mut salted_password = [0u8; SALTED_PASSWORD_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut salted_password);

    let client_key = hmac(&salted_password, b"Client Key")?;
    let stored_key = Sha256::digest(&client_key);
    let client_signature = hmac(&stored_key, auth_message.as_bytes())?;

    Ok(xor_into_longer(&client_signature, &client_key))
}

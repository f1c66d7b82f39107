use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes behind each code verifier; encodes to 86 characters.
const CODE_VERIFIER_BYTES: usize = 64;
const STATE_TOKEN_BYTES: usize = 16;

fn random_url_safe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    // ThreadRng is a CSPRNG seeded from the OS.
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a PKCE code verifier from the unreserved URL-safe alphabet.
pub fn generate_code_verifier() -> String {
    random_url_safe(CODE_VERIFIER_BYTES)
}

/// S256 code challenge: unpadded Base64URL of the verifier's SHA-256 digest.
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

pub fn generate_code_verifier_and_challenge() -> (String, String) {
    let verifier = generate_code_verifier();
    let challenge = generate_code_challenge(&verifier);
    (verifier, challenge)
}

/// Generates the per-flow CSRF `state` value.
pub fn generate_state_token() -> String {
    random_url_safe(STATE_TOKEN_BYTES)
}

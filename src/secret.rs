use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

pub const CLIENT_SECRET_LEN: usize = 40;

/// Random alphanumeric client secret drawn from the OS CSPRNG.
pub fn generate_client_secret() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(CLIENT_SECRET_LEN)
        .map(char::from)
        .collect()
}

/// 80 hex chars, the same shape as grant-issued access token ids.
pub fn generate_token_id() -> String {
    let mut bytes = [0u8; 40];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

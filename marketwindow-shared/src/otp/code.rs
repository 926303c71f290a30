/// One-time code generation and hashing
///
/// # Security
///
/// - **Format**: 6 decimal digits, zero padded (`000000`..`999999`)
/// - **Storage**: HMAC-SHA256 keyed by the server secret, hex encoded
/// - **Binding**: the OTP id is mixed into the MAC, so a hash copied onto
///   another row never validates
/// - **Validation**: constant-time comparison via [`Mac::verify_slice`]
///
/// # Example
///
/// ```
/// use marketwindow_shared::otp::code::{generate_code, hash_code, verify_code};
/// use uuid::Uuid;
///
/// let secret = b"a-server-secret-of-at-least-32-bytes!";
/// let otp_id = Uuid::new_v4();
///
/// let code = generate_code();
/// assert_eq!(code.len(), 6);
///
/// let hash = hash_code(secret, otp_id, &code).unwrap();
/// assert!(verify_code(secret, otp_id, &code, &hash));
/// assert!(!verify_code(secret, Uuid::new_v4(), &code, &hash));
/// ```

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Number of digits in a code
pub const CODE_LENGTH: usize = 6;

/// Generates a random zero-padded 6-digit code
pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", n)
}

/// Checks that a submitted code is exactly six ASCII digits
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

fn mac(secret: &[u8], otp_id: Uuid, code: &str) -> Result<HmacSha256, InvalidLength> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)?;
    mac.update(otp_id.as_bytes());
    mac.update(code.as_bytes());
    Ok(mac)
}

/// Hashes a code for storage
///
/// Returns the hex-encoded MAC (64 characters).
pub fn hash_code(secret: &[u8], otp_id: Uuid, code: &str) -> Result<String, InvalidLength> {
    Ok(hex::encode(mac(secret, otp_id, code)?.finalize().into_bytes()))
}

/// Verifies a submitted code against a stored hash in constant time
///
/// A malformed stored hash never verifies.
pub fn verify_code(secret: &[u8], otp_id: Uuid, code: &str, stored_hash: &str) -> bool {
    let Ok(expected) = hex::decode(stored_hash) else {
        return false;
    };

    match mac(secret, otp_id, code) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

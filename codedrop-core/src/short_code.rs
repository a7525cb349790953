//! Short session codes: 4 characters, typed by hand, exchanged out of band.

use rand::Rng;

use crate::CoreError;

pub const SHORT_CODE_LEN: usize = 4;

/// Uppercase letters minus the visually ambiguous ones (I, O) and the digits
/// 2-9. Small enough to read over the phone, large enough for a one-shot
/// session handle.
pub const SHORT_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a fresh session code for the hosting side.
pub fn generate_short_code() -> String {
    let mut rng = rand::rng();
    (0..SHORT_CODE_LEN)
        .map(|_| SHORT_CODE_ALPHABET[rng.random_range(0..SHORT_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Normalize user input (trim, uppercase) and validate it against the code
/// alphabet. Rejection happens before any connection attempt.
pub fn normalize_short_code(input: &str) -> Result<String, CoreError> {
    let normalized = input.trim().to_uppercase();
    if normalized.chars().count() != SHORT_CODE_LEN {
        return Err(CoreError::ShortCodeLength);
    }
    if let Some(bad) = normalized
        .chars()
        .find(|c| !c.is_ascii() || !SHORT_CODE_ALPHABET.contains(&(*c as u8)))
    {
        return Err(CoreError::ShortCodeCharacter(bad));
    }
    Ok(normalized)
}

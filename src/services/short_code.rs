use crate::error::{AppError, AppResult};
use crate::store::LinkStore;
use regex::Regex;

/// Character set for generating short codes.
const ALPHABET_CHARS: &[char] = &[
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M',
    'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm',
    'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// Longest code accepted anywhere
pub const MAX_CODE_LENGTH: usize = 64;

/// Cheap shape check run before any lookup: 1-64 of `[A-Za-z0-9_-]`.
pub fn is_well_formed_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_CODE_LENGTH
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Stricter rule for owner-chosen codes.
pub fn validate_custom_code(code: &str) -> AppResult<()> {
    let code_regex = Regex::new(r"^[a-zA-Z0-9_-]{4,16}$")
        .map_err(|e| AppError::Internal(format!("Invalid regex pattern: {}", e)))?;

    if !code_regex.is_match(code) {
        return Err(AppError::InvalidRequest(
            "Custom code must be 4-16 alphanumeric characters, underscores, or hyphens".to_string(),
        ));
    }

    Ok(())
}

/// Service for generating unique short codes.
pub struct ShortCodeService;

impl ShortCodeService {
    /// Generate a unique short code that doesn't already exist in the store.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ShortCodeGenerationFailed` if unable to generate a unique
    /// code within the specified number of attempts.
    pub async fn generate_short_code(
        length: usize,
        max_attempts: u32,
        store: &dyn LinkStore,
    ) -> AppResult<String> {
        for _ in 0..max_attempts {
            let code = nanoid::nanoid!(length, ALPHABET_CHARS);

            if !store.short_code_exists(&code).await? {
                return Ok(code);
            }
        }

        Err(AppError::ShortCodeGenerationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_alphabet_chars_const() {
        // Verify the alphabet has 62 characters (0-9, A-Z, a-z)
        assert_eq!(ALPHABET_CHARS.len(), 62);
    }

    #[test]
    fn test_alphabet_chars_unique() {
        let unique: std::collections::HashSet<_> = ALPHABET_CHARS.iter().collect();
        assert_eq!(unique.len(), ALPHABET_CHARS.len());
    }

    #[test]
    fn test_well_formed_codes() {
        assert!(is_well_formed_code("abc"));
        assert!(is_well_formed_code("a_b-C9"));
        assert!(!is_well_formed_code(""));
        assert!(!is_well_formed_code("abc/def"));
        assert!(!is_well_formed_code("abc.123"));
        assert!(!is_well_formed_code(&"a".repeat(MAX_CODE_LENGTH + 1)));
    }

    #[test]
    fn test_custom_codes() {
        assert!(validate_custom_code("promo-2024").is_ok());
        assert!(validate_custom_code("abc").is_err());
        assert!(validate_custom_code("abcdefghijklmnopq").is_err());
        assert!(validate_custom_code("abc@123").is_err());
    }

    #[tokio::test]
    async fn test_generated_code_shape() {
        let store = MemoryStore::new();
        let code = ShortCodeService::generate_short_code(6, 10, &store).await.unwrap();

        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_generation_fails_without_attempts() {
        let store = MemoryStore::new();
        let result = ShortCodeService::generate_short_code(6, 0, &store).await;
        assert!(matches!(result, Err(AppError::ShortCodeGenerationFailed)));
    }
}

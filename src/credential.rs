//! API credentials and their log-safe rendering.

use std::fmt;

/// Placeholder shown for credentials too short to partially reveal.
pub const MASK_PLACEHOLDER: &str = "****";

/// Number of characters kept visible at each end of a masked credential.
const VISIBLE_CHARS: usize = 4;

/// An opaque secret used to authenticate one upstream request.
///
/// Both `Debug` and `Display` print the masked form, so a credential can be
/// passed to log macros without leaking it. Use [`Credential::expose`] to get
/// the raw secret when building the `Authorization` header.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the raw secret.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns the `first4…last4` rendering of this credential.
    pub fn masked(&self) -> String {
        mask(&self.0)
    }
}

impl From<&str> for Credential {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

impl From<String> for Credential {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

/// Masks a secret as `first4…last4`.
/// Secrets shorter than 8 characters are replaced by [`MASK_PLACEHOLDER`].
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < VISIBLE_CHARS * 2 {
        return MASK_PLACEHOLDER.to_string();
    }

    let head: String = chars[..VISIBLE_CHARS].iter().collect();
    let tail: String = chars[chars.len() - VISIBLE_CHARS..].iter().collect();
    format!("{}…{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_short_secret_uses_placeholder() {
        assert_eq!(mask(""), MASK_PLACEHOLDER);
        assert_eq!(mask("abc"), MASK_PLACEHOLDER);
        assert_eq!(mask("1234567"), MASK_PLACEHOLDER);
    }

    #[test]
    fn test_mask_exactly_eight_chars() {
        assert_eq!(mask("abcdwxyz"), "abcd…wxyz");
    }

    #[test]
    fn test_mask_hides_middle() {
        let secret = "sk-live-SECRETMIDDLE-9f8e";
        let masked = mask(secret);
        assert_eq!(masked, "sk-l…9f8e");
        assert!(!masked.contains("SECRET"));
    }

    #[test]
    fn test_mask_multibyte_does_not_split_chars() {
        assert_eq!(mask("ключ-секретный"), "ключ…тный");
    }

    #[test]
    fn test_display_and_debug_are_masked() {
        let cred = Credential::new("sk-abcdefghijklmnop");
        assert_eq!(cred.to_string(), "sk-a…mnop");
        assert_eq!(format!("{:?}", cred), "Credential(sk-a…mnop)");
        assert_eq!(cred.expose(), "sk-abcdefghijklmnop");
    }
}

//! Release version tags: dotted integers with an optional `v` prefix.

use std::fmt;

use crate::error::{UpdateError, UpdateResult};

/// Comparable version. Trailing zero components are ignored, so `1.2` and
/// `v1.2.0` are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(Vec<u64>);

impl Version {
    /// Parse a tag such as `v1.4.2`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidVersion` for empty components, non-digits, or an
    /// empty tag.
    pub fn parse(tag: &str) -> UpdateResult<Self> {
        let invalid = || UpdateError::InvalidVersion {
            value: tag.to_string(),
        };
        let trimmed = tag.trim();
        let body = trimmed
            .strip_prefix(['v', 'V'])
            .unwrap_or(trimmed);
        if body.is_empty() {
            return Err(invalid());
        }
        let mut parts = body
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                part.parse::<u64>().map_err(|_| invalid())
            })
            .collect::<UpdateResult<Vec<_>>>()?;
        while parts.last() == Some(&0) {
            parts.pop();
        }
        Ok(Self(parts))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("0");
        }
        let text: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&text.join("."))
    }
}

/// True when `candidate` is strictly newer than `installed`.
///
/// # Errors
///
/// Returns `InvalidVersion` when either tag does not parse.
pub fn is_newer(candidate: &str, installed: &str) -> UpdateResult<bool> {
    Ok(Version::parse(candidate)? > Version::parse(installed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_comparison_not_lexical() -> UpdateResult<()> {
        assert!(is_newer("v1.10.0", "1.9.3")?);
        assert!(is_newer("2", "v1.99")?);
        assert!(!is_newer("1.2", "v1.2.0")?);
        assert!(!is_newer("1.2.0", "1.2.1")?);
        assert_eq!(Version::parse("V3.0.0")?.to_string(), "3");
        Ok(())
    }

    #[test]
    fn malformed_tags_are_rejected() {
        for tag in ["", "v", "1..2", "1.2-rc1", "latest", "v1.x"] {
            assert!(Version::parse(tag).is_err(), "{tag} should not parse");
        }
    }
}

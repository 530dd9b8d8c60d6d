//! Device tokens.

use std::fmt;
use std::str::FromStr;

/// Length of a legacy APNs device token in bytes.
pub const TOKEN_LEN: usize = 32;

/// Error parsing a device token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("device token must be {TOKEN_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("device token contains non-hex character {0:?}")]
    InvalidHex(char),
}

/// A 32-byte APNs device token.
///
/// Parsed from hex with any amount of whitespace and optional angle brackets
/// (`<0f3a... 9bc1...>` as iOS prints it). Displayed as eight space-separated
/// groups of eight hex digits, the format tokens are stored in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceToken([u8; TOKEN_LEN]);

impl DeviceToken {
    pub const fn new(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a token from a raw byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TokenError> {
        let array: [u8; TOKEN_LEN] = bytes
            .try_into()
            .map_err(|_| TokenError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }

    /// Token as contiguous lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl FromStr for DeviceToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: Vec<u8> = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '<' && *c != '>')
            .map(|c| {
                c.to_digit(16)
                    .map(|d| d as u8)
                    .ok_or(TokenError::InvalidHex(c))
            })
            .collect::<Result<_, _>>()?;

        if digits.len() != TOKEN_LEN * 2 {
            return Err(TokenError::InvalidLength(digits.len() / 2));
        }

        let mut bytes = [0u8; TOKEN_LEN];
        for (byte, pair) in bytes.iter_mut().zip(digits.chunks_exact(2)) {
            *byte = (pair[0] << 4) | pair[1];
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.0.chunks(4).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            for b in group {
                write!(f, "{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceToken({})", self.to_hex())
    }
}

impl serde::Serialize for DeviceToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for DeviceToken {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACED: &str = "5gxadhy6 6zmtxfl6 0b1c2d3e 4f506172 8394a5b6 c7d8e9fa 0b1c2d3e 4f506172";

    fn sample() -> DeviceToken {
        let mut bytes = [0u8; TOKEN_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8 * 7;
        }
        DeviceToken::new(bytes)
    }

    #[test]
    fn test_display_groups_of_eight() {
        let shown = sample().to_string();
        assert_eq!(shown.split(' ').count(), 8);
        assert!(shown.split(' ').all(|g| g.len() == 8));
    }

    #[test]
    fn test_parse_display_form() {
        let token = sample();
        let parsed: DeviceToken = token.to_string().parse().unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn test_parse_ios_description() {
        let token = sample();
        let described = format!("<{}>", token.to_string());
        assert_eq!(described.parse::<DeviceToken>().unwrap(), token);
    }

    #[test]
    fn test_rejects_non_hex() {
        assert_eq!(
            SPACED.parse::<DeviceToken>(),
            Err(TokenError::InvalidHex('g'))
        );
    }

    #[test]
    fn test_rejects_short_token() {
        assert_eq!(
            "abcd".parse::<DeviceToken>(),
            Err(TokenError::InvalidLength(2))
        );
        assert_eq!(
            DeviceToken::from_slice(&[1, 2, 3]),
            Err(TokenError::InvalidLength(3))
        );
    }
}

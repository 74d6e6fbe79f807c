//! Formatting helpers.

/// Outputs bytes as an escaped ascii string.
///
/// Only the first [EscapedBytes::MAX_SHOWN] bytes are printed, followed by the count of
/// the omitted ones.
#[derive(Display, PartialEq, Eq)]
#[display("{:?}", self)]
pub struct EscapedBytes<'a>(pub &'a [u8]);

impl EscapedBytes<'_> {
    pub const MAX_SHOWN: usize = 48;
}

impl std::fmt::Debug for EscapedBytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = &self.0[..self.0.len().min(Self::MAX_SHOWN)];
        for &b in shown {
            write!(f, "{}", std::ascii::escape_default(b))?
        }
        if shown.len() != self.0.len() {
            write!(f, "…+{}", self.0.len() - shown.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaped_bytes() {
        assert_eq!(EscapedBytes(b"abc").to_string(), "abc");
        assert_eq!(EscapedBytes(b"a\nb\xff\0").to_string(), "a\\nb\\xff\\x00");
        assert_eq!(EscapedBytes(b"").to_string(), "");
        let long = [b'z'; 100];
        let expected = format!("{}…+52", "z".repeat(48));
        assert_eq!(EscapedBytes(&long).to_string(), expected);
        assert_eq!(format!("{:?}", EscapedBytes(&long[..48])), "z".repeat(48));
    }
}

use anyhow::Result;

/// Boundary between user-visible text and the stored `content` string.
pub trait ContentCodec: Send + Sync {
    fn encode(&self, plaintext: &str) -> Result<String>;

    fn decode(&self, stored: &str) -> Result<String>;

    /// Whether `encode` output hides the plaintext.
    fn is_encrypted(&self) -> bool;
}

/// Stores content as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodec;

impl ContentCodec for PlainCodec {
    fn encode(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn decode(&self, stored: &str) -> Result<String> {
        Ok(stored.to_string())
    }

    fn is_encrypted(&self) -> bool {
        false
    }
}

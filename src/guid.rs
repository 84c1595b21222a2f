use std::fmt;

/// A 12-byte identifier for a server instance, stable for the process
/// lifetime. Generated once by `ServerContext::initialize` and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid([u8; 12]);

impl Guid {
    /// Generates a fresh, random GUID.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 12];
        rand::rng().fill_bytes(&mut bytes);
        Guid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

use std::fmt;
use std::hash::{Hash, Hasher};
use zeroize::{ZeroizeOnDrop, Zeroizing};

/// Credential material (passwords) wiped from memory on drop.
#[derive(Clone, Default, ZeroizeOnDrop)]
pub struct Secret {
    value: Vec<u8>,
}

impl Secret {
    pub fn new(value: Vec<u8>) -> Self {
        Self { value }
    }

    pub fn from_string(value: String) -> Self {
        Self::new(value.into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Lossy UTF-8 copy, wiped when the returned value drops.
    pub fn to_string_lossy(&self) -> Zeroizing<String> {
        Zeroizing::new(String::from_utf8_lossy(&self.value).into_owned())
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Secret {}

impl Hash for Secret {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

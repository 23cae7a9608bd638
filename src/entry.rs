use std::fmt;

use bytes::Bytes;

/// Reserved list holding the key-list snapshot. The only system-owned key
/// on a store.
pub const KEY_LIST: &str = "%keys";

/// Entry value marking a not-yet-populated timeline during live copy.
const EMPTY_SENTINEL: [u8; 8] = [0; 8];

/// A single timeline entry.
///
/// Entries are opaque byte strings, typically a fixed-width record (id plus
/// metadata) whose internal structure the store does not interpret. The one
/// reserved value is the empty sentinel, see [`Entry::sentinel`]. Equality
/// is byte equality; cloning is cheap.
#[derive(Clone, Default, Eq, Hash, PartialEq)]
pub struct Entry(Bytes);

impl Entry {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// The reserved entry appended by `set_live_start` to mark a timeline
    /// that exists but has not been backfilled yet.
    #[must_use]
    pub fn sentinel() -> Self {
        Self(Bytes::from_static(&EMPTY_SENTINEL))
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.0 == EMPTY_SENTINEL.as_slice()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sentinel() {
            return f.write_str("Entry(<sentinel>)");
        }
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Entry({s:?})"),
            Err(_) => {
                write!(f, "Entry(0x")?;
                for b in &self.0 {
                    write!(f, "{b:02x}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<Bytes> for Entry {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl From<Vec<u8>> for Entry {
    fn from(data: Vec<u8>) -> Self {
        Self(data.into())
    }
}

impl From<&'static [u8]> for Entry {
    fn from(data: &'static [u8]) -> Self {
        Self(Bytes::from_static(data))
    }
}

impl From<&str> for Entry {
    fn from(data: &str) -> Self {
        Self(Bytes::copy_from_slice(data.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::Entry;

    #[test]
    fn sentinel() {
        assert!(Entry::sentinel().is_sentinel());
        assert!(!Entry::from("post").is_sentinel());
        assert_eq!(Entry::sentinel().len(), 8);
    }

    #[test]
    fn debug_formats() {
        assert_eq!(format!("{:?}", Entry::from("abc")), r#"Entry("abc")"#);
        assert_eq!(
            format!("{:?}", Entry::from(vec![0xde, 0xad])),
            "Entry(0xdead)"
        );
        assert_eq!(format!("{:?}", Entry::sentinel()), "Entry(<sentinel>)");
    }
}

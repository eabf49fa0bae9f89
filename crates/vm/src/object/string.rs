//! Immutable byte strings with small-string optimization.
//!
//! Strings at or below [`LString::SSO_CAPACITY`] bytes live inline in a
//! 32-byte payload whose final byte doubles as the length; the high bit of
//! that byte is set only for heap-backed storage, so inspecting it
//! distinguishes the two modes. Inline comparison runs word-parallel over the
//! payload chunks instead of byte-by-byte.

use std::cmp::Ordering;

use xxhash_rust::xxh3::xxh3_64;

const HEAP_FLAG: u8 = 0x80;

/// Payload of a heap string object.
pub struct LString {
    storage: Storage,
}

enum Storage {
    /// 31 data bytes plus the trailing length byte (high bit clear).
    Inline { buf: [u8; LString::SSO_CAPACITY], len: u8 },
    /// Out-of-line bytes for longer strings.
    Heap(Box<[u8]>),
}

impl LString {
    /// Longest byte sequence stored inline.
    pub const SSO_CAPACITY: usize = 31;

    /// Creates a string from UTF-8 text, choosing the storage mode by length.
    pub fn new(text: &str) -> Self {
        Self::from_parts(&[text])
    }

    /// Creates a string by concatenating several pieces without an
    /// intermediate buffer for the inline case.
    pub fn from_parts(parts: &[&str]) -> Self {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        if total <= Self::SSO_CAPACITY {
            let mut buf = [0u8; Self::SSO_CAPACITY];
            let mut offset = 0;
            for part in parts {
                buf[offset..offset + part.len()].copy_from_slice(part.as_bytes());
                offset += part.len();
            }
            Self {
                storage: Storage::Inline {
                    buf,
                    len: total as u8,
                },
            }
        } else {
            let mut bytes = Vec::with_capacity(total);
            for part in parts {
                bytes.extend_from_slice(part.as_bytes());
            }
            Self {
                storage: Storage::Heap(bytes.into_boxed_slice()),
            }
        }
    }

    /// True when the bytes are stored inline.
    pub fn is_sso(&self) -> bool {
        match &self.storage {
            Storage::Inline { len, .. } => (*len & HEAP_FLAG) == 0,
            Storage::Heap(_) => false,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Inline { len, .. } => *len as usize,
            Storage::Heap(bytes) => bytes.len(),
        }
    }

    /// True for the empty string.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reusable capacity when this object sits in the free-string pool.
    /// Inline strings always offer the full inline buffer; heap strings offer
    /// exactly their current allocation.
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Inline { .. } => Self::SSO_CAPACITY,
            Storage::Heap(bytes) => bytes.len(),
        }
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Inline { buf, len } => &buf[..*len as usize],
            Storage::Heap(bytes) => bytes,
        }
    }

    /// The text. Constructors only accept `&str`, so the bytes are UTF-8 by
    /// construction.
    pub fn view(&self) -> &str {
        std::str::from_utf8(self.as_bytes()).expect("string payload is UTF-8")
    }

    /// Content hash, identical for inline and heap storage of equal bytes.
    pub fn hash(&self) -> u64 {
        xxh3_64(self.as_bytes())
    }

    /// Rewrites this object's content in place. Used when the allocator
    /// recycles a pooled string whose capacity fits; `parts` must fit in
    /// [`capacity`](Self::capacity).
    pub(crate) fn write_in_place(&mut self, parts: &[&str]) {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        match &mut self.storage {
            Storage::Inline { buf, len } => {
                *buf = [0u8; Self::SSO_CAPACITY];
                let mut offset = 0;
                for part in parts {
                    buf[offset..offset + part.len()].copy_from_slice(part.as_bytes());
                    offset += part.len();
                }
                *len = total as u8;
            }
            Storage::Heap(bytes) => {
                let mut offset = 0;
                for part in parts {
                    bytes[offset..offset + part.len()].copy_from_slice(part.as_bytes());
                    offset += part.len();
                }
                if total < bytes.len() {
                    // Shrink to the exact length so len() stays truthful.
                    let mut trimmed = std::mem::take(bytes).into_vec();
                    trimmed.truncate(total);
                    *bytes = trimmed.into_boxed_slice();
                }
            }
        }
    }

    /// The 32-byte inline payload viewed as four machine words, length byte
    /// included. Only meaningful for inline strings.
    fn chunks(&self) -> [u64; 4] {
        match &self.storage {
            Storage::Inline { buf, len } => {
                let mut raw = [0u8; 32];
                raw[..Self::SSO_CAPACITY].copy_from_slice(buf);
                raw[31] = *len;
                let mut words = [0u64; 4];
                for (i, word) in words.iter_mut().enumerate() {
                    let mut chunk = [0u8; 8];
                    chunk.copy_from_slice(&raw[i * 8..i * 8 + 8]);
                    *word = u64::from_le_bytes(chunk);
                }
                words
            }
            Storage::Heap(_) => [0; 4],
        }
    }

    /// Content equality. The word-parallel path covers the inline/inline
    /// case; it also compares the trailing length byte, so unequal lengths
    /// fail on the last chunk.
    pub fn equals(a: &LString, b: &LString) -> bool {
        if std::ptr::eq(a, b) {
            return true;
        }
        if a.is_sso() && b.is_sso() {
            return a.chunks() == b.chunks();
        }
        a.as_bytes() == b.as_bytes()
    }

    /// Lexicographic content ordering.
    pub fn compare(a: &LString, b: &LString) -> Ordering {
        if std::ptr::eq(a, b) {
            return Ordering::Equal;
        }
        if a.is_sso() && b.is_sso() {
            return Self::sso_compare(a, b);
        }
        a.as_bytes().cmp(b.as_bytes())
    }

    fn sso_compare(a: &LString, b: &LString) -> Ordering {
        let (ca, cb) = (a.chunks(), b.chunks());
        let min_len = a.len().min(b.len());
        for i in 0..4 {
            if min_len > i * 8 && ca[i] != cb[i] {
                let xor = ca[i] ^ cb[i];
                let byte_idx = i * 8 + (xor.trailing_zeros() / 8) as usize;
                if byte_idx >= min_len {
                    break;
                }
                return a.as_bytes()[byte_idx].cmp(&b.as_bytes()[byte_idx]);
            }
        }
        a.len().cmp(&b.len())
    }
}

impl std::fmt::Debug for LString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LString({:?})", self.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_use_sso() {
        let s = LString::new("hello");
        assert!(s.is_sso());
        assert_eq!(s.view(), "hello");
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn sso_boundary_is_31_bytes() {
        let at = LString::new(&"x".repeat(31));
        assert!(at.is_sso());
        let over = LString::new(&"x".repeat(32));
        assert!(!over.is_sso());
        assert_eq!(over.len(), 32);
    }

    #[test]
    fn equality_crosses_storage_modes() {
        // Force a heap copy of content that would fit inline by shrinking a
        // longer heap string in place.
        let mut heap = LString::new(&"a".repeat(40));
        heap.write_in_place(&["short"]);
        assert!(!heap.is_sso());
        let inline = LString::new("short");
        assert!(inline.is_sso());
        assert!(LString::equals(&heap, &inline));
        assert_eq!(heap.hash(), inline.hash());
    }

    #[test]
    fn compare_orders_lexicographically() {
        let a = LString::new("abc");
        let b = LString::new("abd");
        assert_eq!(LString::compare(&a, &b), Ordering::Less);
        let prefix = LString::new("ab");
        assert_eq!(LString::compare(&prefix, &a), Ordering::Less);
        assert_eq!(LString::compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn concat_parts_round_trips() {
        let s = LString::from_parts(&["foo", "bar", "baz"]);
        assert_eq!(s.view(), "foobarbaz");
    }

    #[test]
    fn hash_is_content_based() {
        assert_eq!(LString::new("k").hash(), LString::new("k").hash());
        assert_ne!(LString::new("k").hash(), LString::new("K").hash());
    }
}

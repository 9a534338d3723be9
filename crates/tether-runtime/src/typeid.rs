//! Type identifier cache
//!
//! Maps a Rust type to a 128-bit interface identifier. The first request for a type
//! computes the value and leaks one allocation for it; every later request, from any
//! thread, returns that same `&'static Guid`. Entries are never removed.

use std::any::{type_name, TypeId};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::interop::Interop;

/// A 128-bit interface identifier in the COM/UUID field layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const NIL: Guid = Guid::from_u128(0);

    pub const fn from_values(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// From the big-endian integer form, e.g. `0x00000000_0000_0000_C000_000000000046`
    pub const fn from_u128(value: u128) -> Self {
        let b = value.to_be_bytes();
        Self {
            data1: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            data2: u16::from_be_bytes([b[4], b[5]]),
            data3: u16::from_be_bytes([b[6], b[7]]),
            data4: [b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]],
        }
    }

    pub const fn to_u128(&self) -> u128 {
        let d1 = self.data1.to_be_bytes();
        let d2 = self.data2.to_be_bytes();
        let d3 = self.data3.to_be_bytes();
        let d4 = self.data4;
        u128::from_be_bytes([
            d1[0], d1[1], d1[2], d1[3], d2[0], d2[1], d3[0], d3[1], d4[0], d4[1], d4[2], d4[3],
            d4[4], d4[5], d4[6], d4[7],
        ])
    }

    /// Name-based identifier: the first 16 bytes of SHA-256(`name`) with the
    /// version 8 and RFC variant bits set.
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        bytes[6] = (bytes[6] & 0x0F) | 0x80;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Self::from_u128(u128::from_be_bytes(bytes))
    }

    pub fn version(&self) -> u8 {
        (self.data3 >> 12) as u8
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid GUID '{0}'")]
pub struct ParseGuidError(String);

impl FromStr for Guid {
    type Err = ParseGuidError;

    /// Accepts `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}` with or without braces, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseGuidError(s.to_string());
        let inner = s
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(s);

        let groups: Vec<&str> = inner.split('-').collect();
        let lengths = [8, 4, 4, 4, 12];
        if groups.len() != lengths.len()
            || groups.iter().zip(lengths).any(|(g, n)| g.len() != n)
            || !groups.iter().all(|g| g.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(err());
        }

        let hex: String = groups.concat();
        u128::from_str_radix(&hex, 16)
            .map(Guid::from_u128)
            .map_err(|_| err())
    }
}

/// A type with a declared interface identifier
pub trait Interface: 'static {
    const IID: Guid;
}

/// Concurrent `TypeId → &'static Guid` map
#[derive(Default)]
pub struct TypeIdCache {
    // The flag separates declared IIDs from name-derived ones for the same type.
    entries: RwLock<FxHashMap<(TypeId, bool), &'static Guid>>,
}

impl TypeIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name-derived identifier for `T`
    pub fn identifier_of<T: ?Sized + 'static>(&self) -> &'static Guid {
        self.get_or_insert((TypeId::of::<T>(), false), || {
            Guid::from_name(type_name::<T>())
        })
    }

    /// Declared identifier for `T`
    pub fn iid_of<T: Interface + ?Sized>(&self) -> &'static Guid {
        self.get_or_insert((TypeId::of::<T>(), true), || T::IID)
    }

    fn get_or_insert(&self, key: (TypeId, bool), compute: impl FnOnce() -> Guid) -> &'static Guid {
        if let Some(&guid) = self.entries.read().get(&key) {
            return guid;
        }
        let value = compute();
        let mut entries = self.entries.write();
        // Another thread may have published while we computed; its entry wins.
        *entries
            .entry(key)
            .or_insert_with(|| Box::leak(Box::new(value)))
    }

    /// Number of cached types
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for TypeIdCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeIdCache")
            .field("entries", &self.len())
            .finish()
    }
}

fn process_cache() -> &'static TypeIdCache {
    static CACHE: OnceLock<TypeIdCache> = OnceLock::new();
    CACHE.get_or_init(TypeIdCache::new)
}

/// Process-wide name-derived identifier for `T`
pub fn identifier_of<T: ?Sized + 'static>() -> &'static Guid {
    process_cache().identifier_of::<T>()
}

/// Process-wide declared identifier for `T`
pub fn iid_of<T: Interface + ?Sized>() -> &'static Guid {
    process_cache().iid_of::<T>()
}

impl Interop {
    /// Same as the free function [`identifier_of`]; the cache is process-wide.
    pub fn identifier_of<T: ?Sized + 'static>(&self) -> &'static Guid {
        identifier_of::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    struct Marker;

    struct IUnknown;
    impl Interface for IUnknown {
        const IID: Guid = Guid::from_u128(0x00000000_0000_0000_C000_000000000046);
    }

    #[test]
    fn test_display_and_parse() {
        let guid = IUnknown::IID;
        assert_snapshot!(guid.to_string(), @"{00000000-0000-0000-C000-000000000046}");
        assert_eq!("{00000000-0000-0000-c000-000000000046}".parse::<Guid>().unwrap(), guid);
        assert_eq!("00000000-0000-0000-C000-000000000046".parse::<Guid>().unwrap(), guid);
        assert!("{0000-0000}".parse::<Guid>().is_err());
        assert!("{0000000G-0000-0000-C000-000000000046}".parse::<Guid>().is_err());
    }

    #[test]
    fn test_from_name_sets_version_and_variant() {
        let guid = Guid::from_name("tether::Marker");
        assert_eq!(guid.version(), 8);
        assert_eq!(guid.data4[0] & 0xC0, 0x80);
        assert_eq!(guid, Guid::from_name("tether::Marker"));
        assert_ne!(guid, Guid::from_name("tether::Other"));
    }

    #[test]
    fn test_u128_roundtrip() {
        let value = 0x0123_4567_89AB_CDEF_0011_2233_4455_6677u128;
        assert_eq!(Guid::from_u128(value).to_u128(), value);
    }

    #[test]
    fn test_cache_returns_same_reference() {
        let cache = TypeIdCache::new();
        let a = cache.identifier_of::<Marker>();
        let b = cache.identifier_of::<Marker>();
        assert!(std::ptr::eq(a, b));
        assert_eq!(cache.len(), 1);
        assert_ne!(a, cache.identifier_of::<str>());
    }

    #[test]
    fn test_declared_iid_is_cached_separately() {
        let cache = TypeIdCache::new();
        assert_eq!(*cache.iid_of::<IUnknown>(), IUnknown::IID);
        assert_ne!(*cache.identifier_of::<IUnknown>(), IUnknown::IID);
        assert_eq!(cache.len(), 2);
    }
}

//! Key hashing compatible with the cluster
//!
//! Cluster nodes run on the JVM and partition keys by their `hashCode()`.
//! To route a key to the same partition the client has to reproduce those
//! hash codes bit for bit, which is what [`AffinityKey`] does for the
//! supported key types.

/// A key that can be mapped to a partition
pub trait AffinityKey {
    /// Hash code the cluster computes for this key
    fn affinity_hash(&self) -> i32;
}

/// Numeric cache identifier derived from the cache name
pub fn cache_id(name: &str) -> i32 {
    string_hash(name)
}

fn string_hash(s: &str) -> i32 {
    // JVM strings hash their UTF-16 code units
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

fn long_hash(v: i64) -> i32 {
    (v ^ ((v as u64) >> 32) as i64) as i32
}

impl AffinityKey for bool {
    fn affinity_hash(&self) -> i32 {
        if *self {
            1231
        } else {
            1237
        }
    }
}

macro_rules! int_affinity_key {
    ($($t:ty),*) => {
        $(
            impl AffinityKey for $t {
                fn affinity_hash(&self) -> i32 {
                    *self as i32
                }
            }
        )*
    };
}

int_affinity_key!(i8, i16, i32, u8, u16);

impl AffinityKey for u32 {
    fn affinity_hash(&self) -> i32 {
        *self as i32
    }
}

impl AffinityKey for i64 {
    fn affinity_hash(&self) -> i32 {
        long_hash(*self)
    }
}

impl AffinityKey for u64 {
    fn affinity_hash(&self) -> i32 {
        long_hash(*self as i64)
    }
}

impl AffinityKey for char {
    fn affinity_hash(&self) -> i32 {
        let mut units = [0u16; 2];
        self.encode_utf16(&mut units)
            .iter()
            .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(*unit as i32))
    }
}

impl AffinityKey for str {
    fn affinity_hash(&self) -> i32 {
        string_hash(self)
    }
}

impl AffinityKey for String {
    fn affinity_hash(&self) -> i32 {
        string_hash(self)
    }
}

impl AffinityKey for [u8] {
    fn affinity_hash(&self) -> i32 {
        // Arrays.hashCode(byte[]) over signed bytes
        self.iter()
            .fold(1i32, |h, b| h.wrapping_mul(31).wrapping_add(*b as i8 as i32))
    }
}

impl AffinityKey for Vec<u8> {
    fn affinity_hash(&self) -> i32 {
        self.as_slice().affinity_hash()
    }
}

impl AffinityKey for uuid::Uuid {
    fn affinity_hash(&self) -> i32 {
        let (most, least) = self.as_u64_pair();
        let hilo = (most ^ least) as i64;
        ((hilo >> 32) as i32) ^ (hilo as i32)
    }
}

impl<T: AffinityKey + ?Sized> AffinityKey for &T {
    fn affinity_hash(&self) -> i32 {
        (**self).affinity_hash()
    }
}

impl<T: AffinityKey + ?Sized> AffinityKey for Box<T> {
    fn affinity_hash(&self) -> i32 {
        (**self).affinity_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_hash_matches_jvm() {
        assert_eq!("".affinity_hash(), 0);
        assert_eq!("k1".affinity_hash(), 3366);
        assert_eq!("hello".affinity_hash(), 99162322);
        // Overflows and wraps like the JVM
        assert_eq!("polygenelubricants".affinity_hash(), i32::MIN);
    }

    #[test]
    fn test_string_hash_uses_utf16_units() {
        // U+1F600 is a surrogate pair: 0xD83D 0xDE00
        assert_eq!("\u{1F600}".affinity_hash(), 0xD83D * 31 + 0xDE00);
        assert_eq!('\u{1F600}'.affinity_hash(), "\u{1F600}".affinity_hash());
        assert_eq!('a'.affinity_hash(), 97);
    }

    #[test]
    fn test_primitive_hashes() {
        assert_eq!(42i32.affinity_hash(), 42);
        assert_eq!((-7i32).affinity_hash(), -7);
        assert_eq!(true.affinity_hash(), 1231);
        assert_eq!(false.affinity_hash(), 1237);
        assert_eq!(1i64.affinity_hash(), 1);
        assert_eq!((1i64 << 32).affinity_hash(), 1);
        assert_eq!((-1i64).affinity_hash(), 0);
        assert_eq!(u64::MAX.affinity_hash(), 0);
    }

    #[test]
    fn test_byte_array_hash() {
        assert_eq!(Vec::<u8>::new().affinity_hash(), 1);
        assert_eq!(vec![1u8, 2].affinity_hash(), (31 + 1) * 31 + 2);
        assert_eq!([0xFFu8][..].affinity_hash(), 31 - 1);
    }

    #[test]
    fn test_uuid_hash() {
        let id = uuid::Uuid::from_u64_pair(0x0000_0001_0000_0002, 0x0000_0000_0000_0003);
        // hilo = 0x0000_0001_0000_0001 -> 1 ^ 1
        assert_eq!(id.affinity_hash(), 0);
        assert_eq!(uuid::Uuid::nil().affinity_hash(), 0);
    }

    #[test]
    fn test_references_delegate() {
        let key = String::from("k1");
        assert_eq!((&key).affinity_hash(), key.affinity_hash());
        assert_eq!(Box::new(5i32).affinity_hash(), 5);
    }

    #[test]
    fn test_cache_id() {
        assert_eq!(cache_id("person"), "person".affinity_hash());
        assert_ne!(cache_id("person"), cache_id("account"));
    }
}

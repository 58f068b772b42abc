//! FNV-1a 64-bit hashing.
//!
//! Archive files are addressed only by the FNV-1a hash of their normalized
//! path; pack names are hashed the same way to find packs in the storage
//! file's index.

/// FNV-1a 64-bit offset basis.
pub const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2645;

/// FNV-1a 64-bit prime.
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// Compute the FNV-1a 64-bit hash of a byte slice.
#[inline]
pub fn hash_bytes(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Compute the FNV-1a 64-bit hash of a string's UTF-8 bytes.
///
/// The string is hashed as given. Use [`hash_path`] for archive paths.
#[inline]
pub fn hash_str(s: &str) -> u64 {
    hash_bytes(s.as_bytes())
}

/// Normalize an archive path and hash it.
#[inline]
pub fn hash_path(path: &str) -> u64 {
    hash_str(&crate::path::normalize(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_hash_is_basis() {
        assert_eq!(hash_bytes(&[]), FNV_OFFSET_BASIS);
    }

    #[test]
    fn test_known_vectors() {
        // Reference FNV-1a 64 values
        assert_eq!(hash_str("a"), 0xAF63_DC4C_8601_EC8C);
        assert_eq!(hash_str("foobar"), 0x8594_4171_F739_67E8);
    }

    #[test]
    fn test_path_hash_ignores_scheme_and_separators() {
        let plain = hash_str("pokemon/pm0025/pm0025_00.trmdl");
        assert_eq!(hash_path("romfs://pokemon/pm0025/pm0025_00.trmdl"), plain);
        assert_eq!(hash_path("\\pokemon\\pm0025\\pm0025_00.trmdl"), plain);
    }

    proptest! {
        #[test]
        fn prop_hash_is_deterministic(s in ".*") {
            prop_assert_eq!(hash_str(&s), hash_str(&s.clone()));
            prop_assert_eq!(hash_path(&s), hash_str(&crate::path::normalize(&s)));
        }
    }
}

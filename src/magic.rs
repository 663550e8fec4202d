//! The fixed 24-byte archive header.
//!
//! Layout:
//!
//! | bytes  | contents                                              |
//! |--------|-------------------------------------------------------|
//! | 0..4   | `L R Z I`                                             |
//! | 4..6   | major, minor format version                           |
//! | 6..14  | total uncompressed size (LE), or the salt when        |
//! |        | encrypted, or zero when the size is unknown           |
//! | 16..21 | LZMA property bytes when the LZMA back end is used    |
//! | 21     | 1 when an MD5 trailer follows the last chunk          |
//! | 22     | 1 when Block Record payloads are encrypted            |
//!
//! Remaining bytes are reserved and zero.

use crate::config::{LRZ_MAJOR_VERSION, LRZ_MINOR_VERSION, MAGIC_LEN};
use crate::crypto::SALT_LEN;
use crate::error::{LrzError, Result};

/// Decoded archive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Magic {
    pub major: u8,
    pub minor: u8,
    /// Total reconstructed size; `None` when streaming or encrypted.
    pub expected_size: Option<u64>,
    /// Archive salt; present exactly when the archive is encrypted.
    pub salt: Option<[u8; SALT_LEN]>,
    /// LZMA properties captured from the first LZMA block.
    pub lzma_props: Option<[u8; 5]>,
    pub has_md5: bool,
    pub encrypted: bool,
}

/// Everything the encoder needs to render a header.
pub struct MagicParams {
    pub expected_size: Option<u64>,
    pub salt: Option<[u8; SALT_LEN]>,
    pub lzma_props: Option<[u8; 5]>,
    pub has_md5: bool,
}

/// Render the header bytes.  The salt, when present, takes the place of the
/// size field and marks the archive encrypted.
pub fn write_magic(params: &MagicParams) -> [u8; MAGIC_LEN] {
    let mut magic = [0u8; MAGIC_LEN];
    magic[0..4].copy_from_slice(b"LRZI");
    magic[4] = LRZ_MAJOR_VERSION;
    magic[5] = LRZ_MINOR_VERSION;

    if let Some(salt) = params.salt {
        magic[6..6 + SALT_LEN].copy_from_slice(&salt);
    } else if let Some(size) = params.expected_size {
        magic[6..14].copy_from_slice(&size.to_le_bytes());
    }

    if let Some(props) = params.lzma_props {
        magic[16..21].copy_from_slice(&props);
    }
    if params.has_md5 {
        magic[21] = 1;
    }
    if params.salt.is_some() {
        magic[22] = 1;
    }
    magic
}

/// Parse and validate a header.
///
/// A newer minor version is accepted with a warning from the caller; a
/// version from the future major line is still parsed so `info` can describe
/// it.  Unknown hash or encryption markers are fatal.
pub fn read_magic(magic: &[u8; MAGIC_LEN]) -> Result<Magic> {
    if &magic[0..4] != b"LRZI" {
        return Err(LrzError::Format("not an lrzip-format archive".into()));
    }
    let major = magic[4];
    let minor = magic[5];

    let encrypted = match magic[22] {
        0 => false,
        1 => true,
        other => {
            return Err(LrzError::Format(format!(
                "unknown encryption marker {other}"
            )))
        }
    };
    let has_md5 = match magic[21] {
        0 => false,
        1 => true,
        other => return Err(LrzError::Format(format!("unknown hash marker {other}"))),
    };

    let mut salt = None;
    let mut expected_size = None;
    if encrypted {
        let mut s = [0u8; SALT_LEN];
        s.copy_from_slice(&magic[6..6 + SALT_LEN]);
        salt = Some(s);
    } else {
        let size = u64::from_le_bytes(magic[6..14].try_into().unwrap());
        if size != 0 {
            expected_size = Some(size);
        }
    }

    let lzma_props = if magic[16] != 0 {
        let mut props = [0u8; 5];
        props.copy_from_slice(&magic[16..21]);
        Some(props)
    } else {
        None
    };

    Ok(Magic {
        major,
        minor,
        expected_size,
        salt,
        lzma_props,
        has_md5,
        encrypted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_plain() {
        let magic = write_magic(&MagicParams {
            expected_size: Some(1_048_576),
            salt: None,
            lzma_props: Some([0x5d, 0, 0, 0x10, 0]),
            has_md5: true,
        });
        let parsed = read_magic(&magic).unwrap();
        assert_eq!(parsed.expected_size, Some(1_048_576));
        assert_eq!(parsed.lzma_props, Some([0x5d, 0, 0, 0x10, 0]));
        assert!(parsed.has_md5);
        assert!(!parsed.encrypted);
    }

    #[test]
    fn salt_takes_over_size_field() {
        let salt = [9u8; SALT_LEN];
        let magic = write_magic(&MagicParams {
            expected_size: Some(12345),
            salt: Some(salt),
            lzma_props: None,
            has_md5: false,
        });
        assert_eq!(magic[22], 1);
        let parsed = read_magic(&magic).unwrap();
        assert_eq!(parsed.salt, Some(salt));
        assert_eq!(parsed.expected_size, None);
    }

    #[test]
    fn rejects_foreign_data() {
        let mut magic = [0u8; MAGIC_LEN];
        magic[0..4].copy_from_slice(b"PK\x03\x04");
        assert!(read_magic(&magic).is_err());
    }
}

//! Content identifiers for object blocks
//!
//! Every block is addressed by a CIDv1 with the raw codec and a BLAKE3-256
//! multihash, so identical chunks of different objects share one block.

use crate::{BlockStoreError, Result};
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};

/// Multicodec of raw binary blocks
pub const RAW_CODEC: u64 = 0x55;

/// CID of a raw block
pub fn block_cid(data: &[u8]) -> Cid {
    Cid::new_v1(RAW_CODEC, Code::Blake3_256.digest(data))
}

/// Fail with [`BlockStoreError::Corrupted`] unless `data` hashes to `cid`
pub fn verify_block(cid: &Cid, data: &[u8]) -> Result<()> {
    if block_cid(data) == *cid {
        Ok(())
    } else {
        Err(BlockStoreError::Corrupted { cid: *cid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cid::Version;

    #[test]
    fn test_block_cid() {
        let cid = block_cid(b"Hello, World!");

        assert_eq!(cid.version(), Version::V1);
        assert_eq!(cid.codec(), RAW_CODEC);
        assert_eq!(cid.hash().code(), u64::from(Code::Blake3_256));
    }

    #[test]
    fn test_content_addressing() {
        assert_ne!(block_cid(b"data1"), block_cid(b"data2"));
        assert_eq!(block_cid(b"data1"), block_cid(b"data1"));
    }

    #[test]
    fn test_verify_block() {
        let cid = block_cid(b"verify me");

        assert!(verify_block(&cid, b"verify me").is_ok());
        assert!(matches!(
            verify_block(&cid, b"wrong data"),
            Err(BlockStoreError::Corrupted { .. })
        ));
    }
}

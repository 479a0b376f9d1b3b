//! Block types

use bytes::Bytes;
use cid::Cid;

/// One chunk of an object and its content identifier
#[derive(Clone, Debug)]
pub struct Block {
    pub cid: Cid,
    pub data: Bytes,
}

impl Block {
    /// Wrap `data`, computing its CID
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let cid = crate::cid_utils::block_cid(&data);
        Self { cid, data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

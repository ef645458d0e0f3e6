//! Log record encoding.
//!
//! ```text
//! Insert: [type=0 (1)][xid (8)][page (4)][offset (2)][raw ...]
//! Update: [type=1 (1)][xid (8)][uid (8)][old raw ...][new raw ...]
//! ```
//!
//! `raw` is a whole data item (`[valid][size][payload]`). The two halves of
//! an update always have the same length.

use crate::common::{codec, Error, PageId, Result, Uid, Xid};

const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

const OF_TYPE: usize = 0;
const OF_XID: usize = OF_TYPE + 1;

const OF_INSERT_PAGE: usize = OF_XID + 8;
const OF_INSERT_OFFSET: usize = OF_INSERT_PAGE + 4;
const OF_INSERT_RAW: usize = OF_INSERT_OFFSET + 2;

const OF_UPDATE_UID: usize = OF_XID + 8;
const OF_UPDATE_RAW: usize = OF_UPDATE_UID + 8;

/// A decoded log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Insert {
        xid: Xid,
        page_id: PageId,
        offset: u16,
        raw: Vec<u8>,
    },
    Update {
        xid: Xid,
        uid: Uid,
        old_raw: Vec<u8>,
        new_raw: Vec<u8>,
    },
}

/// Encode an insert of `raw` at `(page_id, offset)`.
pub fn encode_insert(xid: Xid, page_id: PageId, offset: u16, raw: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; OF_INSERT_RAW + raw.len()];
    buf[OF_TYPE] = TYPE_INSERT;
    codec::put_u64(&mut buf, OF_XID, xid);
    codec::put_u32(&mut buf, OF_INSERT_PAGE, page_id.0);
    codec::put_u16(&mut buf, OF_INSERT_OFFSET, offset);
    buf[OF_INSERT_RAW..].copy_from_slice(raw);
    buf
}

/// Encode an in-place update of the item at `uid`.
pub fn encode_update(xid: Xid, uid: Uid, old_raw: &[u8], new_raw: &[u8]) -> Vec<u8> {
    debug_assert_eq!(old_raw.len(), new_raw.len());
    let mut buf = vec![0u8; OF_UPDATE_RAW + old_raw.len() + new_raw.len()];
    buf[OF_TYPE] = TYPE_UPDATE;
    codec::put_u64(&mut buf, OF_XID, xid);
    codec::put_u64(&mut buf, OF_UPDATE_UID, uid.raw());
    let mid = OF_UPDATE_RAW + old_raw.len();
    buf[OF_UPDATE_RAW..mid].copy_from_slice(old_raw);
    buf[mid..].copy_from_slice(new_raw);
    buf
}

impl LogRecord {
    /// Decode one entry's data.
    ///
    /// # Errors
    /// Returns `Error::CorruptRecord` for an unknown type, a short buffer or
    /// an update with an odd payload length.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        match buf.first() {
            Some(&TYPE_INSERT) if buf.len() >= OF_INSERT_RAW => Ok(LogRecord::Insert {
                xid: codec::get_u64(buf, OF_XID),
                page_id: PageId::new(codec::get_u32(buf, OF_INSERT_PAGE)),
                offset: codec::get_u16(buf, OF_INSERT_OFFSET),
                raw: buf[OF_INSERT_RAW..].to_vec(),
            }),
            Some(&TYPE_UPDATE)
                if buf.len() >= OF_UPDATE_RAW && (buf.len() - OF_UPDATE_RAW) % 2 == 0 =>
            {
                let mid = OF_UPDATE_RAW + (buf.len() - OF_UPDATE_RAW) / 2;
                Ok(LogRecord::Update {
                    xid: codec::get_u64(buf, OF_XID),
                    uid: Uid::from_raw(codec::get_u64(buf, OF_UPDATE_UID)),
                    old_raw: buf[OF_UPDATE_RAW..mid].to_vec(),
                    new_raw: buf[mid..].to_vec(),
                })
            }
            Some(&kind) => Err(Error::CorruptRecord(format!(
                "log record of type {} and length {}",
                kind,
                buf.len()
            ))),
            None => Err(Error::CorruptRecord("empty log record".to_string())),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            LogRecord::Insert {
                xid,
                page_id,
                offset,
                raw,
            } => encode_insert(*xid, *page_id, *offset, raw),
            LogRecord::Update {
                xid,
                uid,
                old_raw,
                new_raw,
            } => encode_update(*xid, *uid, old_raw, new_raw),
        }
    }

    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert { xid, .. } | LogRecord::Update { xid, .. } => *xid,
        }
    }

    /// The page this record touches.
    pub fn page_id(&self) -> PageId {
        match self {
            LogRecord::Insert { page_id, .. } => *page_id,
            LogRecord::Update { uid, .. } => uid.page_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_layout() {
        let buf = encode_insert(7, PageId::new(3), 42, &[0, 0, 1, 0xAA]);
        assert_eq!(buf.len(), 15 + 4);
        assert_eq!(buf[0], 0);
        assert_eq!(&buf[1..9], &7u64.to_be_bytes());
        assert_eq!(&buf[9..13], &3u32.to_be_bytes());
        assert_eq!(&buf[13..15], &42u16.to_be_bytes());

        let record = LogRecord::decode(&buf).unwrap();
        assert_eq!(record.xid(), 7);
        assert_eq!(record.page_id(), PageId::new(3));
    }

    #[test]
    fn test_update_splits_halves() {
        let uid = Uid::new(PageId::new(5), 100);
        let buf = encode_update(9, uid, &[1, 2, 3], &[4, 5, 6]);

        match LogRecord::decode(&buf).unwrap() {
            LogRecord::Update {
                xid,
                uid: decoded,
                old_raw,
                new_raw,
            } => {
                assert_eq!(xid, 9);
                assert_eq!(decoded, uid);
                assert_eq!(old_raw, vec![1, 2, 3]);
                assert_eq!(new_raw, vec![4, 5, 6]);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(LogRecord::decode(&[]), Err(Error::CorruptRecord(_))));
        assert!(matches!(
            LogRecord::decode(&[7, 0, 0]),
            Err(Error::CorruptRecord(_))
        ));
        assert!(matches!(
            LogRecord::decode(&[0, 1, 2, 3]),
            Err(Error::CorruptRecord(_))
        ));

        let mut odd = encode_update(1, Uid::from_raw(1), &[1], &[2]);
        odd.push(3);
        assert!(matches!(
            LogRecord::decode(&odd),
            Err(Error::CorruptRecord(_))
        ));
    }
}

use crate::errors::DbError;
use crate::types::CollectionName;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Upper bound on one encoded record; a larger length prefix is treated as corruption.
const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

/// WAL operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// Insert or full replacement of a document body.
    Put,
    Delete,
    /// Drops every document of a collection.
    Clear,
}

/// One WAL record, bincode-encoded behind a length prefix and a crc32 of the encoded bytes.
/// `payload` holds the raw BSON bytes of the document body for `Put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub op: OpKind,
    pub collection: CollectionName,
    pub id: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub ts_millis: i64,
}

impl WalRecord {
    pub fn put(collection: &str, id: &str, body: &bson::Document) -> Result<Self, DbError> {
        Ok(Self {
            op: OpKind::Put,
            collection: collection.to_string(),
            id: Some(id.to_string()),
            payload: Some(bson::to_vec(body)?),
            ts_millis: chrono::Utc::now().timestamp_millis(),
        })
    }

    #[must_use]
    pub fn delete(collection: &str, id: &str) -> Self {
        Self {
            op: OpKind::Delete,
            collection: collection.to_string(),
            id: Some(id.to_string()),
            payload: None,
            ts_millis: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[must_use]
    pub fn clear(collection: &str) -> Self {
        Self {
            op: OpKind::Clear,
            collection: collection.to_string(),
            id: None,
            payload: None,
            ts_millis: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Decodes the BSON body carried by a `Put`.
    pub fn body(&self) -> Result<Option<bson::Document>, DbError> {
        match &self.payload {
            Some(bytes) => Ok(Some(bson::from_slice(bytes)?)),
            None => Ok(None),
        }
    }
}

pub fn write_record<W: Write>(writer: &mut W, rec: &WalRecord) -> Result<(), DbError> {
    let bytes = bincode::serde::encode_to_vec(rec, bincode::config::standard())?;
    let len = u32::try_from(bytes.len()).map_err(|_| DbError::WalError("record too large".into()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&crc32fast::hash(&bytes).to_le_bytes())?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// Reads the next record. `Ok(None)` at a clean end of file; a short or corrupt tail is
/// reported as `WalError` so replay can stop there.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Option<WalRecord>, DbError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(DbError::Io(e)),
    }
    let mut crc_buf = [0u8; 4];
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Err(DbError::WalError(format!("record length {len} out of range")));
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut crc_buf)
        .and_then(|()| reader.read_exact(&mut buf))
        .map_err(|e| DbError::WalError(format!("torn record: {e}")))?;
    if crc32fast::hash(&buf) != u32::from_le_bytes(crc_buf) {
        return Err(DbError::WalError("checksum mismatch".into()));
    }
    let (rec, _) = bincode::serde::decode_from_slice(&buf, bincode::config::standard())?;
    Ok(Some(rec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use std::io::Cursor;

    #[test]
    fn records_round_trip_and_stop_at_torn_tail() {
        let mut buf = Vec::new();
        let put = WalRecord::put("tours", "abc", &doc! { "name": "The Forest Hiker" }).unwrap();
        write_record(&mut buf, &put).unwrap();
        write_record(&mut buf, &WalRecord::delete("tours", "abc")).unwrap();
        let full = buf.len();
        write_record(&mut buf, &WalRecord::clear("tours")).unwrap();
        buf.truncate(full + 6);

        let mut r = Cursor::new(buf);
        let first = read_record(&mut r).unwrap().unwrap();
        assert_eq!(first.op, OpKind::Put);
        assert_eq!(first.body().unwrap().unwrap().get_str("name").unwrap(), "The Forest Hiker");
        assert_eq!(read_record(&mut r).unwrap().unwrap().op, OpKind::Delete);
        assert!(matches!(read_record(&mut r), Err(DbError::WalError(_))));
    }
}

#![allow(clippy::cast_possible_truncation)]
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;
use tracing::warn;

const WAL_V3_MAGIC: u8 = 0xFF;

/// Durability mode for the write-ahead log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WalSyncMode {
    /// Fsync every write (Durability: Max, Speed: Low)
    Strict,
    /// Flush to OS cache (Durability: Medium, Speed: Max)
    Async,
    /// Background fsync (Durability: High, Speed: High)
    Batch,
}

/// Write-ahead log for durability. Appends operations to a log file with
/// CRC32 checksums so a crash mid-write truncates cleanly on replay instead
/// of corrupting the tail of the file.
#[derive(Debug)]
pub struct Wal {
    file: BufWriter<File>,
    mode: WalSyncMode,
}

/// An operation recorded in the WAL.
#[derive(Debug, Clone, PartialEq)]
pub enum WalEntry {
    Insert {
        id: u32,
        vector: Vec<f32>,
        metadata: HashMap<String, String>,
        logical_clock: u64,
    },
    Tombstone {
        id: u32,
        logical_clock: u64,
    },
}

impl Wal {
    pub fn new(path: &Path, mode: WalSyncMode) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: BufWriter::new(file),
            mode,
        })
    }

    fn serialize_insert(
        id: u32,
        vector: &[f32],
        metadata: &HashMap<String, String>,
        logical_clock: u64,
    ) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        // OpCode 3: Insert with logical clock, f32 components.
        buf.write_u8(3)?;
        buf.write_u32::<LittleEndian>(id)?;
        buf.write_u64::<LittleEndian>(logical_clock)?;

        buf.write_u32::<LittleEndian>(vector.len() as u32)?;
        for &val in vector {
            buf.write_f32::<LittleEndian>(val)?;
        }

        buf.write_u32::<LittleEndian>(metadata.len() as u32)?;
        for (k, v) in metadata {
            let k_bytes = k.as_bytes();
            buf.write_u32::<LittleEndian>(k_bytes.len() as u32)?;
            buf.write_all(k_bytes)?;

            let v_bytes = v.as_bytes();
            buf.write_u32::<LittleEndian>(v_bytes.len() as u32)?;
            buf.write_all(v_bytes)?;
        }
        Ok(buf)
    }

    fn serialize_tombstone(id: u32, logical_clock: u64) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        // OpCode 4: Tombstone.
        buf.write_u8(4)?;
        buf.write_u32::<LittleEndian>(id)?;
        buf.write_u64::<LittleEndian>(logical_clock)?;
        Ok(buf)
    }

    fn write_packet(&mut self, payload: &[u8]) -> io::Result<()> {
        let len = payload.len() as u32;
        let mut hasher = Hasher::new();
        hasher.update(payload);
        let crc = hasher.finalize();

        // Header: [Magic: 1][Length: 4][CRC: 4]
        self.file.write_u8(WAL_V3_MAGIC)?;
        self.file.write_u32::<LittleEndian>(len)?;
        self.file.write_u32::<LittleEndian>(crc)?;
        self.file.write_all(payload)?;

        self.file.flush()?;
        if self.mode == WalSyncMode::Strict {
            self.file.get_ref().sync_all()?;
        }

        Ok(())
    }

    pub fn append(
        &mut self,
        id: u32,
        vector: &[f32],
        metadata: &HashMap<String, String>,
        logical_clock: u64,
    ) -> io::Result<()> {
        let payload = Self::serialize_insert(id, vector, metadata, logical_clock)?;
        self.write_packet(&payload)
    }

    pub fn append_tombstone(&mut self, id: u32, logical_clock: u64) -> io::Result<()> {
        let payload = Self::serialize_tombstone(id, logical_clock)?;
        self.write_packet(&payload)
    }

    pub fn append_batch(
        &mut self,
        entries: &[(Vec<f32>, u32, HashMap<String, String>)],
        logical_clock: u64,
    ) -> io::Result<()> {
        for (vector, id, metadata) in entries {
            let payload = Self::serialize_insert(*id, vector, metadata, logical_clock)?;
            self.write_packet(&payload)?;
        }
        Ok(())
    }

    /// Force sync all changes to disk immediately.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    pub fn replay<F>(path: &Path, mut callback: F) -> io::Result<()>
    where
        F: FnMut(WalEntry),
    {
        if !path.exists() {
            return Ok(());
        }

        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut valid_pos = 0u64;

        loop {
            let magic = match reader.read_u8() {
                Ok(b) => b,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            };

            if magic == WAL_V3_MAGIC {
                let Ok(len) = reader.read_u32::<LittleEndian>() else {
                    break;
                };
                let Ok(stored_crc) = reader.read_u32::<LittleEndian>() else {
                    break;
                };

                let mut payload = vec![0u8; len as usize];
                if reader.read_exact(&mut payload).is_err() {
                    break;
                }

                let mut hasher = Hasher::new();
                hasher.update(&payload);
                if hasher.finalize() != stored_crc {
                    warn!(offset = valid_pos, "WAL corruption detected (CRC mismatch), truncating");
                    break;
                }

                let mut cursor = Cursor::new(payload);
                match Self::parse_entry(&mut cursor) {
                    Ok(entry) => callback(entry),
                    Err(e) => warn!(error = %e, "failed to parse WAL entry body"),
                }

                valid_pos += 1 + 4 + 4 + u64::from(len);
            } else {
                let opcode = magic;
                if let Ok((entry, bytes_read)) = Self::parse_legacy_entry(opcode, &mut reader) {
                    callback(entry);
                    valid_pos += 1 + bytes_read as u64;
                } else {
                    warn!(offset = valid_pos, "legacy WAL corruption or EOF, truncating");
                    break;
                }
            }
        }

        if valid_pos < file_len {
            warn!(from = file_len, to = valid_pos, "healing WAL by truncating trailing garbage");
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_pos)?;
        }

        Ok(())
    }

    fn parse_entry(cursor: &mut Cursor<Vec<u8>>) -> io::Result<WalEntry> {
        let opcode = cursor.read_u8()?;
        match opcode {
            3 => {
                let id = cursor.read_u32::<LittleEndian>()?;
                let logical_clock = cursor.read_u64::<LittleEndian>()?;
                let vec_len = cursor.read_u32::<LittleEndian>()?;
                let mut vector = Vec::with_capacity(vec_len as usize);
                for _ in 0..vec_len {
                    vector.push(cursor.read_f32::<LittleEndian>()?);
                }
                let meta_len = cursor.read_u32::<LittleEndian>()?;
                let mut metadata = HashMap::with_capacity(meta_len as usize);
                for _ in 0..meta_len {
                    let k_len = cursor.read_u32::<LittleEndian>()?;
                    let mut k_buf = vec![0u8; k_len as usize];
                    cursor.read_exact(&mut k_buf)?;
                    let key = String::from_utf8(k_buf)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

                    let v_len = cursor.read_u32::<LittleEndian>()?;
                    let mut v_buf = vec![0u8; v_len as usize];
                    cursor.read_exact(&mut v_buf)?;
                    let val = String::from_utf8(v_buf)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    metadata.insert(key, val);
                }
                Ok(WalEntry::Insert {
                    id,
                    vector,
                    metadata,
                    logical_clock,
                })
            }
            4 => {
                let id = cursor.read_u32::<LittleEndian>()?;
                let logical_clock = cursor.read_u64::<LittleEndian>()?;
                Ok(WalEntry::Tombstone { id, logical_clock })
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unknown opcode in WAL payload",
            )),
        }
    }

    fn parse_legacy_entry<R: Read>(opcode: u8, reader: &mut R) -> io::Result<(WalEntry, usize)> {
        // Legacy V1/V2 records predate the logical-clock field and the f32
        // component switch; they are read back as f64 on disk for backward
        // compatibility with stores written before this format, then
        // narrowed to f32 for in-memory use.
        let mut bytes_read = 0;
        match opcode {
            1 => {
                let id = reader.read_u32::<LittleEndian>()?;
                bytes_read += 4;
                let len = reader.read_u32::<LittleEndian>()?;
                bytes_read += 4;
                let mut vector = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    vector.push(reader.read_f64::<LittleEndian>()? as f32);
                    bytes_read += 8;
                }
                Ok((
                    WalEntry::Insert {
                        id,
                        vector,
                        metadata: HashMap::new(),
                        logical_clock: 0,
                    },
                    bytes_read,
                ))
            }
            2 => {
                let id = reader.read_u32::<LittleEndian>()?;
                bytes_read += 4;

                let vec_len = reader.read_u32::<LittleEndian>()?;
                bytes_read += 4;
                let mut vector = Vec::with_capacity(vec_len as usize);
                for _ in 0..vec_len {
                    vector.push(reader.read_f64::<LittleEndian>()? as f32);
                    bytes_read += 8;
                }

                let meta_len = reader.read_u32::<LittleEndian>()?;
                bytes_read += 4;
                let mut metadata = HashMap::with_capacity(meta_len as usize);
                for _ in 0..meta_len {
                    let k_len = reader.read_u32::<LittleEndian>()?;
                    bytes_read += 4;
                    let mut k_buf = vec![0u8; k_len as usize];
                    reader.read_exact(&mut k_buf)?;
                    bytes_read += k_len as usize;
                    let key = String::from_utf8(k_buf)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

                    let v_len = reader.read_u32::<LittleEndian>()?;
                    bytes_read += 4;
                    let mut v_buf = vec![0u8; v_len as usize];
                    reader.read_exact(&mut v_buf)?;
                    bytes_read += v_len as usize;
                    let val = String::from_utf8(v_buf)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    metadata.insert(key, val);
                }
                Ok((
                    WalEntry::Insert {
                        id,
                        vector,
                        metadata,
                        logical_clock: 0,
                    },
                    bytes_read,
                ))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unknown legacy opcode",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_insert_and_tombstone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::new(&path, WalSyncMode::Strict).unwrap();
            let mut meta = HashMap::new();
            meta.insert("k".to_string(), "v".to_string());
            wal.append(1, &[1.0, 2.0, 3.0], &meta, 5).unwrap();
            wal.append_tombstone(1, 6).unwrap();
        }

        let mut entries = Vec::new();
        Wal::replay(&path, |e| entries.push(e)).unwrap();
        assert_eq!(entries.len(), 2);
        match &entries[0] {
            WalEntry::Insert { id, vector, logical_clock, .. } => {
                assert_eq!(*id, 1);
                assert_eq!(vector, &vec![1.0, 2.0, 3.0]);
                assert_eq!(*logical_clock, 5);
            }
            _ => panic!("expected insert"),
        }
        assert!(matches!(entries[1], WalEntry::Tombstone { id: 1, logical_clock: 6 }));
    }

    #[test]
    fn truncates_trailing_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::new(&path, WalSyncMode::Strict).unwrap();
            wal.append(1, &[1.0], &HashMap::new(), 0).unwrap();
        }
        // Append a garbage tail that looks like a partial record.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[WAL_V3_MAGIC, 0xFF, 0xFF, 0xFF]).unwrap();
        }

        let mut entries = Vec::new();
        Wal::replay(&path, |e| entries.push(e)).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(std::fs::metadata(&path).unwrap().len() < 100);
    }
}

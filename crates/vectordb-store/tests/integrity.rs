use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use vectordb_store::wal::{Wal, WalSyncMode};

// Record layout: header (1 magic + 4 len + 4 crc = 9) + payload
// (1 opcode + 4 id + 8 clock + 4 veclen + veclen*4 bytes + 4 metalen).
// For a 10-element f32 vector and no metadata that's 9 + 61 = 70 bytes/record.

#[test]
fn wal_partial_write_is_truncated_to_last_full_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal_trunc.log");

    {
        let mut wal = Wal::new(&path, WalSyncMode::Async).unwrap();
        for i in 0..3 {
            let vec = vec![0.5f32; 10];
            wal.append(i, &vec, &HashMap::new(), 0).unwrap();
        }
    }

    let full_len = fs::metadata(&path).unwrap().len();
    assert!(full_len > 150);

    let truncated_len = full_len - 50;
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(truncated_len).unwrap();
    drop(file);

    let mut count = 0;
    Wal::replay(&path, |_| {
        count += 1;
    })
    .unwrap();

    assert_eq!(count, 2, "should recover exactly the 2 intact records");

    let new_len = fs::metadata(&path).unwrap().len();
    assert!(new_len < truncated_len);
    assert!(new_len > 0);
}

#[test]
fn wal_crc_mismatch_drops_the_corrupted_record_and_everything_after() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal_crc.log");

    {
        let mut wal = Wal::new(&path, WalSyncMode::Async).unwrap();
        for i in 0..3 {
            let vec = vec![0.5f32; 10];
            wal.append(i, &vec, &HashMap::new(), 0).unwrap();
        }
    }

    // Flip a byte inside the second record's payload (record 2 spans roughly
    // byte 70..140; 100 lands well inside its payload).
    let mut data = fs::read(&path).unwrap();
    data[100] = data[100].wrapping_add(1);
    fs::write(&path, &data).unwrap();

    let mut count = 0;
    Wal::replay(&path, |_| {
        count += 1;
    })
    .unwrap();

    assert_eq!(count, 1, "only the first, uncorrupted record should survive");

    let recovered_len = fs::metadata(&path).unwrap().len();
    assert!(recovered_len < data.len() as u64);
}

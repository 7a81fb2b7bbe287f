use proptest::prelude::*;
use std::collections::HashMap;
use tempfile::tempdir;
use vectordb_store::wal::{Wal, WalEntry, WalSyncMode};

const D: usize = 4;

fn arb_vector() -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(any::<f32>().prop_filter("finite", |x| x.is_finite()), D)
}

fn arb_metadata() -> impl Strategy<Value = HashMap<String, String>> {
    proptest::collection::hash_map("[a-z]", "[a-z0-9]", 0..5)
}

#[derive(Debug, Clone)]
struct TestEntry {
    id: u32,
    vector: Vec<f32>,
    metadata: HashMap<String, String>,
}

fn arb_entries() -> impl Strategy<Value = Vec<TestEntry>> {
    proptest::collection::vec(
        (any::<u32>(), arb_vector(), arb_metadata()).prop_map(|(id, vector, metadata)| TestEntry {
            id,
            vector,
            metadata,
        }),
        1..50,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn wal_append_replay_round_trips(entries in arb_entries()) {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("wal_test.hyp");

        {
            let mut wal = Wal::new(&wal_path, WalSyncMode::Async).unwrap();
            for (clock, entry) in entries.iter().enumerate() {
                wal.append(entry.id, &entry.vector, &entry.metadata, clock as u64).unwrap();
            }
            wal.sync().unwrap();
        }

        let mut replayed = Vec::new();
        Wal::replay(&wal_path, |entry| {
            if let WalEntry::Insert { id, vector, metadata, .. } = entry {
                replayed.push(TestEntry { id, vector, metadata });
            }
        }).unwrap();

        prop_assert_eq!(replayed.len(), entries.len());
        for (original, replayed) in entries.iter().zip(replayed.iter()) {
            prop_assert_eq!(original.id, replayed.id);
            prop_assert_eq!(&original.vector, &replayed.vector);
            prop_assert_eq!(&original.metadata, &replayed.metadata);
        }
    }

    #[test]
    fn wal_survives_truncated_tail(entries in arb_entries(), cut_bytes in 1usize..100usize) {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("wal_corrupt.hyp");

        {
            let mut wal = Wal::new(&wal_path, WalSyncMode::Async).unwrap();
            for entry in &entries {
                wal.append(entry.id, &entry.vector, &entry.metadata, 0).unwrap();
            }
            wal.sync().unwrap();
        }

        let file_len = std::fs::metadata(&wal_path).unwrap().len();
        if file_len > cut_bytes as u64 {
            let file = std::fs::OpenOptions::new().write(true).open(&wal_path).unwrap();
            file.set_len(file_len - cut_bytes as u64).unwrap();
        }

        let mut replayed = Vec::new();
        let res = Wal::replay(&wal_path, |entry| {
            if let WalEntry::Insert { id, vector, metadata, .. } = entry {
                replayed.push(TestEntry { id, vector, metadata });
            }
        });

        prop_assert!(res.is_ok());
        for i in 0..replayed.len() {
            prop_assert_eq!(entries[i].id, replayed[i].id);
            prop_assert_eq!(&entries[i].vector, &replayed[i].vector);
            prop_assert_eq!(&entries[i].metadata, &replayed[i].metadata);
        }
    }
}

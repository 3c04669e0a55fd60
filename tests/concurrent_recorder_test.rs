use chrono::{TimeZone, Utc};
use std::thread;
use tempfile::TempDir;

use storage_billing::db::Store;
use storage_billing::recorder::record_usage;

/// Concurrent writers for the same hour converge on one record holding the maximum
#[test]
fn test_concurrent_same_hour_records_converge() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test_concurrent.db");
    // Create the schema before the writers race
    Store::open(&db_path).unwrap();

    let hour = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();

    let handles: Vec<_> = (0..10u64)
        .map(|i| {
            let db_path = db_path.clone();
            thread::spawn(move || {
                for iteration in 0..5u64 {
                    let bytes = i * 1000 + iteration;
                    let at = hour + chrono::TimeDelta::minutes((i * 5 + iteration) as i64);

                    // Retry logic for database lock errors
                    let mut attempts = 0;
                    let result = loop {
                        let outcome = Store::open(&db_path)
                            .and_then(|store| record_usage(&store, "shared-user", bytes, at));
                        match outcome {
                            Ok(r) => break Ok(r),
                            Err(e) if e.to_string().contains("locked") && attempts < 5 => {
                                attempts += 1;
                                thread::sleep(std::time::Duration::from_millis(50 * attempts));
                            }
                            Err(e) => break Err(e),
                        }
                    };

                    assert!(
                        result.is_ok(),
                        "Thread {} iteration {} failed: {:?}",
                        i,
                        iteration,
                        result.err()
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let store = Store::open(&db_path).unwrap();
    let records = store.usage_for_user("shared-user").unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].date, hour);
    assert_eq!(records[0].max_usage, 9004);
}

/// Writers in different hours each get their own record
#[test]
fn test_concurrent_distinct_hours_do_not_collide() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test_hours.db");
    Store::open(&db_path).unwrap();

    let base = Utc.with_ymd_and_hms(2024, 6, 3, 0, 30, 0).unwrap();
    let handles: Vec<_> = (0..6i64)
        .map(|h| {
            let db_path = db_path.clone();
            thread::spawn(move || {
                let store = Store::open(&db_path).unwrap();
                record_usage(&store, "u1", 100 + h as u64, base + chrono::TimeDelta::hours(h))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let store = Store::open(&db_path).unwrap();
    let records = store.usage_for_user("u1").unwrap();
    assert_eq!(records.len(), 6);
    for (h, r) in records.iter().enumerate() {
        assert_eq!(r.max_usage, 100 + h as u64);
    }
}

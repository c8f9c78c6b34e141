mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{company, ids, init_logging, RecordingStore};
use custq::{Operation, QueueError, QueueService, Record, StoreError, SyncReport};

fn service(capacity: usize) -> (Arc<RecordingStore>, QueueService) {
    init_logging();
    let store = Arc::new(RecordingStore::new());
    let svc = QueueService::new(store.clone(), capacity);
    (store, svc)
}

fn seeded(capacity: usize, seed: std::ops::Range<u64>) -> (Arc<RecordingStore>, QueueService) {
    let (store, svc) = service(capacity);
    for id in seed {
        svc.add(company(id), None).unwrap();
    }
    (store, svc)
}

#[test]
fn add_then_get_returns_same_record_and_deletes_it() {
    let (store, svc) = service(5);
    let id = svc.add(company(10), None).unwrap();
    assert_eq!(id.value(), 10);
    assert_eq!(store.persisted(), vec![10]);

    let got = svc.get(None).unwrap();
    assert_eq!(got.id(), Some(id));
    assert_eq!(got.name(), "TestCo10");
    assert_eq!(got.description(), "TestCo10 Description");
    assert_eq!(got.number(), "07423134565");
    assert!(store.persisted().is_empty());
    assert_eq!(store.deletes(), 1);
}

#[test]
fn records_come_out_in_insertion_order() {
    let (_, svc) = seeded(5, 10..15);
    let order: Vec<u64> = (0..5)
        .map(|_| svc.get(None).unwrap().id().unwrap().value())
        .collect();
    assert_eq!(order, vec![10, 11, 12, 13, 14]);
}

#[test]
fn group_on_empty_queue_makes_no_store_call() {
    let (store, svc) = service(5);
    let group = svc.get_group(4).unwrap();
    assert!(group.is_empty());
    assert!(store.bulk_deletes().is_empty());
}

#[test]
fn group_takes_oldest_and_issues_one_bulk_delete() {
    let (store, svc) = seeded(5, 10..15);

    let group = svc.get_group(4).unwrap();
    assert_eq!(ids(&group), vec![10, 11, 12, 13]);

    let bulk = store.bulk_deletes();
    assert_eq!(bulk.len(), 1);
    assert_eq!(bulk[0].len(), 4);
    assert_eq!(store.deletes(), 0);

    assert_eq!(svc.len(), 1);
    assert_eq!(store.persisted(), vec![14]);
}

#[test]
fn group_larger_than_queue_returns_everything() {
    let (_, svc) = seeded(5, 10..13);
    assert_eq!(ids(&svc.get_group(50).unwrap()), vec![10, 11, 12]);
    assert!(svc.is_empty());
}

#[test]
fn full_queue_rejects_add_after_timeout_and_hands_record_back() {
    let (store, svc) = seeded(5, 10..15);

    let started = Instant::now();
    let err = svc
        .add(company(15), Some(Duration::from_millis(50)))
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(50));

    match err {
        QueueError::QueueFull { record, .. } => {
            assert_eq!(record.id().map(|id| id.value()), Some(15));
            assert_eq!(record.name(), "TestCo15");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(svc.len(), 5);
    assert_eq!(store.saves(), 5);
    assert!(!store.persisted().contains(&15));
}

#[test]
fn full_queue_without_timeout_fails_immediately() {
    let (_, svc) = seeded(5, 10..15);
    let started = Instant::now();
    assert!(matches!(
        svc.add(company(15), None),
        Err(QueueError::QueueFull { .. })
    ));
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn empty_queue_rejects_get_after_timeout() {
    let (store, svc) = service(5);
    let started = Instant::now();
    let err = svc.get(Some(Duration::from_millis(50))).unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(matches!(err, QueueError::QueueEmpty { .. }));
    assert!(err.is_retryable());
    assert_eq!(store.deletes(), 0);
}

#[test]
fn blocked_add_completes_once_a_consumer_frees_space() {
    let (store, svc) = seeded(5, 10..15);
    let svc = Arc::new(svc);

    let consumer = {
        let svc = svc.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            svc.get(None).unwrap()
        })
    };

    let id = svc
        .add(company(15), Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(id.value(), 15);

    assert_eq!(consumer.join().unwrap().id().unwrap().value(), 10);
    assert_eq!(svc.len(), 5);
    assert_eq!(store.persisted(), vec![11, 12, 13, 14, 15]);
}

#[test]
fn blocked_get_completes_once_a_producer_adds() {
    let (_, svc) = service(5);
    let svc = Arc::new(svc);

    let producer = {
        let svc = svc.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            svc.add(company(42), None).unwrap()
        })
    };

    let got = svc.get(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(got.id(), Some(producer.join().unwrap()));
    assert!(svc.is_empty());
}

#[test]
fn failed_save_leaves_queue_and_store_unchanged() {
    let (store, svc) = seeded(5, 10..12);
    store.fail_save.store(true, Ordering::SeqCst);

    let err = svc.add(company(12), None).unwrap_err();
    match &err {
        QueueError::StoreFailure {
            operation, records, ..
        } => {
            assert_eq!(*operation, Operation::Add);
            assert_eq!(ids(records), vec![12]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(svc.len(), 2);
    assert_eq!(store.persisted(), vec![10, 11]);

    // the released slot is usable again
    store.fail_save.store(false, Ordering::SeqCst);
    for id in 12..15 {
        svc.add(company(id), None).unwrap();
    }
    assert_eq!(svc.len(), 5);
}

#[test]
fn failed_delete_keeps_record_for_next_synchronise() {
    let (store, svc) = seeded(5, 10..12);
    store.fail_delete.store(true, Ordering::SeqCst);

    let err = svc.get(None).unwrap_err();
    match err {
        QueueError::StoreFailure {
            operation,
            record_id,
            records,
            ..
        } => {
            assert_eq!(operation, Operation::Get);
            assert_eq!(record_id.map(|id| id.value()), Some(10));
            assert_eq!(ids(&records), vec![10]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(svc.len(), 1);
    assert_eq!(store.persisted(), vec![10, 11]);

    store.fail_delete.store(false, Ordering::SeqCst);
    let report = svc.synchronise().unwrap();
    assert_eq!(report, SyncReport { restored: 2, skipped: 0 });
    assert_eq!(ids(&svc.get_group(5).unwrap()), vec![10, 11]);
}

#[test]
fn failed_bulk_delete_returns_drained_records() {
    let (store, svc) = seeded(5, 10..13);
    store.fail_delete.store(true, Ordering::SeqCst);

    match svc.get_group(2).unwrap_err() {
        QueueError::StoreFailure {
            operation, records, ..
        } => {
            assert_eq!(operation, Operation::GetGroup);
            assert_eq!(ids(&records), vec![10, 11]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.persisted(), vec![10, 11, 12]);
}

#[test]
fn failed_find_all_is_reported_as_store_failure() {
    let (store, svc) = seeded(5, 10..12);
    store.fail_find_all.store(true, Ordering::SeqCst);

    assert!(matches!(
        svc.synchronise(),
        Err(QueueError::StoreFailure {
            operation: Operation::Synchronise,
            ..
        })
    ));
}

#[test]
fn synchronise_restores_up_to_capacity_and_reports_overflow() {
    let (store, svc) = service(5);
    // Persist directly to simulate a store that outgrew the queue.
    for id in 1..=7 {
        custq::Store::save(store.as_ref(), &company(id)).unwrap();
    }

    let report = svc.synchronise().unwrap();
    assert_eq!(report, SyncReport { restored: 5, skipped: 2 });
    assert_eq!(svc.len(), 5);
    assert_eq!(store.persisted().len(), 7);

    assert_eq!(ids(&svc.get_group(5).unwrap()), vec![1, 2, 3, 4, 5]);

    // the overflow is picked up by the next synchronise
    let report = svc.synchronise().unwrap();
    assert_eq!(report, SyncReport { restored: 2, skipped: 0 });
    assert_eq!(ids(&svc.get_group(5).unwrap()), vec![6, 7]);
}

#[test]
fn purge_then_synchronise_recovers_everything_persisted() {
    let (_, svc) = seeded(5, 10..15);
    assert_eq!(svc.purge(), 5);
    assert!(svc.get(None).is_err());

    svc.synchronise().unwrap();
    assert_eq!(svc.len(), 5);
}

#[test]
fn store_assigns_identity_to_new_records() {
    let (store, svc) = service(5);
    let a = svc.add(Record::new("GavWebCo", "The final description", "123"), None).unwrap();
    let b = svc.add(Record::new("Other", "Another", "456"), None).unwrap();
    assert_ne!(a, b);
    assert_eq!(store.persisted(), vec![a.value(), b.value()]);
}

#[test]
fn duplicate_identity_is_refused_and_both_sides_stay_aligned() {
    let (store, svc) = seeded(5, 10..11);

    let err = svc.add(company(10), None).unwrap_err();
    match err {
        QueueError::StoreFailure {
            operation,
            records,
            source,
            ..
        } => {
            assert_eq!(operation, Operation::Add);
            assert_eq!(ids(&records), vec![10]);
            assert!(matches!(source, StoreError::DuplicateIdentity(id) if id.value() == 10));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(svc.len(), 1);
    assert_eq!(store.persisted(), vec![10]);

    svc.get(None).unwrap();
    assert!(svc.is_empty());
    assert!(store.persisted().is_empty());
}

#[test]
fn exhausted_identity_space_is_a_store_failure() {
    let (store, svc) = service(5);
    let err = svc.add(company(u64::MAX), None).unwrap_err();
    assert!(matches!(
        err,
        QueueError::StoreFailure {
            source: StoreError::Unavailable(_),
            ..
        }
    ));
    assert!(svc.is_empty());
    assert!(store.persisted().is_empty());
}

#[test]
fn zero_timeout_calls_do_not_wait_for_a_running_synchronise() {
    let (store, svc) = seeded(5, 10..12);
    store.stall_find_all_ms.store(400, Ordering::SeqCst);
    let svc = Arc::new(svc);

    let syncer = {
        let svc = svc.clone();
        thread::spawn(move || svc.synchronise().unwrap())
    };
    // let synchronise take the gate
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    assert!(matches!(
        svc.add(company(20), None),
        Err(QueueError::QueueFull { .. })
    ));
    assert!(matches!(svc.get(None), Err(QueueError::QueueEmpty { .. })));
    assert!(svc.get_group(5).unwrap().is_empty());
    assert!(started.elapsed() < Duration::from_millis(200));

    // a bounded wait rides out the synchronise
    let got = svc.get(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(got.id().unwrap().value(), 10);

    assert_eq!(syncer.join().unwrap(), SyncReport { restored: 2, skipped: 0 });
    assert_eq!(store.persisted(), vec![11]);
}

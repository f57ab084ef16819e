//! Handle allocation, naming and reclamation across object kinds

mod common;

use osal::{
    CallerContext, FileAccess, FileFlags, ObjectId, ObjectKind, Osal, OsalConfig, OsalError,
    OsalResult,
};
use proptest::prelude::*;
use sim_kernel::fault_injection::{Fault, FaultPlan, Primitive};
use sim_kernel::test_utils::kernel_with_faults;
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;

const NAME: &str = "item";

/// One named kind driven through its whole lifecycle
struct KindCase {
    kind: ObjectKind,
    create: fn(&Arc<Osal>) -> OsalResult<ObjectId>,
    exercise: fn(&Osal, ObjectId) -> OsalResult<()>,
    delete: fn(&Osal, ObjectId) -> OsalResult<()>,
    find: fn(&Osal, &str) -> OsalResult<ObjectId>,
}

fn named_kinds() -> Vec<KindCase> {
    vec![
        KindCase {
            kind: ObjectKind::Task,
            create: |osal| {
                osal.task_create(CallerContext::ROOT, NAME, 4096, 10, |ctx| {
                    while !ctx.should_exit() {
                        if ctx.task_delay(5).is_err() {
                            break;
                        }
                    }
                })
            },
            exercise: |osal, id| osal.task_set_priority(id, 20),
            delete: |osal, id| osal.task_delete(id),
            find: |osal, name| osal.task_get_id_by_name(name),
        },
        KindCase {
            kind: ObjectKind::Queue,
            create: |osal| osal.queue_create(CallerContext::ROOT, NAME, 4, 8),
            exercise: |osal, id| osal.queue_put(id, b"x"),
            delete: |osal, id| osal.queue_delete(id),
            find: |osal, name| osal.queue_get_id_by_name(name),
        },
        KindCase {
            kind: ObjectKind::BinSem,
            create: |osal| osal.bin_sem_create(CallerContext::ROOT, NAME, 0),
            exercise: |osal, id| osal.bin_sem_give(id),
            delete: |osal, id| osal.bin_sem_delete(id),
            find: |osal, name| osal.bin_sem_get_id_by_name(name),
        },
        KindCase {
            kind: ObjectKind::CountSem,
            create: |osal| osal.count_sem_create(CallerContext::ROOT, NAME, 0),
            exercise: |osal, id| osal.count_sem_give(id),
            delete: |osal, id| osal.count_sem_delete(id),
            find: |osal, name| osal.count_sem_get_id_by_name(name),
        },
        KindCase {
            kind: ObjectKind::Mutex,
            create: |osal| osal.mut_sem_create(CallerContext::ROOT, NAME),
            exercise: |osal, id| {
                osal.mut_sem_take(id)?;
                osal.mut_sem_give(id)
            },
            delete: |osal, id| osal.mut_sem_delete(id),
            find: |osal, name| osal.mut_sem_get_id_by_name(name),
        },
        KindCase {
            kind: ObjectKind::TimeBase,
            create: |osal| osal.timebase_create(CallerContext::ROOT, NAME, None),
            exercise: |osal, id| osal.timebase_set(id, 0, 0),
            delete: |osal, id| osal.timebase_delete(id),
            find: |osal, name| osal.timebase_get_id_by_name(name),
        },
        KindCase {
            kind: ObjectKind::Timer,
            create: |osal| osal.timer_create(CallerContext::ROOT, NAME, |_| {}),
            exercise: |osal, id| osal.timer_set(id, 50_000, 50_000),
            delete: |osal, id| osal.timer_delete(id),
            find: |osal, name| osal.timer_get_id_by_name(name),
        },
    ]
}

#[test]
fn test_every_named_kind_lifecycle() {
    for case in named_kinds() {
        let kind = case.kind;
        let osal = common::osal();
        let id = (case.create)(&osal).expect("first create should succeed");
        assert_eq!(id.kind(), Some(kind));
        assert_eq!((case.exercise)(&osal, id), Ok(()), "{kind:?}");

        let free = osal.free_slots(kind);
        let timebases_free = osal.free_slots(ObjectKind::TimeBase);
        assert_eq!((case.create)(&osal), Err(OsalError::NameTaken), "{kind:?}");
        assert_eq!(osal.free_slots(kind), free, "{kind:?}");
        assert_eq!(osal.free_slots(ObjectKind::TimeBase), timebases_free, "{kind:?}");
        assert_eq!((case.find)(&osal, NAME), Ok(id), "{kind:?}");

        (case.delete)(&osal, id).expect("delete should succeed");
        assert_eq!((case.exercise)(&osal, id), Err(OsalError::InvalidId), "{kind:?}");
        assert_eq!((case.delete)(&osal, id), Err(OsalError::InvalidId), "{kind:?}");
        assert_eq!((case.find)(&osal, NAME), Err(OsalError::NameNotFound), "{kind:?}");
        assert_eq!(osal.object_count(kind), 0, "{kind:?}");
    }
}

#[test]
fn test_closed_stream_handle_is_rejected() {
    let osal = common::osal();
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(b"payload").expect("seed file");

    let id = osal
        .file_open(CallerContext::ROOT, file.path(), FileAccess::ReadOnly, FileFlags::empty())
        .expect("open should succeed");
    let mut buf = [0u8; 16];
    assert_eq!(osal.stream_read(id, &mut buf), Ok(7));

    osal.stream_close(id).expect("close should succeed");
    assert_eq!(osal.stream_read(id, &mut buf), Err(OsalError::InvalidId));
    assert_eq!(osal.stream_write(id, b"x"), Err(OsalError::InvalidId));
    assert_eq!(osal.stream_close(id), Err(OsalError::InvalidId));
    assert_eq!(osal.object_count(ObjectKind::Stream), 0);
}

#[test]
fn test_name_taken_consumes_no_slot() {
    let osal = common::osal();
    osal.queue_create(CallerContext::ROOT, "inbox", 4, 16)
        .expect("first create should succeed");
    let free = osal.free_slots(ObjectKind::Queue);

    assert_eq!(
        osal.queue_create(CallerContext::ROOT, "inbox", 4, 16),
        Err(OsalError::NameTaken)
    );
    assert_eq!(osal.free_slots(ObjectKind::Queue), free);
}

#[test]
fn test_deleted_handles_are_rejected() {
    let osal = common::osal();
    let queue = osal
        .queue_create(CallerContext::ROOT, "q", 2, 4)
        .expect("create should succeed");
    let mutex = osal
        .mut_sem_create(CallerContext::ROOT, "m")
        .expect("create should succeed");
    osal.queue_delete(queue).expect("delete should succeed");
    osal.mut_sem_delete(mutex).expect("delete should succeed");

    assert_eq!(osal.queue_put(queue, b"x"), Err(OsalError::InvalidId));
    assert_eq!(osal.queue_delete(queue), Err(OsalError::InvalidId));
    assert_eq!(osal.mut_sem_take(mutex), Err(OsalError::InvalidId));
    assert_eq!(osal.queue_get_id_by_name("q"), Err(OsalError::NameNotFound));

    // The slot comes back under a new handle; the old one stays dead
    let again = osal
        .queue_create(CallerContext::ROOT, "q", 2, 4)
        .expect("create should succeed");
    assert_ne!(again, queue);
    assert_eq!(osal.queue_get_info(queue), Err(OsalError::InvalidId));
}

#[test]
fn test_handles_of_another_kind_are_rejected() {
    let osal = common::osal();
    let sem = osal
        .count_sem_create(CallerContext::ROOT, "slots", 1)
        .expect("create should succeed");
    assert_eq!(osal.queue_put(sem, b"x"), Err(OsalError::InvalidId));
    assert_eq!(osal.bin_sem_give(sem), Err(OsalError::InvalidId));
    assert_eq!(osal.count_sem_give(ObjectId::UNDEFINED), Err(OsalError::InvalidId));
}

#[test]
fn test_table_exhaustion_is_reported() {
    let kernel = std::sync::Arc::new(sim_kernel::SimulatedKernel::new());
    let config = OsalConfig {
        max_mutexes: 2,
        ..OsalConfig::default()
    };
    let osal = osal::Osal::builder(kernel)
        .with_config(config)
        .build()
        .expect("config is valid");

    osal.mut_sem_create(CallerContext::ROOT, "a").expect("room for a");
    osal.mut_sem_create(CallerContext::ROOT, "b").expect("room for b");
    assert_eq!(
        osal.mut_sem_create(CallerContext::ROOT, "c"),
        Err(OsalError::NoFreeIds)
    );
    assert_eq!(osal.free_slots(ObjectKind::Mutex), 0);
}

#[test]
fn test_constructor_failure_releases_the_slot() {
    let kernel = kernel_with_faults(
        FaultPlan::new().with_fault(Fault::FailCreate { primitive: Primitive::Queue, nth: 1 }),
    );
    let (osal, _) = common::osal_on(kernel);
    let free = osal.free_slots(ObjectKind::Queue);

    let err = osal
        .queue_create(CallerContext::ROOT, "flaky", 4, 8)
        .expect_err("injected failure");
    assert_eq!(err.code(), OsalError::ERROR);
    assert_eq!(osal.free_slots(ObjectKind::Queue), free);
    assert_eq!(osal.queue_get_id_by_name("flaky"), Err(OsalError::NameNotFound));

    osal.queue_create(CallerContext::ROOT, "flaky", 4, 8)
        .expect("retry succeeds");
}

#[test]
fn test_long_names_are_rejected() {
    let osal = common::osal();
    let limit = osal.config().max_api_name;
    let long = "n".repeat(limit);
    assert!(matches!(
        osal.bin_sem_create(CallerContext::ROOT, &long, 0),
        Err(OsalError::NameTooLong { .. })
    ));
    let fits = "n".repeat(limit - 1);
    osal.bin_sem_create(CallerContext::ROOT, &fits, 0)
        .expect("name within limit");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_created_objects_are_found_by_name(
        names in prop::collection::btree_set("[a-z]{1,12}", 1..16)
    ) {
        let osal = common::osal();
        let names: BTreeSet<String> = names;
        let mut ids = Vec::new();
        for name in &names {
            let id = osal.count_sem_create(CallerContext::ROOT, name, 0).unwrap();
            ids.push((name.clone(), id));
        }

        let unique: BTreeSet<ObjectId> = ids.iter().map(|(_, id)| *id).collect();
        prop_assert_eq!(unique.len(), ids.len());
        for (name, id) in &ids {
            prop_assert_eq!(osal.count_sem_get_id_by_name(name), Ok(*id));
            prop_assert_eq!(osal.object_name(*id), Ok(Some(name.clone())));
        }

        for (name, id) in &ids {
            osal.count_sem_delete(*id).unwrap();
            prop_assert_eq!(osal.count_sem_get_id_by_name(name), Err(OsalError::NameNotFound));
        }
        prop_assert_eq!(osal.object_count(ObjectKind::CountSem), 0);
    }
}

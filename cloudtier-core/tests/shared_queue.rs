use std::sync::Arc;
use std::thread;

use cloudtier_core::error::TieringError;
use cloudtier_core::queue::{PathEntry, Queue, QueueBacking, QueueOptions};

fn entry(path: &str) -> PathEntry {
    PathEntry::try_from(path).expect("valid absolute path")
}

#[test]
fn capacity_two_rejects_third_and_pops_in_order() {
    let queue =
        Queue::create(QueueOptions::process_local(2, 8)).expect("create queue");

    queue.try_push(&entry("/a")).expect("first push");
    queue.try_push(&entry("/bb")).expect("second push");
    let err = queue
        .try_push(&entry("/ccc"))
        .expect_err("third push must be rejected");
    assert!(matches!(err, TieringError::QueueFull { capacity: 2 }));

    assert_eq!(queue.try_pop().expect("pop"), Some(entry("/a")));
    assert_eq!(queue.try_pop().expect("pop"), Some(entry("/bb")));
    assert_eq!(queue.try_pop().expect("pop"), None);
}

#[test]
fn named_queue_survives_reattach_but_local_does_not() {
    let dir = tempfile::tempdir().expect("tempdir");
    let durable = QueueOptions::shared(8, 64, dir.path(), "durable");

    let shared = Queue::create(durable.clone()).expect("create shared queue");
    shared.push(&entry("/x/1")).expect("push");
    shared.push(&entry("/x/2")).expect("push");
    assert!(dir.path().join("durable").exists());
    shared.destroy();

    let local = Queue::create(QueueOptions::process_local(8, 64))
        .expect("create local queue");
    local.push(&entry("/y/1")).expect("push");
    local.destroy();

    let reattached = Queue::create(durable).expect("reattach shared queue");
    assert_eq!(reattached.len().expect("len"), 2);
    assert_eq!(reattached.try_pop().expect("pop"), Some(entry("/x/1")));
    assert_eq!(reattached.try_pop().expect("pop"), Some(entry("/x/2")));
    assert_eq!(reattached.try_pop().expect("pop"), None);

    let fresh_local = Queue::create(QueueOptions::process_local(8, 64))
        .expect("create local");
    assert!(fresh_local.is_empty().expect("len"));
}

#[test]
fn ring_wraps_across_reattach() {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = QueueOptions::shared(3, 32, dir.path(), "wrap");

    let queue = Queue::create(options.clone()).expect("create");
    for round in 0..5 {
        queue.push(&entry(&format!("/round/{round}"))).expect("push");
        assert_eq!(
            queue.try_pop().expect("pop"),
            Some(entry(&format!("/round/{round}")))
        );
    }
    queue.push(&entry("/left/a")).expect("push");
    queue.push(&entry("/left/b")).expect("push");
    queue.destroy();

    let queue = Queue::create(options).expect("reattach");
    assert_eq!(queue.try_pop().expect("pop"), Some(entry("/left/a")));
    assert_eq!(queue.try_pop().expect("pop"), Some(entry("/left/b")));
}

#[test]
fn mismatched_layout_is_a_name_conflict() {
    let dir = tempfile::tempdir().expect("tempdir");
    Queue::create(QueueOptions::shared(8, 64, dir.path(), "layout"))
        .expect("create")
        .destroy();

    let err = Queue::create(QueueOptions::shared(16, 64, dir.path(), "layout"))
        .expect_err("capacity mismatch");
    assert!(matches!(err, TieringError::NameConflict { .. }));

    let err = Queue::create(QueueOptions::shared(8, 128, dir.path(), "layout"))
        .expect_err("element capacity mismatch");
    assert!(matches!(err, TieringError::NameConflict { .. }));
}

#[test]
fn independent_handles_share_one_segment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let per_writer = 200;
    let writers = 4;

    let handles: Vec<Arc<Queue>> = (0..writers)
        .map(|_| {
            Arc::new(
                Queue::create(QueueOptions::shared(
                    writers * per_writer,
                    64,
                    dir.path(),
                    "contended",
                ))
                .expect("attach"),
            )
        })
        .collect();

    let threads: Vec<_> = handles
        .iter()
        .enumerate()
        .map(|(writer, queue)| {
            let queue = Arc::clone(queue);
            thread::spawn(move || {
                for i in 0..per_writer {
                    queue
                        .push(&entry(&format!("/w{writer}/{i}")))
                        .expect("push");
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().expect("writer thread");
    }

    let reader = &handles[0];
    assert_eq!(reader.len().expect("len"), writers * per_writer);

    let mut next_per_writer = vec![0usize; writers];
    while let Some(popped) = reader.try_pop().expect("pop") {
        let text = popped.to_string();
        let (writer, index) = text[2..].split_once('/').expect("entry shape");
        let writer: usize = writer.parse().expect("writer id");
        let index: usize = index.parse().expect("index");
        assert_eq!(
            index, next_per_writer[writer],
            "per-writer order preserved"
        );
        next_per_writer[writer] += 1;
    }
    assert!(next_per_writer.iter().all(|count| *count == per_writer));
}

#[test]
fn unlink_removes_the_segment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = QueueOptions::shared(4, 64, dir.path(), "gone");
    let queue = Queue::create(options.clone()).expect("create");
    assert_eq!(
        queue.backing(),
        &QueueBacking::Shared {
            dir: dir.path().to_path_buf(),
            name: "gone".into()
        }
    );
    queue.push(&entry("/a")).expect("push");
    queue.destroy();

    assert!(Queue::unlink(dir.path(), "gone").expect("unlink"));
    let fresh = Queue::create(options).expect("recreate");
    assert!(fresh.is_empty().expect("len"));
}

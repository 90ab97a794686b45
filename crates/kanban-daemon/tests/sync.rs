use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kanban_core::codec::{decode_event_str, encode};
use kanban_core::reducer::apply;
use kanban_core::seed::default_seed;
use kanban_core::types::{Board, BoardEvent, DEFAULT_COLUMNS, HealthStatus, Item, ServerMessage};
use kanban_daemon::config::ReaderOptions;
use kanban_daemon::hub::{FanoutHub, Frame};
use kanban_daemon::log::{EventLog, MemoryLog};
use kanban_daemon::projection::{ProjectionStore, SharedProjection};
use kanban_daemon::reader::LogReader;
use kanban_daemon::session::{Session, SessionCoordinator};
use kanban_daemon::writer::LogWriter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Pipeline {
    log: Arc<MemoryLog>,
    store: SharedProjection,
    coordinator: Arc<SessionCoordinator>,
    cancel: CancellationToken,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn start_pipeline(queue_capacity: usize) -> Pipeline {
    let log = Arc::new(MemoryLog::new("ordersmanagement"));
    let store = Arc::new(ProjectionStore::seeded(DEFAULT_COLUMNS, Some(&default_seed())));
    let hub = Arc::new(FanoutHub::new(queue_capacity));
    let cancel = CancellationToken::new();

    let mut reader = LogReader::new(
        log.clone(),
        Arc::clone(&store),
        Arc::clone(&hub),
        ReaderOptions {
            poll_interval: Duration::from_millis(2),
            batch_size: 16,
            ..ReaderOptions::default()
        },
        cancel.clone(),
    );
    tokio::spawn(async move { reader.run().await });

    let coordinator = Arc::new(SessionCoordinator::new(
        Arc::clone(&store),
        hub,
        LogWriter::new(log.clone()),
    ));
    Pipeline {
        log,
        store,
        coordinator,
        cancel,
    }
}

async fn join(coordinator: &SessionCoordinator, user: &str) -> (Session, mpsc::Receiver<Frame>, Board) {
    let mut session = coordinator.connect(user);
    let mut rx = coordinator.join(&mut session).await.unwrap();
    let first = rx.recv().await.expect("sync_state frame");
    let ServerMessage::SyncState { data } = serde_json::from_str(&first).unwrap() else {
        panic!("first frame was not sync_state: {first}");
    };
    (session, rx, data)
}

async fn next_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout waiting for frame")
        .expect("queue closed")
}

async fn wait_for_applied(store: &ProjectionStore, n: u64) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while store.applied().await < n {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("reader did not catch up");
}

fn move_json(card: &str, to: &str, index: usize) -> String {
    format!(
        r#"{{"type":"move_card","card_id":"{card}","from_col":"order","to_col":"{to}","new_index":{index}}}"#
    )
}

#[tokio::test]
async fn end_to_end_order_flow() {
    let p = start_pipeline(64);
    let (alice, mut alice_rx, initial) = join(&p.coordinator, "alice").await;
    assert_eq!(initial, default_seed());

    let commands = [
        r#"{"type":"new_card","card_id":"c2","content":"Pizza","to_col":"order"}"#.to_string(),
        move_json("c2", "invoice", 0),
        r#"{"type":"delete_card","card_id":"init-1"}"#.to_string(),
        r#"{"type":"delete_card","card_id":"init-2"}"#.to_string(),
    ];
    let mut replica = initial;
    for raw in &commands {
        p.coordinator.submit(&alice, raw).await.unwrap();
        let frame = next_frame(&mut alice_rx).await;
        apply(&mut replica, &decode_event_str(&frame).unwrap());
    }

    let board = p.store.snapshot().await;
    assert!(board.items("order").is_empty());
    assert_eq!(board.items("invoice"), &[Item::new("c2", "Pizza")]);
    assert!(board.items("analytics").is_empty());
    assert_eq!(replica, board);
    assert_eq!(p.log.len(), commands.len());
}

#[tokio::test]
async fn echo_reaches_every_session_in_log_order() {
    let p = start_pipeline(64);
    let (alice, mut alice_rx, _) = join(&p.coordinator, "alice").await;
    let (_bob, mut bob_rx, _) = join(&p.coordinator, "bob").await;

    for i in 0..5 {
        let raw = format!(r#"{{"type":"new_card","card_id":"c{i}","content":"Order {i}"}}"#);
        p.coordinator.submit(&alice, &raw).await.unwrap();
    }

    for rx in [&mut alice_rx, &mut bob_rx] {
        for i in 0..5 {
            let frame = next_frame(rx).await;
            let event = decode_event_str(&frame).unwrap();
            assert_eq!(event.card_id(), Some(format!("c{i}").as_str()));
        }
    }
}

#[tokio::test]
async fn rejected_command_changes_nothing() {
    let p = start_pipeline(64);
    let (alice, mut alice_rx, _) = join(&p.coordinator, "alice").await;

    assert!(p.coordinator.submit(&alice, r#"{"type":"new_card"}"#).await.is_err());
    assert!(p.log.is_empty());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(alice_rx.try_recv().is_err());
    assert_eq!(p.store.snapshot().await, default_seed());
}

#[tokio::test]
async fn concurrent_joins_see_consistent_prefix() {
    const MOVES: usize = 300;
    let p = start_pipeline(MOVES + 8);

    let appender = {
        let log = p.log.clone();
        tokio::spawn(async move {
            for i in 0..MOVES {
                let to = DEFAULT_COLUMNS[i % DEFAULT_COLUMNS.len()];
                let card = if i % 2 == 0 { "init-1" } else { "init-2" };
                log.append(move_json(card, to, i % 3).as_bytes()).unwrap();
                if i % 7 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let mut joiners = Vec::new();
    for n in 0..8u64 {
        let coordinator = Arc::clone(&p.coordinator);
        joiners.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(n * 3)).await;
            join(&coordinator, &format!("viewer-{n}")).await
        }));
    }

    let mut sessions = Vec::new();
    for j in joiners {
        let (session, rx, snapshot) = j.await.unwrap();
        for card in ["init-1", "init-2"] {
            let hits = snapshot
                .columns()
                .iter()
                .flat_map(|c| c.items.iter())
                .filter(|item| item.id == card)
                .count();
            assert_eq!(hits, 1, "{card} torn in snapshot: {snapshot:?}");
        }
        sessions.push((session, rx, snapshot));
    }

    appender.await.unwrap();
    wait_for_applied(&p.store, MOVES as u64).await;
    let final_board = p.store.snapshot().await;

    for (session, mut rx, mut replica) in sessions {
        while let Ok(frame) = rx.try_recv() {
            apply(&mut replica, &decode_event_str(&frame).unwrap());
        }
        assert_eq!(replica, final_board, "{} diverged", session.user_id());
    }
}

#[tokio::test]
async fn slow_session_is_dropped_and_can_rejoin() {
    let p = start_pipeline(2);
    let (_slow, mut slow_rx, _) = join(&p.coordinator, "slow").await;

    for i in 0..4 {
        p.log
            .append(format!(r#"{{"type":"delete_card","card_id":"gone-{i}"}}"#).as_bytes())
            .unwrap();
    }
    wait_for_applied(&p.store, 4).await;

    let mut received = 0;
    while let Some(_frame) = slow_rx.recv().await {
        received += 1;
    }
    assert_eq!(received, 2);

    let (_again, _rx, snapshot) = join(&p.coordinator, "slow").await;
    assert_eq!(snapshot, p.store.snapshot().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_state_precedes_concurrent_health_frames() {
    let p = start_pipeline(64);
    let stop = Arc::new(AtomicBool::new(false));
    let health: Frame = Arc::from(encode(&BoardEvent::health(HealthStatus::Healthy)).unwrap());

    let broadcasters: Vec<_> = (0..2)
        .map(|_| {
            let hub = Arc::clone(p.coordinator.hub());
            let stop = Arc::clone(&stop);
            let health = Arc::clone(&health);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    hub.broadcast(Arc::clone(&health));
                }
            })
        })
        .collect();

    let mut out_of_order = 0;
    for n in 0..2_000 {
        let mut session = p.coordinator.connect(format!("viewer-{n}"));
        let mut rx = p.coordinator.join(&mut session).await.unwrap();
        let first = next_frame(&mut rx).await;
        let value: serde_json::Value = serde_json::from_str(&first).unwrap();
        if value["type"] != "sync_state" {
            out_of_order += 1;
        }
        p.coordinator.leave(&mut session);
    }

    stop.store(true, Ordering::Relaxed);
    for b in broadcasters {
        b.join().unwrap();
    }
    assert_eq!(out_of_order, 0, "a join saw another frame before sync_state");
}

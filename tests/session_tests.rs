// Engine-level tests driven by a scripted mock transfer channel.
// No real network I/O: each test declares the event stream every transfer
// will produce and asserts on the engine's state and emitted events.

use parking_lot::Mutex;
use speedprobe::{
    Config, Error, SpeedTest, Stage, TestEvent, TestState, TransferChannel, TransferEvent,
    TransferHandle,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Scripted behavior of one transfer.
#[derive(Clone)]
enum Script {
    /// Deliver these events, then keep the sender open.
    Events(Vec<TransferEvent>),
    /// Deliver nothing; the transfer stays pending until cancelled.
    Hang,
}

struct MockChannel {
    downloads: Mutex<VecDeque<Script>>,
    uploads: Mutex<VecDeque<Script>>,
    attempted_urls: Mutex<Vec<String>>,
    // Senders are kept alive so pending transfers never close their event
    // stream, and so tests can deliver a late event after cancellation.
    open_senders: Mutex<Vec<UnboundedSender<TransferEvent>>>,
}

impl MockChannel {
    fn new(downloads: Vec<Script>, upload: Script) -> Arc<Self> {
        Self::new_sequence(downloads, vec![upload])
    }

    /// Like `new`, but scripts several runs' worth of uploads.
    fn new_sequence(downloads: Vec<Script>, uploads: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            downloads: Mutex::new(downloads.into()),
            uploads: Mutex::new(uploads.into()),
            attempted_urls: Mutex::new(Vec::new()),
            open_senders: Mutex::new(Vec::new()),
        })
    }

    fn play(&self, script: Script) -> TransferHandle {
        let (handle, tx, _cancel) = TransferHandle::new();
        if let Script::Events(events) = script {
            for event in events {
                let _ = tx.send(event);
            }
        }
        self.open_senders.lock().push(tx);
        handle
    }

    fn attempted_urls(&self) -> Vec<String> {
        self.attempted_urls.lock().clone()
    }

    fn send_late_event(&self, event: TransferEvent) {
        for sender in self.open_senders.lock().iter() {
            let _ = sender.send(event.clone());
        }
    }
}

impl TransferChannel for MockChannel {
    fn open_download(&self, url: &str, _timeout: Duration) -> TransferHandle {
        self.attempted_urls.lock().push(url.to_string());
        let script = self.downloads.lock().pop_front().unwrap_or(Script::Hang);
        self.play(script)
    }

    fn open_upload(&self, _url: &str, _payload_bytes: u64) -> TransferHandle {
        let script = self.uploads.lock().pop_front().unwrap_or(Script::Hang);
        self.play(script)
    }
}

#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<TestEvent>>>);

impl EventLog {
    fn push(&self, event: TestEvent) {
        self.0.lock().push(event);
    }

    fn snapshot(&self) -> Vec<TestEvent> {
        self.0.lock().clone()
    }
}

fn test_config(urls: usize) -> Config {
    Config::new()
        .with_download_urls((0..urls).map(|i| format!("http://server-{i}")).collect())
        .with_upload_url("http://upload".to_string())
        .with_stage_pause(Duration::ZERO)
        // keep the elapsed-time poller quiet beyond its immediate first tick
        .with_upload_poll_interval(Duration::from_secs(3600))
}

fn engine(config: Config, channel: Arc<MockChannel>, log: &EventLog) -> Arc<SpeedTest> {
    let log = log.clone();
    Arc::new(
        SpeedTest::new(config, channel)
            .expect("valid config")
            .with_callback(move |event: TestEvent| log.push(event)),
    )
}

fn good_download() -> Script {
    Script::Events(vec![
        TransferEvent::Progress {
            loaded: 2_000_000,
            total: Some(10_000_000),
        },
        TransferEvent::Progress {
            loaded: 6_000_000,
            total: Some(10_000_000),
        },
        TransferEvent::Completed {
            status: 200,
            bytes: 10_000_000,
        },
    ])
}

fn good_upload() -> Script {
    Script::Events(vec![TransferEvent::Completed {
        status: 200,
        bytes: 5 * 1024 * 1024,
    }])
}

#[tokio::test]
async fn full_run_emits_one_result_per_stage_then_complete() {
    let channel = MockChannel::new(vec![good_download()], good_upload());
    let log = EventLog::default();
    let test = engine(test_config(1), channel, &log);

    let report = test.run().await.expect("run should succeed");
    assert!(report.download_mbps > 0.0);
    assert!(report.upload_mbps > 0.0);
    assert_eq!(test.state(), TestState::Complete);

    let events = log.snapshot();
    let download_results = events
        .iter()
        .filter(|e| matches!(e, TestEvent::StageResult { stage: Stage::Download, .. }))
        .count();
    let upload_results = events
        .iter()
        .filter(|e| matches!(e, TestEvent::StageResult { stage: Stage::Upload, .. }))
        .count();
    let completes = events
        .iter()
        .filter(|e| matches!(e, TestEvent::Complete { .. }))
        .count();
    assert_eq!(download_results, 1);
    assert_eq!(upload_results, 1);
    assert_eq!(completes, 1);
    assert!(matches!(events.last(), Some(TestEvent::Complete { .. })));

    let download_pos = events
        .iter()
        .position(|e| matches!(e, TestEvent::StageResult { stage: Stage::Download, .. }))
        .unwrap();
    let upload_pos = events
        .iter()
        .position(|e| matches!(e, TestEvent::StageResult { stage: Stage::Upload, .. }))
        .unwrap();
    assert!(download_pos < upload_pos);
}

#[tokio::test]
async fn download_progress_carries_percent_and_totals() {
    let channel = MockChannel::new(vec![good_download()], good_upload());
    let log = EventLog::default();
    let test = engine(test_config(1), channel, &log);

    test.run().await.expect("run should succeed");

    let events = log.snapshot();
    let first_progress = events
        .iter()
        .find_map(|e| match e {
            TestEvent::Progress {
                percent,
                loaded_bytes,
                total_bytes,
                ..
            } => Some((*percent, *loaded_bytes, *total_bytes)),
            _ => None,
        })
        .expect("a progress event");
    assert_eq!(first_progress.1, Some(2_000_000));
    assert_eq!(first_progress.2, Some(10_000_000));
    let percent = first_progress.0.expect("percent is computable");
    assert!((percent - 20.0).abs() < 1e-9);
}

#[tokio::test]
async fn download_falls_back_through_all_endpoints_in_order() {
    let channel = MockChannel::new(
        vec![
            Script::Events(vec![TransferEvent::Failed {
                status: Some(0),
                message: "connection refused".to_string(),
            }]),
            Script::Events(vec![TransferEvent::Failed {
                status: Some(0),
                message: "connection refused".to_string(),
            }]),
            Script::Events(vec![TransferEvent::Completed {
                status: 404,
                bytes: 0,
            }]),
            good_download(),
        ],
        good_upload(),
    );
    let log = EventLog::default();
    let test = engine(test_config(4), channel.clone(), &log);

    test.run().await.expect("fourth endpoint succeeds");

    assert_eq!(
        channel.attempted_urls(),
        vec![
            "http://server-0".to_string(),
            "http://server-1".to_string(),
            "http://server-2".to_string(),
            "http://server-3".to_string(),
        ]
    );
    // success stops iteration; with four endpoints there is nothing left,
    // but the attempt count must still be exactly four
    assert_eq!(channel.attempted_urls().len(), 4);
}

#[tokio::test]
async fn exhaustion_after_network_failures_reports_cors_hint() {
    let failed = Script::Events(vec![TransferEvent::Failed {
        status: Some(0),
        message: "blocked".to_string(),
    }]);
    let channel = MockChannel::new(vec![failed.clone(), failed], good_upload());
    let log = EventLog::default();
    let test = engine(test_config(2), channel, &log);

    let err = test.run().await.expect_err("all endpoints fail");
    assert!(matches!(err, Error::EndpointsExhausted { cors_likely: true }));
    assert_eq!(test.state(), TestState::Error);

    let events = log.snapshot();
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TestEvent::Error { message } => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("CORS"));
    assert!(matches!(events.last(), Some(TestEvent::Error { .. })));
}

#[tokio::test]
async fn exhaustion_after_timeout_has_no_cors_hint() {
    let channel = MockChannel::new(
        vec![Script::Events(vec![TransferEvent::TimedOut])],
        good_upload(),
    );
    let log = EventLog::default();
    let test = engine(test_config(1), channel, &log);

    let err = test.run().await.expect_err("endpoint times out");
    assert!(matches!(
        err,
        Error::EndpointsExhausted { cors_likely: false }
    ));
}

#[tokio::test]
async fn second_start_while_running_is_rejected() {
    let channel = MockChannel::new(vec![Script::Hang], good_upload());
    let log = EventLog::default();
    let test = engine(test_config(1), channel, &log);

    let running = test.clone();
    let run_task = tokio::spawn(async move { running.run().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(test.state(), TestState::Running(Stage::Download));

    let err = test.run().await.expect_err("engine is busy");
    assert!(matches!(err, Error::TestInProgress));
    // the first run is untouched
    assert_eq!(test.state(), TestState::Running(Stage::Download));

    test.reset();
    let first = run_task.await.expect("task joins");
    assert!(matches!(first, Err(Error::Cancelled)));
}

#[tokio::test]
async fn abort_during_download_returns_to_idle_and_ignores_late_events() {
    let channel = MockChannel::new(vec![Script::Hang], good_upload());
    let log = EventLog::default();
    let test = engine(test_config(1), channel.clone(), &log);

    let running = test.clone();
    let run_task = tokio::spawn(async move { running.run().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    test.reset();
    assert_eq!(test.state(), TestState::Idle);
    assert!(matches!(
        run_task.await.expect("task joins"),
        Err(Error::Cancelled)
    ));

    let events = log.snapshot();
    assert!(matches!(events.last(), Some(TestEvent::Ready)));

    // a straggling channel event must not reach the observer
    channel.send_late_event(TransferEvent::Progress {
        loaded: 1_000_000,
        total: Some(10_000_000),
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(log.snapshot().len(), events.len());
    assert!(matches!(log.snapshot().last(), Some(TestEvent::Ready)));
}

#[tokio::test]
async fn resetting_an_idle_engine_is_a_no_op() {
    let channel = MockChannel::new(vec![good_download()], good_upload());
    let log = EventLog::default();
    let test = engine(test_config(1), channel, &log);

    test.reset();
    assert_eq!(test.state(), TestState::Idle);
    assert!(log.snapshot().is_empty());
}

#[tokio::test]
async fn reset_during_stage_pause_leaves_engine_reusable() {
    let channel = MockChannel::new_sequence(
        vec![good_download(), good_download()],
        vec![good_upload(), good_upload()],
    );
    let log = EventLog::default();
    let config = test_config(1).with_stage_pause(Duration::from_millis(200));
    let test = engine(config, channel, &log);

    let running = test.clone();
    let run_task = tokio::spawn(async move { running.run().await });
    // the download script completes immediately; land inside the pause
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(test.state(), TestState::Running(Stage::Download));

    test.reset();
    assert!(matches!(
        run_task.await.expect("task joins"),
        Err(Error::Cancelled)
    ));
    // the aborted run must not resurrect a running state
    assert_eq!(test.state(), TestState::Idle);
    assert!(matches!(log.snapshot().last(), Some(TestEvent::Ready)));

    // the engine accepts a fresh run after the abort
    let report = test.run().await.expect("second run succeeds");
    assert!(report.download_mbps > 0.0);
    assert_eq!(test.state(), TestState::Complete);
}

#[tokio::test]
async fn upload_byte_progress_from_a_richer_channel_is_ignored() {
    let payload = 5 * 1024 * 1024u64;
    let channel = MockChannel::new(
        vec![good_download()],
        Script::Events(vec![
            TransferEvent::Progress {
                loaded: 1_000_000,
                total: Some(payload),
            },
            TransferEvent::Progress {
                loaded: 4_000_000,
                total: Some(payload),
            },
            TransferEvent::Completed {
                status: 200,
                bytes: payload,
            },
        ]),
    );
    let log = EventLog::default();
    let test = engine(test_config(1), channel, &log);

    test.run().await.expect("run should succeed");

    let events = log.snapshot();
    let upload_start = events
        .iter()
        .position(|e| matches!(e, TestEvent::StageStarted { stage: Stage::Upload, .. }))
        .expect("upload stage starts");

    // from the upload stage on, the smoothed estimate stays quiet and
    // progress carries elapsed time only, whatever the channel sends
    for event in &events[upload_start..] {
        match event {
            TestEvent::SpeedUpdate { .. } => {
                panic!("smoothed speed updates are download-only")
            }
            TestEvent::Progress {
                percent,
                loaded_bytes,
                ..
            } => {
                assert_eq!(*percent, None);
                assert_eq!(*loaded_bytes, None);
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn upload_failure_is_terminal() {
    let channel = MockChannel::new(
        vec![good_download()],
        Script::Events(vec![TransferEvent::Failed {
            status: None,
            message: "connection reset".to_string(),
        }]),
    );
    let log = EventLog::default();
    let test = engine(test_config(1), channel, &log);

    let err = test.run().await.expect_err("upload fails");
    assert!(matches!(err, Error::Upload(_)));
    assert_eq!(test.state(), TestState::Error);

    let events = log.snapshot();
    let upload_results = events
        .iter()
        .filter(|e| matches!(e, TestEvent::StageResult { stage: Stage::Upload, .. }))
        .count();
    assert_eq!(upload_results, 0);
    let errors = events
        .iter()
        .filter(|e| matches!(e, TestEvent::Error { .. }))
        .count();
    assert_eq!(errors, 1);
    assert!(matches!(events.last(), Some(TestEvent::Error { .. })));
}

#[tokio::test]
async fn upload_non_success_status_is_an_upload_error() {
    let channel = MockChannel::new(
        vec![good_download()],
        Script::Events(vec![TransferEvent::Completed {
            status: 500,
            bytes: 0,
        }]),
    );
    let log = EventLog::default();
    let test = engine(test_config(1), channel, &log);

    let err = test.run().await.expect_err("upload endpoint errored");
    match err {
        Error::Upload(message) => assert!(message.contains("500")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn download_size_is_discovered_from_final_byte_count() {
    // No Content-Length: progress events carry no total, the size comes
    // from the completion event.
    let channel = MockChannel::new(
        vec![Script::Events(vec![
            TransferEvent::Progress {
                loaded: 4_000_000,
                total: None,
            },
            TransferEvent::Completed {
                status: 200,
                bytes: 9_000_000,
            },
        ])],
        good_upload(),
    );
    let log = EventLog::default();
    let test = engine(test_config(1), channel, &log);

    test.run().await.expect("run should succeed");

    let events = log.snapshot();
    let progress_totals: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TestEvent::Progress {
                total_bytes,
                percent,
                loaded_bytes: Some(_),
                ..
            } => Some((*total_bytes, *percent)),
            _ => None,
        })
        .collect();
    // without a known total there is no percent to report
    assert_eq!(progress_totals, vec![(None, None)]);
}

#[tokio::test]
async fn fallback_announces_the_next_server() {
    let channel = MockChannel::new(
        vec![
            Script::Events(vec![TransferEvent::TimedOut]),
            good_download(),
        ],
        good_upload(),
    );
    let log = EventLog::default();
    let test = engine(test_config(2), channel, &log);

    test.run().await.expect("second endpoint succeeds");

    let status_texts: Vec<_> = log
        .snapshot()
        .iter()
        .filter_map(|e| match e {
            TestEvent::StageStarted { status_text, .. } => Some(status_text.clone()),
            _ => None,
        })
        .collect();
    assert!(status_texts.contains(&"Trying server 2...".to_string()));
}

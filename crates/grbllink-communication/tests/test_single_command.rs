mod common;

use common::{drain, status_model, ScriptedTransport};
use grbllink_communication::{
    BatchCommandStreamer, BatchTiming, ExecutorTiming, MachineState, SettingsReader,
    SimulatedDevice, SingleCommandExecutor, Transport,
};
use grbllink_core::{AppEvent, CommunicationEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn fast() -> ExecutorTiming {
    ExecutorTiming {
        poll_interval: Duration::from_millis(10),
        max_polls: 5,
    }
}

fn executor(transport: Arc<dyn Transport>) -> SingleCommandExecutor {
    let (bus, status) = status_model();
    SingleCommandExecutor::new(transport, status, bus, fast())
}

#[tokio::test]
async fn test_response_text_excludes_ok() {
    let device = Arc::new(SimulatedDevice::new());
    let response = executor(device.clone()).execute_report("$I").await;

    assert!(response.acknowledged);
    assert_eq!(response.text, "[VER:1.1h.20190825:]\n[OPT:V,15,128]\n");
    assert_eq!(device.sent_lines(), vec!["$I"]);
}

#[tokio::test]
async fn test_silent_device_times_out_without_error() {
    let device = Arc::new(SimulatedDevice::new());
    device.set_responding(false);
    let (bus, status) = status_model();
    let mut rx = bus.receiver();
    let executor = SingleCommandExecutor::new(device.clone(), status, bus.clone(), fast());

    let started = Instant::now();
    let response = executor.execute_report("G0 X1").await;

    assert!(!response.acknowledged);
    assert!(response.text.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert!(started.elapsed() < Duration::from_secs(2));

    let events = drain(&mut rx);
    assert!(events.contains(&AppEvent::Communication(
        CommunicationEvent::AckTimeout {
            command: "G0 X1".to_string()
        }
    )));
}

#[tokio::test]
async fn test_partial_text_is_returned_on_timeout() {
    let transport = Arc::new(ScriptedTransport::with_reply(|_| "partial\n".to_string()));
    let response = executor(transport).execute_report("$G").await;

    assert!(!response.acknowledged);
    assert_eq!(response.text, "partial\n");
}

#[tokio::test]
async fn test_error_reply_does_not_acknowledge() {
    let transport = Arc::new(ScriptedTransport::with_reply(|_| "error:20\n".to_string()));
    let response = executor(transport).execute_report("G5").await;

    assert!(!response.acknowledged);
    assert_eq!(response.text, "error:20\n");
}

#[tokio::test]
async fn test_ok_is_case_insensitive_and_trimmed() {
    let transport = Arc::new(ScriptedTransport::with_reply(|_| "[MSG:x]\r\n OK \r\n".to_string()));
    let response = executor(transport).execute_report("$X").await;

    assert!(response.acknowledged);
    assert_eq!(response.text, "[MSG:x]\n");
}

#[tokio::test]
async fn test_disconnected_transport_gives_empty_response() {
    let device = Arc::new(SimulatedDevice::new());
    device.set_connected(false);
    let started = Instant::now();
    let response = executor(device).execute_report("G0 X1").await;

    assert!(!response.acknowledged);
    assert!(response.text.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_multiline_command_is_rejected() {
    let device = Arc::new(SimulatedDevice::new());
    let response = executor(device.clone()).execute_report("G0 X1\nG0 X2").await;

    assert!(!response.acknowledged);
    assert!(device.sent_lines().is_empty());
}

#[tokio::test]
async fn test_spawned_command_releases_the_slot() {
    let device = Arc::new(SimulatedDevice::new());
    let executor = executor(device.clone());

    let first = executor.spawn("G21").await.unwrap();
    let second = executor.spawn("G90").await.unwrap();
    assert!(first.acknowledged && second.acknowledged);
    assert_eq!(device.sent_lines(), vec!["G21", "G90"]);
}

#[tokio::test]
async fn test_settings_read_and_write_back() {
    let device = Arc::new(SimulatedDevice::new());
    let (bus, status) = status_model();
    let executor =
        SingleCommandExecutor::new(device.clone(), status.clone(), bus.clone(), fast());
    let reader = SettingsReader::new(executor);

    let info = reader.read_info().await;
    assert_eq!(info.version.as_deref(), Some("1.1h.20190825"));
    assert_eq!(info.options.as_deref(), Some("V,15,128"));

    let table = reader.read_settings().await;
    assert_eq!(table.len(), 34);
    assert_eq!(table.get("$110"), Some("500.000"));

    let mut edited = table.clone();
    edited.set("$110", "600.000");
    edited.set("$32", "1");

    let streamer = BatchCommandStreamer::new(
        device.clone(),
        status,
        bus,
        BatchTiming {
            ack_poll_interval: Duration::from_millis(5),
            status_poll_interval: Duration::from_millis(5),
        },
    );
    let outcome = streamer
        .run(table.change_job(&edited), CancellationToken::new(), None)
        .await;

    assert!(outcome.is_complete());
    assert_eq!(outcome.sent, 2);
    assert_eq!(device.setting("$110").as_deref(), Some("600.000"));
    assert_eq!(device.setting("$32").as_deref(), Some("1"));
    assert_eq!(reader.read_settings().await, edited);
}

#[tokio::test]
async fn test_status_reports_update_the_shared_model() {
    let transport = Arc::new(
        ScriptedTransport::echo_ok().with_statuses(&["<Idle|MPos:1.000,-2.500,0.125|FS:0,0>"]),
    );
    let (bus, status) = status_model();
    let streamer = BatchCommandStreamer::new(
        transport,
        status.clone(),
        bus,
        BatchTiming {
            ack_poll_interval: Duration::from_millis(5),
            status_poll_interval: Duration::from_millis(5),
        },
    );
    streamer
        .run(Default::default(), CancellationToken::new(), None)
        .await;

    let snapshot = status.snapshot();
    assert_eq!(snapshot.state, MachineState::Idle);
    assert_eq!(
        (snapshot.x, snapshot.y, snapshot.z),
        (Some(1.0), Some(-2.5), Some(0.125))
    );
    assert_eq!(snapshot.readout(), ["1.000", "-2.500", "0.125"]);

    assert!(status.apply_line("<Idle|FS:0,0>").is_none());
    assert_eq!(status.snapshot(), snapshot);
}

//! Command queue transition tests.

use event_bus::PubSub;
use kv_store::KvStore;
use mdm_protocol::ConnectResponse;
use mdm_service::models::{DeviceCommand, QueuedCommand};
use mdm_service::store::queue::CommandQueue;

async fn setup() -> (CommandQueue, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let kv = KvStore::open(&dir.path().join("queue.db")).await.unwrap();
    let queue = CommandQueue::new(kv, PubSub::new()).await.unwrap();
    (queue, dir)
}

fn command(uuid: &str) -> QueuedCommand {
    QueuedCommand {
        uuid: uuid.to_string(),
        payload: format!("<plist>{uuid}</plist>").into_bytes(),
        ..Default::default()
    }
}

fn response(udid: &str, command_uuid: &str, status: &str) -> ConnectResponse {
    ConnectResponse {
        udid: udid.to_string(),
        command_uuid: command_uuid.to_string(),
        status: status.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn error_moves_command_to_failed() {
    let (queue, _dir) = setup().await;
    let dc = DeviceCommand {
        device_udid: "TestDevice".to_string(),
        commands: vec![command("xCmd"), command("yCmd"), command("zCmd")],
        ..Default::default()
    };
    queue.save(&dc).await.unwrap();

    let resp = response("TestDevice", "xCmd", "Error");
    for _ in 0..dc.commands.len() {
        let cmd = queue.next(&resp).await.unwrap().expect("expected a command");
        assert_ne!(cmd.uuid, "xCmd", "got back a command which previously failed");
    }

    let stored = queue.device_command("TestDevice").await.unwrap().unwrap();
    assert_eq!(stored.failed.len(), 1);
    assert_eq!(stored.failed[0].uuid, "xCmd");
}

#[tokio::test]
async fn not_now_defers_until_another_status() {
    let (queue, _dir) = setup().await;

    for commands in [vec![command("xCmd"), command("yCmd")], vec![command("xCmd")]] {
        let dc = DeviceCommand {
            device_udid: "TestDevice".to_string(),
            commands,
            completed: Vec::new(),
            failed: Vec::new(),
            not_now: Vec::new(),
        };
        queue.save(&dc).await.unwrap();

        let first = queue
            .next(&response("TestDevice", dc.commands.last().map(|c| c.uuid.as_str()).unwrap_or("yCmd"), "NotNow"))
            .await
            .unwrap();

        match first {
            Some(cmd) => {
                // the device also defers the follow-up; nothing is promoted
                // while it keeps answering NotNow
                let again = queue
                    .next(&response("TestDevice", &cmd.uuid, "NotNow"))
                    .await
                    .unwrap();
                assert!(again.is_none(), "got back a NotNow'd command");
            }
            None => {
                // single-command case: the only command was deferred
                let stored = queue.device_command("TestDevice").await.unwrap().unwrap();
                assert_eq!(stored.not_now.len(), 1);
            }
        }
    }
}

#[tokio::test]
async fn idle_rotates_through_pending_commands_in_order() {
    let (queue, _dir) = setup().await;
    let dc = DeviceCommand {
        device_udid: "TestDevice".to_string(),
        commands: vec![command("xCmd"), command("yCmd"), command("zCmd")],
        ..Default::default()
    };
    queue.save(&dc).await.unwrap();

    let resp = response("TestDevice", "xCmd", "Idle");
    for expected in ["xCmd", "yCmd", "zCmd"] {
        let cmd = queue.next(&resp).await.unwrap().expect("expected a command");
        assert_eq!(cmd.uuid, expected);
    }
}

#[tokio::test]
async fn zero_commands_returns_none() {
    let (queue, _dir) = setup().await;
    let dc = DeviceCommand {
        device_udid: "TestDevice".to_string(),
        ..Default::default()
    };
    queue.save(&dc).await.unwrap();

    for status in ["Acknowledged", "NotNow"] {
        let cmd = queue
            .next(&response("TestDevice", status, status))
            .await
            .unwrap();
        assert!(cmd.is_none(), "expected none for {status}");
    }
}

#[tokio::test]
async fn unknown_status_is_an_error() {
    let (queue, _dir) = setup().await;
    let dc = DeviceCommand {
        device_udid: "TestDevice".to_string(),
        commands: vec![command("xCmd")],
        ..Default::default()
    };
    queue.save(&dc).await.unwrap();

    let err = queue
        .next(&response("TestDevice", "xCmd", "SortOfDone"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown response status"));
}

#[tokio::test]
async fn unknown_device_returns_none() {
    let (queue, _dir) = setup().await;
    let cmd = queue
        .next(&response("NeverSeen", "xCmd", "Idle"))
        .await
        .unwrap();
    assert!(cmd.is_none());
}

#[tokio::test]
async fn acknowledged_completes_and_drains() {
    let (queue, _dir) = setup().await;
    let dc = DeviceCommand {
        device_udid: "U1".to_string(),
        commands: vec![command("cmd-1")],
        ..Default::default()
    };
    queue.save(&dc).await.unwrap();

    // Idle delivers the command
    let cmd = queue.next(&response("U1", "", "Idle")).await.unwrap().unwrap();
    assert_eq!(cmd.uuid, "cmd-1");
    assert_eq!(cmd.times_sent, 1);

    // Acknowledge completes it; queue is empty afterwards
    let next = queue
        .next(&response("U1", "cmd-1", "Acknowledged"))
        .await
        .unwrap();
    assert!(next.is_none());

    let stored = queue.device_command("U1").await.unwrap().unwrap();
    assert!(stored.commands.is_empty());
    assert_eq!(stored.completed.len(), 1);
    assert!(stored.completed[0].acknowledged.is_some());
}

#[tokio::test]
async fn acknowledging_not_now_promotes_deferred_commands() {
    let (queue, _dir) = setup().await;
    let dc = DeviceCommand {
        device_udid: "U1".to_string(),
        commands: vec![command("x"), command("y")],
        ..Default::default()
    };
    queue.save(&dc).await.unwrap();

    // defer x; y is delivered
    let delivered = queue.next(&response("U1", "x", "NotNow")).await.unwrap().unwrap();
    assert_eq!(delivered.uuid, "y");

    // acknowledge y; x gets promoted out of NotNow
    let promoted = queue
        .next(&response("U1", "y", "Acknowledged"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promoted.uuid, "x");

    let stored = queue.device_command("U1").await.unwrap().unwrap();
    assert!(stored.not_now.is_empty());
    assert_eq!(stored.commands.len(), 1);
}

#[tokio::test]
async fn a_uuid_lives_in_exactly_one_partition() {
    let (queue, _dir) = setup().await;
    let dc = DeviceCommand {
        device_udid: "U1".to_string(),
        commands: vec![command("a"), command("b"), command("c")],
        ..Default::default()
    };
    queue.save(&dc).await.unwrap();

    queue.next(&response("U1", "a", "NotNow")).await.unwrap();
    queue.next(&response("U1", "b", "Error")).await.unwrap();
    queue.next(&response("U1", "c", "Acknowledged")).await.unwrap();

    let stored = queue.device_command("U1").await.unwrap().unwrap();
    let mut all: Vec<&str> = stored
        .commands
        .iter()
        .chain(&stored.completed)
        .chain(&stored.failed)
        .chain(&stored.not_now)
        .map(|c| c.uuid.as_str())
        .collect();
    all.sort_unstable();
    let before = all.len();
    all.dedup();
    assert_eq!(before, all.len(), "a command uuid appears in two partitions");
}

#[tokio::test]
async fn user_responses_use_the_user_queue() {
    let (queue, _dir) = setup().await;
    let dc = DeviceCommand {
        device_udid: "GUID-9".to_string(),
        commands: vec![command("user-cmd")],
        ..Default::default()
    };
    queue.save(&dc).await.unwrap();

    let resp = ConnectResponse {
        udid: "U1".to_string(),
        user_id: Some("GUID-9".to_string()),
        status: "Idle".to_string(),
        ..Default::default()
    };
    let cmd = queue.next(&resp).await.unwrap().unwrap();
    assert_eq!(cmd.uuid, "user-cmd");
}

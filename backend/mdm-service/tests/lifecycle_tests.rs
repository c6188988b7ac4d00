//! End-to-end scenarios over the services and the bus.

use std::time::Duration;

use event_bus::PubSub;
use kv_store::KvStore;
use mdm_protocol::{CheckinMessage, Command, ConnectResponse};
use mdm_service::models::events::topics;
use mdm_service::services::checkin::CheckinService;
use mdm_service::services::command::CommandService;
use mdm_service::services::connect::ConnectService;
use mdm_service::store::block::BlockStore;
use mdm_service::store::devices::{self, DeviceStore};
use mdm_service::store::push_info::{self, PushInfoStore};
use mdm_service::store::queue::{self, CommandQueue};

struct Harness {
    _dir: tempfile::TempDir,
    bus: PubSub,
    checkin: CheckinService,
    commands: CommandService,
    connect: ConnectService,
    devices: DeviceStore,
    push_infos: PushInfoStore,
    queue: CommandQueue,
    block: BlockStore,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let kv = KvStore::open(&dir.path().join("mdm.db")).await.unwrap();
    let bus = PubSub::new();

    let device_store = DeviceStore::new(kv.clone()).await.unwrap();
    devices::start_listener(device_store.clone(), bus.clone());

    let push_info_store = PushInfoStore::new(kv.clone()).await.unwrap();
    push_info::start_listener(push_info_store.clone(), bus.clone());

    let command_queue = CommandQueue::new(kv.clone(), bus.clone()).await.unwrap();
    queue::start_listener(command_queue.clone(), bus.clone());

    let block_store = BlockStore::new(kv.clone()).await.unwrap();

    Harness {
        bus: bus.clone(),
        checkin: CheckinService::new(kv.clone(), bus.clone()).await.unwrap(),
        commands: CommandService::new(kv.clone(), bus.clone()).await.unwrap(),
        connect: ConnectService::new(command_queue.clone(), bus.clone(), block_store.clone()),
        devices: device_store,
        push_infos: push_info_store,
        queue: command_queue,
        block: block_store,
        _dir: dir,
    }
}

fn authenticate_plist(udid: &str, serial: &str, product: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>MessageType</key><string>Authenticate</string>
    <key>UDID</key><string>{udid}</string>
    <key>Topic</key><string>com.apple.mgmt.X</string>
    <key>SerialNumber</key><string>{serial}</string>
    <key>ProductName</key><string>{product}</string>
</dict>
</plist>"#
    )
    .into_bytes()
}

fn token_update_plist(udid: &str, token_b64: &str, push_magic: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>MessageType</key><string>TokenUpdate</string>
    <key>UDID</key><string>{udid}</string>
    <key>Topic</key><string>com.apple.mgmt.X</string>
    <key>Token</key><data>{token_b64}</data>
    <key>PushMagic</key><string>{push_magic}</string>
    <key>AwaitingConfiguration</key><false/>
</dict>
</plist>"#
    )
    .into_bytes()
}

async fn send_checkin(harness: &Harness, body: Vec<u8>) {
    let message = CheckinMessage::parse(&body).unwrap();
    match &message {
        CheckinMessage::Authenticate { .. } => {
            harness.checkin.authenticate(&message, &body).await.unwrap()
        }
        CheckinMessage::TokenUpdate { .. } => {
            harness.checkin.token_update(&message, &body).await.unwrap()
        }
        CheckinMessage::CheckOut { .. } => {
            harness.checkin.check_out(&message, &body).await.unwrap()
        }
    }
}

/// Poll until `check` passes or time runs out; background listeners consume
/// bus events asynchronously.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// S1: Authenticate then TokenUpdate enrolls a device exactly once.
#[tokio::test]
async fn enrollment_flow() {
    let harness = harness().await;
    let mut enrolled_events = harness.bus.subscribe("test", topics::DEVICE_ENROLLED);

    send_checkin(&harness, authenticate_plist("U1", "S1", "iPhone")).await;
    let devices = harness.devices.clone();
    eventually(|| {
        let devices = devices.clone();
        async move { devices.device_by_udid("U1").await.is_ok() }
    })
    .await;

    // 0xDEADBEEF
    send_checkin(&harness, token_update_plist("U1", "3q2+7w==", "PM")).await;
    let devices = harness.devices.clone();
    eventually(|| {
        let devices = devices.clone();
        async move {
            devices
                .device_by_udid("U1")
                .await
                .map(|d| d.enrolled)
                .unwrap_or(false)
        }
    })
    .await;

    let device = harness.devices.device_by_udid("U1").await.unwrap();
    assert_eq!(device.serial_number, "S1");
    assert_eq!(device.product_name, "iPhone");
    assert_eq!(device.token, "deadbeef");
    assert_eq!(device.push_magic, "PM");
    assert!(device.enrolled);

    // the push projection tracked the same token
    let push_infos = harness.push_infos.clone();
    eventually(|| {
        let push_infos = push_infos.clone();
        async move { push_infos.push_info("U1").await.is_ok() }
    })
    .await;
    let info = harness.push_infos.push_info("U1").await.unwrap();
    assert_eq!(info.token, "deadbeef");
    assert_eq!(info.mdm_topic, "com.apple.mgmt.X");

    // exactly one DeviceEnrolled
    let first = tokio::time::timeout(Duration::from_secs(2), enrolled_events.recv())
        .await
        .expect("DeviceEnrolled published")
        .unwrap();
    assert_eq!(first.topic, topics::DEVICE_ENROLLED);
    assert!(enrolled_events.try_recv().is_err(), "DeviceEnrolled published twice");
}

// S4: re-enrollment clears `enrolled` until the next TokenUpdate, which
// publishes a fresh DeviceEnrolled.
#[tokio::test]
async fn re_enrollment_resets_enrolled() {
    let harness = harness().await;
    let mut enrolled_events = harness.bus.subscribe("test", topics::DEVICE_ENROLLED);

    send_checkin(&harness, authenticate_plist("U1", "S1", "iPhone")).await;
    send_checkin(&harness, token_update_plist("U1", "3q2+7w==", "PM")).await;
    let devices = harness.devices.clone();
    eventually(|| {
        let devices = devices.clone();
        async move {
            devices
                .device_by_udid("U1")
                .await
                .map(|d| d.enrolled)
                .unwrap_or(false)
        }
    })
    .await;
    enrolled_events.recv().await.unwrap();

    // the device re-enrolls
    send_checkin(&harness, authenticate_plist("U1", "S1", "iPhone")).await;
    let devices = harness.devices.clone();
    eventually(|| {
        let devices = devices.clone();
        async move {
            devices
                .device_by_udid("U1")
                .await
                .map(|d| !d.enrolled)
                .unwrap_or(false)
        }
    })
    .await;

    send_checkin(&harness, token_update_plist("U1", "3q2+7w==", "PM")).await;
    let second = tokio::time::timeout(Duration::from_secs(2), enrolled_events.recv())
        .await
        .expect("second DeviceEnrolled published")
        .unwrap();
    assert_eq!(second.topic, topics::DEVICE_ENROLLED);

    let device = harness.devices.device_by_udid("U1").await.unwrap();
    assert!(device.enrolled);
}

// S2: command lifecycle from creation through acknowledgement.
#[tokio::test]
async fn command_lifecycle() {
    let harness = harness().await;
    let mut queued_events = harness.bus.subscribe("test", topics::COMMAND_QUEUED);

    let payload = harness
        .commands
        .new_command(
            "U1",
            Command::DeviceInformation {
                queries: vec!["SerialNumber".to_string()],
            },
        )
        .await
        .unwrap();

    // CommandQueued published once the queue persisted it
    let queued = tokio::time::timeout(Duration::from_secs(2), queued_events.recv())
        .await
        .expect("CommandQueued published")
        .unwrap();
    assert_eq!(queued.topic, topics::COMMAND_QUEUED);

    // Idle delivers the command payload verbatim
    let idle = ConnectResponse {
        udid: "U1".to_string(),
        status: "Idle".to_string(),
        ..Default::default()
    };
    let body = harness.connect.acknowledge(&idle, b"<plist/>").await.unwrap();
    let delivered = body.expect("expected a command body");
    assert_eq!(delivered, payload.to_xml().unwrap());

    // Acknowledged drains the queue
    let ack = ConnectResponse {
        udid: "U1".to_string(),
        command_uuid: payload.command_uuid.clone(),
        status: "Acknowledged".to_string(),
        ..Default::default()
    };
    let body = harness.connect.acknowledge(&ack, b"<plist/>").await.unwrap();
    assert!(body.is_none());

    let stored = harness.queue.device_command("U1").await.unwrap().unwrap();
    assert_eq!(stored.completed.len(), 1);
    assert_eq!(stored.completed[0].uuid, payload.command_uuid);
}

// S6: a blocked UDID forces checkout regardless of queue state.
#[tokio::test]
async fn blocked_device_forces_checkout() {
    let harness = harness().await;

    harness
        .commands
        .new_command("U1", Command::ProfileList)
        .await
        .unwrap();
    let queue = harness.queue.clone();
    eventually(|| {
        let queue = queue.clone();
        async move { queue.device_command("U1").await.ok().flatten().is_some() }
    })
    .await;

    harness.block.block("U1").await.unwrap();
    let idle = ConnectResponse {
        udid: "U1".to_string(),
        status: "Idle".to_string(),
        ..Default::default()
    };
    let err = harness.connect.acknowledge(&idle, b"<plist/>").await.unwrap_err();
    assert_eq!(
        err.status_code(),
        actix_web::http::StatusCode::UNAUTHORIZED
    );

    // the queue was not touched
    let stored = harness.queue.device_command("U1").await.unwrap().unwrap();
    assert_eq!(stored.commands.len(), 1);

    // unblocking restores normal delivery
    harness.block.unblock("U1").await.unwrap();
    let body = harness.connect.acknowledge(&idle, b"<plist/>").await.unwrap();
    assert!(body.is_some());
}

// S3: NotNow defers; nothing is promoted while the device answers NotNow.
#[tokio::test]
async fn not_now_deferral_over_connect() {
    let harness = harness().await;

    let x = harness
        .commands
        .new_command("U1", Command::ProfileList)
        .await
        .unwrap();
    let y = harness
        .commands
        .new_command("U1", Command::CertificateList)
        .await
        .unwrap();

    let queue = harness.queue.clone();
    eventually(|| {
        let queue = queue.clone();
        async move {
            queue
                .device_command("U1")
                .await
                .ok()
                .flatten()
                .map(|dc| dc.commands.len() == 2)
                .unwrap_or(false)
        }
    })
    .await;

    let not_now_x = ConnectResponse {
        udid: "U1".to_string(),
        command_uuid: x.command_uuid.clone(),
        status: "NotNow".to_string(),
        ..Default::default()
    };
    let delivered = harness
        .connect
        .acknowledge(&not_now_x, b"<plist/>")
        .await
        .unwrap()
        .expect("y should be delivered after x defers");
    assert_eq!(delivered, y.to_xml().unwrap());

    let not_now_y = ConnectResponse {
        udid: "U1".to_string(),
        command_uuid: y.command_uuid.clone(),
        status: "NotNow".to_string(),
        ..Default::default()
    };
    let body = harness
        .connect
        .acknowledge(&not_now_y, b"<plist/>")
        .await
        .unwrap();
    assert!(body.is_none(), "no promotion while the device answers NotNow");
}

// Check-in archives are written before the event is published.
#[tokio::test]
async fn checkin_archives_before_publishing() {
    let harness = harness().await;
    let mut authenticate_events = harness.bus.subscribe("test", topics::AUTHENTICATE);

    send_checkin(&harness, authenticate_plist("U1", "S1", "iPhone")).await;
    let event = tokio::time::timeout(Duration::from_secs(2), authenticate_events.recv())
        .await
        .expect("Authenticate published")
        .unwrap();
    assert_eq!(event.topic, topics::AUTHENTICATE);
}

#[tokio::test]
async fn checkin_rejects_message_type_mismatch() {
    let harness = harness().await;
    let body = authenticate_plist("U1", "S1", "iPhone");
    let message = CheckinMessage::parse(&body).unwrap();
    let err = harness.checkin.token_update(&message, &body).await.unwrap_err();
    assert!(err.to_string().contains("expected TokenUpdate"));
}

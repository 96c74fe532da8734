//! UDP sync protocol end-to-end: a real SlaveSyncServer on an ephemeral
//! port, driven by raw datagrams, the control client and the clock probe.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;

use capsync_camserver::camera::{
    CameraPipeline, FrameBuffer, FrameSize, PixelFormat, SensorDriver, SyntheticSensor,
};
use capsync_camserver::capture_engine::CaptureEngine;
use capsync_camserver::clock;
use capsync_camserver::clock_probe::ClockProbe;
use capsync_camserver::error::Error;
use capsync_camserver::models::CaptureRequest;
use capsync_camserver::storage::ArtifactStore;
use capsync_camserver::stream_supervisor::StreamSupervisor;
use capsync_camserver::sync_client::SlaveControlClient;
use capsync_camserver::sync_server::SlaveSyncServer;

struct SlaveFixture {
    engine: Arc<CaptureEngine>,
    port: u16,
    _dir: tempfile::TempDir,
    dir_path: std::path::PathBuf,
}

async fn slave_fixture_with_driver(
    driver: Arc<dyn SensorDriver>,
    drop_frames: u32,
) -> SlaveFixture {
    let pipeline = Arc::new(CameraPipeline::with_settle(
        driver,
        FrameSize::Svga,
        Duration::ZERO,
    ));
    pipeline
        .initialize(PixelFormat::Jpeg, FrameSize::Svga)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();
    let store = Arc::new(ArtifactStore::new(dir.path()).await.unwrap());
    let engine = Arc::new(CaptureEngine::new(
        pipeline,
        store,
        Arc::new(StreamSupervisor::new()),
        drop_frames,
    ));

    let server = SlaveSyncServer::bind("127.0.0.1", 0, engine.clone())
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    tokio::spawn(server.run());

    SlaveFixture {
        engine,
        port,
        _dir: dir,
        dir_path,
    }
}

async fn slave_fixture() -> SlaveFixture {
    let sensor = Arc::new(SyntheticSensor::with_timing(
        Duration::from_millis(2),
        Duration::ZERO,
    ));
    slave_fixture_with_driver(sensor, 1).await
}

async fn exchange(port: u16, payload: &str) -> String {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(("127.0.0.1", port)).await.unwrap();
    socket.send(payload.as_bytes()).await.unwrap();
    let mut buf = [0u8; 64];
    let len = tokio::time::timeout(Duration::from_secs(1), socket.recv(&mut buf))
        .await
        .expect("reply deadline")
        .unwrap();
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

async fn wait_for_idle(engine: &CaptureEngine) {
    for _ in 0..200 {
        let (ready, in_progress) = engine.status().await;
        if !ready && !in_progress {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("slave capture never finished");
}

fn request(frame_count: u32) -> CaptureRequest {
    let mut req = CaptureRequest::from_pairs(&[], FrameSize::Svga);
    req.session = "proto".to_string();
    req.frame_count = frame_count;
    req
}

#[tokio::test]
async fn ready_is_refused_until_prepared() {
    let fixture = slave_fixture().await;
    assert_eq!(exchange(fixture.port, "READY").await, "NO");

    fixture.engine.prepare(request(1)).await.unwrap();
    assert_eq!(exchange(fixture.port, "READY").await, "OK");
}

#[tokio::test]
async fn clock_echo_replies_with_local_microseconds() {
    let fixture = slave_fixture().await;
    let reply = exchange(fixture.port, &clock::monotonic_us().to_string()).await;
    assert!(reply.parse::<i64>().is_ok(), "echo reply not decimal: {reply}");
}

#[tokio::test]
async fn unknown_payloads_get_err() {
    let fixture = slave_fixture().await;
    assert_eq!(exchange(fixture.port, "HELLO?").await, "ERR");
}

#[tokio::test]
async fn start_is_refused_when_unarmed_or_malformed() {
    let fixture = slave_fixture().await;
    assert_eq!(exchange(fixture.port, "START 1000").await, "NO");

    fixture.engine.prepare(request(1)).await.unwrap();
    assert_eq!(exchange(fixture.port, "START -5").await, "NO");
    assert_eq!(exchange(fixture.port, "START soon").await, "NO");
    // Refusals leave the slot armed
    assert_eq!(exchange(fixture.port, "READY").await, "OK");
}

#[tokio::test]
async fn start_fires_the_prepared_capture() {
    let fixture = slave_fixture().await;
    fixture.engine.prepare(request(2)).await.unwrap();

    assert_eq!(exchange(fixture.port, "START 5000").await, "ACK");
    wait_for_idle(&fixture.engine).await;

    let names: Vec<String> = std::fs::read_dir(&fixture.dir_path)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 2);
    for name in names {
        let (session, _, ext) = ArtifactStore::parse_artifact_name(&name).unwrap();
        assert_eq!(session, "proto");
        assert_eq!(ext, "jpg");
    }

    // The slot disarmed on claim; a second START has nothing to fire.
    assert_eq!(exchange(fixture.port, "START 0").await, "NO");
}

#[tokio::test]
async fn control_client_polls_ready_and_fires() {
    let fixture = slave_fixture().await;
    let client = SlaveControlClient::new("127.0.0.1", fixture.port);

    assert!(client
        .await_ready(Duration::from_millis(120), Duration::from_millis(30))
        .await
        .is_err());

    fixture.engine.prepare(request(1)).await.unwrap();
    client
        .await_ready(Duration::from_millis(500), Duration::from_millis(30))
        .await
        .unwrap();
    client
        .fire(1_000, 3, Duration::from_millis(20))
        .await
        .unwrap();
    wait_for_idle(&fixture.engine).await;
}

#[tokio::test]
async fn clock_probe_measures_loopback_link() {
    let fixture = slave_fixture().await;
    let probe = ClockProbe::new("127.0.0.1", fixture.port, 4, Duration::from_millis(200));
    let metrics = probe.probe().await.unwrap();

    // Loopback: trip is tiny, and both processes share one clock epoch to
    // within a few milliseconds.
    assert!(metrics.one_way_trip_us >= 0);
    assert!(metrics.one_way_trip_us < 100_000);
    assert!(metrics.cpu_disparity_us.abs() < 100_000);
}

#[tokio::test]
async fn probe_with_garbage_replies_reports_malformed() {
    // A responder that answers every ping with non-decimal bytes.
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        loop {
            let Ok((_, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let _ = socket.send_to(b"NOTANUMBER", peer).await;
        }
    });

    let probe = ClockProbe::new("127.0.0.1", port, 3, Duration::from_millis(200));
    assert!(matches!(probe.probe().await, Err(Error::Malformed(_))));
}

#[tokio::test]
async fn probe_against_dead_port_reports_failure() {
    // Bind then drop to find a port nothing listens on.
    let dead_port = {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap().port()
    };
    let probe = ClockProbe::new("127.0.0.1", dead_port, 2, Duration::from_millis(100));
    assert!(probe.probe().await.is_err());
}

/// Driver that timestamps every frame pull.
struct TrackingSensor {
    fetch_times: StdMutex<Vec<i64>>,
}

#[async_trait]
impl SensorDriver for TrackingSensor {
    async fn init(&self, _format: PixelFormat, _size: FrameSize) -> capsync_camserver::Result<()> {
        Ok(())
    }

    async fn deinit(&self) {}

    async fn power_cycle(&self) {}

    async fn set_frame_size(&self, _size: FrameSize) -> capsync_camserver::Result<()> {
        Ok(())
    }

    async fn write_register(&self, _key: &str, _value: i32) {}

    async fn fetch_frame(&self) -> capsync_camserver::Result<FrameBuffer> {
        self.fetch_times.lock().unwrap().push(clock::monotonic_us());
        Ok(FrameBuffer {
            data: Bytes::from_static(&[0xff, 0xd8, 0x00, 0xff, 0xd9]),
            format: PixelFormat::Jpeg,
            size: FrameSize::Svga,
        })
    }
}

#[tokio::test]
async fn ack_is_sent_before_the_first_frame_pull() {
    let sensor = Arc::new(TrackingSensor {
        fetch_times: StdMutex::new(Vec::new()),
    });
    let fixture = slave_fixture_with_driver(sensor.clone(), 0).await;
    fixture.engine.prepare(request(1)).await.unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(("127.0.0.1", fixture.port)).await.unwrap();
    socket.send(b"START 20000").await.unwrap();
    let mut buf = [0u8; 16];
    let len = tokio::time::timeout(Duration::from_secs(1), socket.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let ack_at_us = clock::monotonic_us();
    assert_eq!(&buf[..len], b"ACK");

    wait_for_idle(&fixture.engine).await;
    let fetch_times = sensor.fetch_times.lock().unwrap().clone();
    assert_eq!(fetch_times.len(), 1);
    assert!(
        fetch_times[0] > ack_at_us,
        "frame pulled at {} before ACK completed at {}",
        fetch_times[0],
        ack_at_us
    );
}

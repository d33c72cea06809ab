//! End-to-end tests: router, service and client in one process against a
//! temporary sysfs tree.

#![allow(clippy::float_cmp)] // Exact float comparisons are intentional in tests

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use led_client::{Format, InvokeOptions, invoke};
use led_common::{
    INTERFACE_NAME, LedCommand, LedState, OBJECT_PATH, SERVICE_NAME, SERVICE_PORT, led_interface,
    session_opts,
};
use led_service::{LedService, ServiceConfig};
use ledbus::{BusAttachment, BusError, ProxyBusObject};
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(10);
const DEVICE: &str = "beaglebone:green:usr1";
const TRIGGERS: [&str; 3] = ["none", "timer", "heartbeat"];

struct Board {
    _dir: TempDir,
    device: PathBuf,
    options: InvokeOptions,
    service: Option<LedService>,
    _shutdown: oneshot::Sender<()>,
}

impl Board {
    /// Router plus a running service on a freshly booted LED.
    async fn boot() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("bus.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(ledbus_daemon::serve(listener, async {
            let _ = rx.await;
        }));

        let leds_root = dir.path().join("leds");
        let device = leds_root.join(DEVICE);
        std::fs::create_dir_all(&device).unwrap();
        std::fs::write(device.join("trigger"), "[none] timer heartbeat\n").unwrap();
        std::fs::write(device.join("brightness"), "0\n").unwrap();

        let address = format!("unix:path={}", socket.display());
        let service = LedService::start(&ServiceConfig {
            device: DEVICE.to_string(),
            leds_root,
            address: address.clone(),
        })
        .await
        .unwrap();

        Self {
            _dir: dir,
            device,
            options: InvokeOptions {
                address,
                ..InvokeOptions::default()
            },
            service: Some(service),
            _shutdown: tx,
        }
    }

    fn read(&self, file: &str) -> String {
        std::fs::read_to_string(self.device.join(file)).unwrap()
    }

    fn write(&self, file: &str, value: &str) {
        std::fs::write(self.device.join(file), value).unwrap();
    }

    /// Make `trigger` read back as the kernel lists it: a bare name written
    /// by the service becomes the bracketed entry of the full listing.
    fn settle(&self) {
        let written = self.read("trigger");
        let written = written.trim();
        if written.contains('[') || !TRIGGERS.contains(&written) {
            return;
        }
        let listing: Vec<String> = TRIGGERS
            .iter()
            .map(|t| {
                if *t == written {
                    format!("[{t}]")
                } else {
                    (*t).to_string()
                }
            })
            .collect();
        self.write("trigger", &listing.join(" "));
    }

    /// Run the client for `command` and render its line.
    async fn run(&self, command: LedCommand) -> String {
        let stop = AtomicBool::new(false);
        let state = tokio::time::timeout(WAIT, invoke(&self.options, command, &stop))
            .await
            .expect("client timed out")
            .unwrap();
        Format::Json.render(command.member_name(), state)
    }

    async fn proxy(&self) -> (BusAttachment, ProxyBusObject) {
        let bus = BusAttachment::new("testClient", true);
        bus.start().unwrap();
        bus.connect(&self.options.address).await.unwrap();
        let (session, _) = bus
            .join_session(SERVICE_NAME, SERVICE_PORT, session_opts())
            .await
            .unwrap();
        let mut proxy = ProxyBusObject::new(&bus, SERVICE_NAME, OBJECT_PATH, session).unwrap();
        proxy.add_interface(&led_interface().unwrap());
        (bus, proxy)
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        if let Some(service) = self.service.take() {
            service.shutdown();
        }
    }
}

async fn call(proxy: &ProxyBusObject, command: LedCommand) -> LedState {
    let reply = proxy
        .method_call(INTERFACE_NAME, command.member_name(), &command.args(), WAIT)
        .await
        .unwrap();
    LedState::from_args(&reply).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_off_on_fresh_boot() {
    let board = Board::boot().await;
    assert_eq!(
        board.run(LedCommand::Off).await,
        r#"{ "cmd": "off", "brightness": 0.000000, "frequency": 0 }"#
    );
    assert_eq!(board.read("trigger"), "none");
    assert_eq!(board.read("brightness"), "0");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_on() {
    let board = Board::boot().await;
    assert_eq!(
        board.run(LedCommand::On { brightness: 1.0 }).await,
        r#"{ "cmd": "on", "brightness": 1.000000, "frequency": 0 }"#
    );
    assert_eq!(board.read("trigger"), "none");
    assert_eq!(board.read("brightness"), "1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flash() {
    let board = Board::boot().await;
    assert_eq!(
        board
            .run(LedCommand::Flash {
                brightness: 1.0,
                frequency: 500
            })
            .await,
        r#"{ "cmd": "flash", "brightness": 1.000000, "frequency": 500 }"#
    );
    assert_eq!(board.read("trigger"), "timer");
    assert_eq!(board.read("brightness"), "1");
    assert_eq!(board.read("delay_on"), "500");
    assert_eq!(board.read("delay_off"), "500");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_of_kernel_timer() {
    let board = Board::boot().await;
    board.write("trigger", "none [timer] heartbeat");
    board.write("delay_on", "250");
    assert_eq!(
        board.run(LedCommand::Status).await,
        r#"{ "cmd": "status", "brightness": 1.000000, "frequency": 250 }"#
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_status_clients_agree() {
    let board = Board::boot().await;
    board
        .run(LedCommand::Flash {
            brightness: 1.0,
            frequency: 125,
        })
        .await;
    board.settle();
    assert_eq!(board.read("trigger"), "none [timer] heartbeat");

    let (first, second) = tokio::join!(
        board.run(LedCommand::Status),
        board.run(LedCommand::Status)
    );
    assert_eq!(first, second);
    assert_eq!(
        first,
        r#"{ "cmd": "status", "brightness": 1.000000, "frequency": 125 }"#
    );

    // The service is still serving.
    assert_eq!(
        board.run(LedCommand::Off).await,
        r#"{ "cmd": "off", "brightness": 0.000000, "frequency": 0 }"#
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interrupt_before_join() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("bus.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let (_tx, rx) = oneshot::channel::<()>();
    tokio::spawn(ledbus_daemon::serve(listener, async {
        let _ = rx.await;
    }));

    // No service: discovery never completes.
    let options = InvokeOptions {
        address: format!("unix:path={}", socket.display()),
        ..InvokeOptions::default()
    };
    let stop = AtomicBool::new(true);
    let err = tokio::time::timeout(WAIT, invoke(&options, LedCommand::Status, &stop))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, BusError::Interrupted));
    assert_eq!(err.status(), BusError::Interrupted.status());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_follows_each_command() {
    let board = Board::boot().await;
    let (_bus, proxy) = board.proxy().await;

    call(&proxy, LedCommand::Off).await;
    board.settle();
    assert_eq!(call(&proxy, LedCommand::Status).await, LedState::OFF);

    call(&proxy, LedCommand::On { brightness: 0.4 }).await;
    board.settle();
    assert_eq!(
        call(&proxy, LedCommand::Status).await,
        LedState::new(1.0, 0)
    );

    call(
        &proxy,
        LedCommand::Flash {
            brightness: 0.4,
            frequency: 75,
        },
    )
    .await;
    board.settle();
    assert_eq!(
        call(&proxy, LedCommand::Status).await,
        LedState::new(1.0, 75)
    );

    // Off wins over whatever trigger was active.
    board.write("trigger", "none [heartbeat] timer");
    call(&proxy, LedCommand::Off).await;
    board.settle();
    assert_eq!(call(&proxy, LedCommand::Status).await, LedState::OFF);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flash_zero_is_on() {
    let board = Board::boot().await;
    let (_bus, proxy) = board.proxy().await;

    let flashed = call(
        &proxy,
        LedCommand::Flash {
            brightness: 0.7,
            frequency: 0,
        },
    )
    .await;
    let flashed_status = call(&proxy, LedCommand::Status).await;
    let flashed_files = (board.read("trigger"), board.read("brightness"));

    call(&proxy, LedCommand::Off).await;
    let on = call(&proxy, LedCommand::On { brightness: 0.7 }).await;
    assert_eq!(flashed, on);
    assert_eq!(flashed_status, call(&proxy, LedCommand::Status).await);
    assert_eq!(
        flashed_files,
        (board.read("trigger"), board.read("brightness"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replies_echo_requested_values() {
    let board = Board::boot().await;
    let (_bus, proxy) = board.proxy().await;

    // Brightness values the hardware cannot show still come back unchanged.
    for brightness in [0.0, 0.125, 0.1 + 0.2, 1.0, 7.5, -3.25, f64::MIN_POSITIVE] {
        let on = call(&proxy, LedCommand::On { brightness }).await;
        assert_eq!(on.brightness.to_bits(), brightness.to_bits());
        assert_eq!(on.frequency, 0);

        for frequency in [1, 500, u32::MAX] {
            let flash = call(
                &proxy,
                LedCommand::Flash {
                    brightness,
                    frequency,
                },
            )
            .await;
            assert_eq!(flash.brightness.to_bits(), brightness.to_bits());
            assert_eq!(flash.frequency, frequency);
        }
    }
    assert_eq!(call(&proxy, LedCommand::Off).await, LedState::OFF);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_on_is_idempotent() {
    let board = Board::boot().await;
    let (_bus, proxy) = board.proxy().await;

    call(&proxy, LedCommand::On { brightness: 0.9 }).await;
    let once = call(&proxy, LedCommand::Status).await;
    call(&proxy, LedCommand::On { brightness: 0.9 }).await;
    call(&proxy, LedCommand::On { brightness: 0.9 }).await;
    assert_eq!(call(&proxy, LedCommand::Status).await, once);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_thousand_mixed_calls() {
    let board = Board::boot().await;
    let (_bus, proxy) = board.proxy().await;

    for i in 0u32..1000 {
        let command = match i % 4 {
            0 => LedCommand::On {
                brightness: f64::from(i) / 1000.0,
            },
            1 => LedCommand::Flash {
                brightness: 1.0,
                frequency: i,
            },
            2 => LedCommand::Status,
            _ => LedCommand::Off,
        };
        let state = call(&proxy, command).await;
        board.settle();
        match command {
            LedCommand::On { brightness } => assert_eq!(state, LedState::new(brightness, 0)),
            LedCommand::Flash {
                brightness,
                frequency,
            } => assert_eq!(state, LedState::new(brightness, frequency)),
            LedCommand::Status => assert_eq!(state, LedState::new(1.0, i - 1)),
            LedCommand::Off => assert_eq!(state, LedState::OFF),
        }
    }
}

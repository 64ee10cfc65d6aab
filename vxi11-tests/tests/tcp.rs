use std::time::Duration;

use vxi11_client::{Builder, CallContext, Controller, DeviceAddress, ErrorCode, TerminationReason};
use vxi11_protocol::Procedure;
use vxi11_tests::{IDN, Instrument, Responder};

fn identify(controller: Controller) -> String {
    let mut ctx = CallContext::new();
    ctx.set_io_timeout(Duration::from_secs(2));
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::with_secondary(20, 0))
        .unwrap();
    device.write(&mut ctx, b"*idn?").unwrap();
    let mut buf = [0; 50];
    let len = device.read(&mut ctx, &mut buf).unwrap();
    assert_eq!(ctx.termination_reason(), Some(TerminationReason::End));
    device.disconnect();
    controller.disconnect();
    String::from_utf8_lossy(&buf[..len]).trim_end().to_string()
}

#[tokio::test(flavor = "multi_thread")]
async fn round_trip_on_direct_port() {
    let _ = env_logger::builder().is_test(true).try_init();
    let instrument = Instrument::default();
    let responder = Responder::start(instrument.clone()).await.unwrap();

    let controller = Builder::new()
        .port(responder.core_port())
        .build("127.0.0.1", "hpib");
    let idn = tokio::task::spawn_blocking(move || identify(controller))
        .await
        .unwrap();
    assert_eq!(idn, IDN);
    assert_eq!(instrument.link_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn round_trip_via_portmapper() {
    let _ = env_logger::builder().is_test(true).try_init();
    let instrument = Instrument::default();
    let responder = Responder::start(instrument.clone()).await.unwrap();

    let controller = Builder::new()
        .portmapper_port(responder.portmapper_port())
        .build("127.0.0.1", "hpib");
    let idn = tokio::task::spawn_blocking(move || identify(controller))
        .await
        .unwrap();
    assert_eq!(idn, IDN);
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_over_tcp() {
    let _ = env_logger::builder().is_test(true).try_init();
    let instrument = Instrument::default();
    let responder = Responder::start(instrument.clone()).await.unwrap();

    let controller = Builder::new()
        .port(responder.core_port())
        .build("127.0.0.1", "inst0");
    let waiter = instrument.clone();
    let code = tokio::task::spawn_blocking(move || {
        let mut ctx = CallContext::new();
        controller.connect(&mut ctx).unwrap();
        let device = controller
            .create_device(&mut ctx, DeviceAddress::symbolic())
            .unwrap();
        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut ctx = CallContext::new();
                let mut buf = [0; 16];
                device.read(&mut ctx, &mut buf).map_err(|e| e.code())
            });
            assert!(waiter.wait_for_blocked_read(Duration::from_secs(5)));
            device.abort().unwrap();
            reader.join().unwrap()
        })
    })
    .await
    .unwrap();
    assert_eq!(code, Err(ErrorCode::Abort));
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_port_zero_uses_portmapper() {
    let _ = env_logger::builder().is_test(true).try_init();
    let instrument = Instrument::default();
    let responder = Responder::start(instrument.clone()).await.unwrap();
    instrument.set_abort_port(0);

    let controller = Builder::new()
        .port(responder.core_port())
        .portmapper_port(responder.portmapper_port())
        .build("127.0.0.1", "inst0");
    let waiter = instrument.clone();
    let code = tokio::task::spawn_blocking(move || {
        let mut ctx = CallContext::new();
        controller.connect(&mut ctx).unwrap();
        let device = controller
            .create_device(&mut ctx, DeviceAddress::symbolic())
            .unwrap();
        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut ctx = CallContext::new();
                let mut buf = [0; 16];
                device.read(&mut ctx, &mut buf).map_err(|e| e.code())
            });
            assert!(waiter.wait_for_blocked_read(Duration::from_secs(5)));
            device.abort().unwrap();
            reader.join().unwrap()
        })
    })
    .await
    .unwrap();
    assert_eq!(code, Err(ErrorCode::Abort));
    assert_eq!(instrument.calls(Procedure::DeviceAbort), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn instrument_timeout_over_tcp() {
    let _ = env_logger::builder().is_test(true).try_init();
    let instrument = Instrument::default();
    let responder = Responder::start(instrument.clone()).await.unwrap();

    let controller = Builder::new()
        .port(responder.core_port())
        .build("127.0.0.1", "inst0");
    let (code, retried) = tokio::task::spawn_blocking(move || {
        let mut ctx = CallContext::new();
        controller.connect(&mut ctx).unwrap();
        let device = controller
            .create_device(&mut ctx, DeviceAddress::symbolic())
            .unwrap();
        ctx.set_io_timeout(Duration::from_millis(100));
        let mut buf = [0; 4];
        let code = device.read(&mut ctx, &mut buf).map_err(|e| e.code());
        device.write(&mut ctx, b"ok").unwrap();
        let retried = device.read(&mut ctx, &mut buf).map(|len| buf[..len].to_vec());
        (code, retried)
    })
    .await
    .unwrap();
    assert_eq!(code, Err(ErrorCode::IoTimeout));
    assert_eq!(retried.unwrap(), b"ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_port_is_transport_error() {
    let _ = env_logger::builder().is_test(true).try_init();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let controller = Builder::new()
        .port(port)
        .connect_timeout(Duration::from_millis(500))
        .build("127.0.0.1", "inst0");
    let (code, connected) = tokio::task::spawn_blocking(move || {
        let mut ctx = CallContext::new();
        let code = controller.connect(&mut ctx).map_err(|e| e.code());
        (code, controller.is_connected())
    })
    .await
    .unwrap();
    assert_eq!(code, Err(ErrorCode::TransportError));
    assert!(!connected);
}

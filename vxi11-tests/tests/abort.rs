use std::{sync::Arc, thread, time::Duration};

use vxi11_client::{Builder, CallContext, DeviceAddress, ErrorCode};
use vxi11_protocol::Procedure;
use vxi11_tests::{Instrument, MemoryConnector};

#[test]
fn abort_blocked_read() {
    let _ = env_logger::builder().is_test(true).try_init();
    let connector = MemoryConnector::new(Instrument::default());
    let controller = Builder::new()
        .connector(Arc::new(connector.clone()))
        .build("simulated", "inst0");
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();
    let instrument = connector.instrument();

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut ctx = CallContext::new();
            ctx.set_io_timeout(Duration::from_secs(10));
            let mut buf = [0; 64];
            let result = device.read(&mut ctx, &mut buf);
            (result, ctx.error_code())
        });
        assert!(instrument.wait_for_blocked_read(Duration::from_secs(5)));
        device.abort().unwrap();

        let (result, code) = reader.join().unwrap();
        assert_eq!(result.unwrap_err().code(), ErrorCode::Abort);
        assert_eq!(code, ErrorCode::Abort);
    });
    assert_eq!(instrument.calls(Procedure::DeviceAbort), 1);

    // the link stays usable
    device.write(&mut ctx, b"*idn?").unwrap();
    let mut buf = [0; 64];
    assert!(device.read(&mut ctx, &mut buf).unwrap() > 0);
}

#[test]
fn abort_when_idle_is_harmless() {
    let _ = env_logger::builder().is_test(true).try_init();
    let connector = MemoryConnector::new(Instrument::default());
    let controller = Builder::new()
        .connector(Arc::new(connector.clone()))
        .build("simulated", "inst0");
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();

    device.abort().unwrap();
    device.abort().unwrap();
    device.write(&mut ctx, b"ping").unwrap();
    let mut buf = [0; 8];
    let len = device.read(&mut ctx, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"ping");

    device.disconnect();
    let invocations = connector.invocations();
    device.abort().unwrap();
    assert_eq!(connector.invocations(), invocations);
}

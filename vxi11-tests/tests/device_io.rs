use std::sync::Arc;

use vxi11_client::{
    Builder, CallContext, Controller, DeviceAddress, DeviceLink, ErrorCode, TerminationReason,
};
use vxi11_protocol::Procedure;
use vxi11_tests::{IDN, Instrument, InstrumentConfig, MemoryConnector};

fn controller(device_name: &str, config: InstrumentConfig) -> (MemoryConnector, Controller) {
    let _ = env_logger::builder().is_test(true).try_init();
    let connector = MemoryConnector::new(Instrument::new(config));
    let controller = Builder::new()
        .connector(Arc::new(connector.clone()))
        .build("simulated", device_name);
    (connector, controller)
}

fn read_until_end(device: &DeviceLink, ctx: &mut CallContext, chunk: usize) -> (Vec<u8>, usize) {
    let mut response = Vec::new();
    let mut counted = 0;
    let mut buf = vec![0; chunk];
    loop {
        let len = device.read(ctx, &mut buf).unwrap();
        assert_eq!(len, ctx.bytes_transferred());
        counted += ctx.bytes_transferred();
        response.extend_from_slice(&buf[..len]);
        if ctx.termination_reason() == Some(TerminationReason::End) {
            return (response, counted);
        }
    }
}

#[test]
fn identify_gpib_device() {
    let (connector, controller) = controller("hpib", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    assert!(controller.is_connected());

    let device = controller
        .create_device(&mut ctx, DeviceAddress::from_raw(20, 0))
        .unwrap();
    assert_eq!(device.name(), "hpib,20,0");
    assert_eq!(
        connector.instrument().devices(),
        vec!["hpib".to_string(), "hpib,20,0".to_string()]
    );

    device.write(&mut ctx, b"*idn?").unwrap();
    assert!(ctx.status().is_ok());
    assert_eq!(ctx.bytes_transferred(), 5);

    let mut buf = [0; 50];
    let len = device.read(&mut ctx, &mut buf).unwrap();
    assert_eq!(ctx.termination_reason(), Some(TerminationReason::End));
    assert!(len > 0);
    let idn = String::from_utf8_lossy(&buf[..len]);
    assert_eq!(idn.trim_end(), IDN);
}

#[test]
fn learn_string_needs_several_reads() {
    let (connector, controller) = controller("inst0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::from_raw(-1, -1))
        .unwrap();
    assert_eq!(device.name(), "inst0");

    device.write(&mut ctx, b"*lrn?").unwrap();
    let (learn, counted) = read_until_end(&device, &mut ctx, 512);
    assert_eq!(learn.len(), counted);
    assert_eq!(learn, connector.instrument().learn_string());
    assert!(connector.instrument().calls(Procedure::DeviceRead) > 1);
}

#[test]
fn write_then_read_reassembles_payload() {
    let config = InstrumentConfig::default();
    let max = config.max_recv_size as usize;
    let (connector, controller) = controller("inst0", config);
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();
    assert_eq!(device.max_recv_size(), Some(max as u32));

    let mut writes = 0;
    for (size, chunks) in [(0, 1), (max, 1), (3 * max, 3)] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        assert_eq!(device.write(&mut ctx, &payload).unwrap(), size);
        assert_eq!(ctx.bytes_transferred(), size);
        assert_eq!(ctx.termination_reason(), None);
        writes += chunks;
        assert_eq!(
            connector.instrument().calls(Procedure::DeviceWrite),
            writes,
            "{} bytes",
            size
        );

        let (echo, counted) = read_until_end(&device, &mut ctx, 1000);
        assert_eq!(counted, size);
        assert_eq!(echo, payload);
    }
}

#[test]
fn wait_for_end_collects_whole_response() {
    let (connector, controller) = controller("inst0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();

    device.write(&mut ctx, b"*lrn?").unwrap();
    let learn = connector.instrument().learn_string();
    let mut buf = vec![0; learn.len() + 100];
    ctx.set_wait_for_end(true);
    let len = device.read(&mut ctx, &mut buf).unwrap();
    assert_eq!(&buf[..len], &learn[..]);
    assert_eq!(ctx.termination_reason(), Some(TerminationReason::End));
}

#[test]
fn termination_character_stops_read() {
    let (_connector, controller) = controller("inst0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();

    device.write(&mut ctx, b"1.5;2.5").unwrap();
    ctx.set_term_char(Some(b';'));
    let mut buf = [0; 16];
    let len = device.read(&mut ctx, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"1.5;");
    assert_eq!(ctx.termination_reason(), Some(TerminationReason::TermChar));

    ctx.set_term_char(None);
    let len = device.read(&mut ctx, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"2.5");
    assert_eq!(ctx.termination_reason(), Some(TerminationReason::End));
}

#[test]
fn small_buffer_reports_requested_count() {
    let (_connector, controller) = controller("inst0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();

    device.write(&mut ctx, b"abcdef").unwrap();
    let mut buf = [0; 4];
    assert_eq!(device.read(&mut ctx, &mut buf).unwrap(), 4);
    assert_eq!(
        ctx.termination_reason(),
        Some(TerminationReason::RequestedCount)
    );
    assert_eq!(device.read(&mut ctx, &mut buf).unwrap(), 2);
    assert_eq!(ctx.termination_reason(), Some(TerminationReason::End));
}

#[test]
fn read_without_response_times_out() {
    let (_connector, controller) = controller("inst0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();

    ctx.set_io_timeout(std::time::Duration::from_millis(20));
    let mut buf = [0; 4];
    let err = device.read(&mut ctx, &mut buf).unwrap_err();
    assert_eq!(err.code(), ErrorCode::IoTimeout);
    assert!(err.code().is_retryable());
    assert_eq!(ctx.error_code(), ErrorCode::IoTimeout);
    assert_eq!(ctx.bytes_transferred(), 0);
}

#[test]
fn status_byte_and_generic_operations() {
    let (connector, controller) = controller("inst0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();

    let idle = device.read_status_byte(&mut ctx).unwrap();
    device.write(&mut ctx, b"*idn?").unwrap();
    let pending = device.read_status_byte(&mut ctx).unwrap();
    assert_ne!(idle, pending);

    device.clear(&mut ctx).unwrap();
    assert_eq!(device.read_status_byte(&mut ctx).unwrap(), idle);
    device.trigger(&mut ctx).unwrap();
    device.remote(&mut ctx).unwrap();
    device.local(&mut ctx).unwrap();

    let instrument = connector.instrument();
    assert_eq!(instrument.calls(Procedure::DeviceClear), 1);
    assert_eq!(instrument.calls(Procedure::DeviceTrigger), 1);
    assert_eq!(instrument.calls(Procedure::DeviceRemote), 1);
    assert_eq!(instrument.calls(Procedure::DeviceLocal), 1);
}

#[test]
fn remote_enable_is_shared() {
    let (connector, controller) = controller("gpib0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::primary(5))
        .unwrap();

    controller.set_remote_enable(&mut ctx, true).unwrap();
    assert!(controller.remote_enable());
    assert!(device.remote_enable());
    assert!(connector.instrument().remote_enable());

    controller.set_remote_enable(&mut ctx, false).unwrap();
    assert!(!device.remote_enable());
    assert!(!connector.instrument().remote_enable());
}

#[test]
fn create_device_when_disconnected_does_no_io() {
    let (connector, controller) = controller("inst0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    let err = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ChannelNotEstablished);
    assert_eq!(ctx.error_code(), ErrorCode::ChannelNotEstablished);
    assert_eq!(connector.invocations(), 0);

    let err = controller.set_remote_enable(&mut ctx, true).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ChannelNotEstablished);
    assert_eq!(connector.invocations(), 0);
}

#[test]
fn invalid_address_does_no_io() {
    let (connector, controller) = controller("gpib0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let before = connector.invocations();

    for address in [DeviceAddress::primary(31), DeviceAddress::with_secondary(1, 31)] {
        let err = controller.create_device(&mut ctx, address).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAddress);
    }
    assert_eq!(connector.invocations(), before);
}

#[test]
fn refused_link_is_out_of_resources() {
    let config = InstrumentConfig {
        max_links: 2,
        ..Default::default()
    };
    let (connector, controller) = controller("inst0", config);
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let _first = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();
    let err = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OutOfResources);
    assert_eq!(connector.instrument().link_count(), 2);
}

#[test]
fn disconnect_twice_is_noop() {
    let (connector, controller) = controller("inst0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();
    let instrument = connector.instrument();

    device.disconnect();
    assert!(!device.is_connected());
    assert_eq!(instrument.link_count(), 1);
    let invocations = connector.invocations();
    device.disconnect();
    assert_eq!(connector.invocations(), invocations);

    controller.disconnect();
    assert!(!controller.is_connected());
    assert_eq!(instrument.link_count(), 0);
    controller.disconnect();
    assert_eq!(connector.invocations(), invocations + 1);
    assert_eq!(instrument.calls(Procedure::DestroyLink), 2);
}

#[test]
fn links_outlive_controller_connection() {
    let (connector, controller) = controller("inst0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();

    controller.disconnect();
    assert_eq!(connector.instrument().link_count(), 1);
    let invocations = connector.invocations();
    for result in [
        device.write(&mut ctx, b"*idn?").map(|_| ()),
        device.read(&mut ctx, &mut [0; 8]).map(|_| ()),
        device.lock(&mut ctx),
        device.trigger(&mut ctx),
        device.connect(&mut ctx),
    ] {
        let err = result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChannelNotEstablished);
        assert!(err.code().requires_new_link());
    }
    assert_eq!(connector.invocations(), invocations);

    drop(device);
    assert_eq!(connector.instrument().link_count(), 0);
}

#[test]
fn reconnect_link() {
    let (connector, controller) = controller("inst0", InstrumentConfig::default());
    let mut ctx = CallContext::new();
    controller.connect(&mut ctx).unwrap();
    let device = controller
        .create_device(&mut ctx, DeviceAddress::symbolic())
        .unwrap();
    let first = device.link_id();

    device.disconnect();
    let err = device.write(&mut ctx, b"*idn?").unwrap_err();
    assert_eq!(err.code(), ErrorCode::ChannelNotEstablished);

    device.connect(&mut ctx).unwrap();
    assert!(device.is_connected());
    assert_ne!(device.link_id(), first);
    device.connect(&mut ctx).unwrap();
    assert_eq!(connector.instrument().link_count(), 2);
}

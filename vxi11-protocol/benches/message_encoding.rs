use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use vxi11_protocol::codec::{Decode, Encode};
use vxi11_protocol::rpc::{self, CallHeader};
use vxi11_protocol::{
    DEVICE_CORE, DEVICE_CORE_VERSION, DeviceErrorCode, DeviceFlags, DeviceReadResp,
    DeviceWriteParms, LinkId, Procedure, ReadReason,
};

fn encode_write_request(c: &mut Criterion) {
    let parms = DeviceWriteParms {
        lid: LinkId(1),
        io_timeout: 1000,
        lock_timeout: 0,
        flags: DeviceFlags::END,
        data: vec![0x5A; 4096],
    };
    let header = CallHeader {
        xid: 1,
        program: DEVICE_CORE,
        version: DEVICE_CORE_VERSION,
        procedure: Procedure::DeviceWrite.number(),
    };
    c.bench_function("encode device_write 4 KiB", |b| {
        b.iter(|| {
            let mut message = Vec::with_capacity(4200);
            black_box(&header).write_to(&mut message).unwrap();
            black_box(&parms).write_to(&mut message).unwrap();
            let mut record = Vec::with_capacity(4204);
            rpc::write_record(&mut record, &message).unwrap();
            record
        })
    });
}

fn decode_read_reply(c: &mut Criterion) {
    let bytes = DeviceReadResp {
        error: DeviceErrorCode::NoError,
        reason: ReadReason::END,
        data: vec![0xA5; 4096],
    }
    .to_bytes()
    .unwrap();
    c.bench_function("decode device_read reply 4 KiB", |b| {
        b.iter(|| DeviceReadResp::from_bytes(black_box(&bytes)).unwrap())
    });
}

criterion_group!(benches, encode_write_request, decode_read_reply);
criterion_main!(benches);

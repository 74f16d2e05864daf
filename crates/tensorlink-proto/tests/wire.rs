use tensorlink_proto::{
    decode_command, decode_graph, decode_response, encode_command, encode_graph, encode_response,
    BufferHandle, CmdKind, CmdRequest, CmdResponse, CorrelationId, GraphDesc, ProtoError,
    ResultLocation, TensorFlags, TensorHandle, TensorRecord, CMD_ARGS_OFFSET, CMD_BUFFER_SIZE,
    CMD_KIND_OFFSET, GRAPH_HEADER_SIZE,
};

#[test]
fn command_frame_layout() {
    let id = CorrelationId::from_bytes([0xAB; 16]);
    let req = CmdRequest::SetTensor {
        buffer: BufferHandle(0x11),
        tensor: TensorHandle(0x22),
        device_ptr: 0x3000,
        size: 0x40,
    };
    let frame = encode_command(&id, &req);

    assert_eq!(frame.len(), CMD_BUFFER_SIZE);
    assert_eq!(&frame[..16], &[0xAB; 16]);
    assert_eq!(
        u32::from_le_bytes(frame[CMD_KIND_OFFSET..CMD_KIND_OFFSET + 4].try_into().unwrap()),
        CmdKind::SetTensor as u32
    );
    // Kind slot is padded to 8 bytes before the first argument.
    assert_eq!(&frame[CMD_KIND_OFFSET + 4..CMD_ARGS_OFFSET], &[0; 4]);
    assert_eq!(
        u64::from_le_bytes(frame[CMD_ARGS_OFFSET..CMD_ARGS_OFFSET + 8].try_into().unwrap()),
        0x11
    );
    assert_eq!(
        u64::from_le_bytes(frame[CMD_ARGS_OFFSET + 24..CMD_ARGS_OFFSET + 32].try_into().unwrap()),
        0x40
    );
}

#[test]
fn every_command_kind_round_trips() {
    let reqs = [
        CmdRequest::AllocBuffer { buffer: BufferHandle(1), device_ptr: 0x1000, size: 4096 },
        CmdRequest::GetAlignment,
        CmdRequest::GetMaxSize,
        CmdRequest::BufferGetBase,
        CmdRequest::FreeBuffer { buffer: BufferHandle(1), device_ptr: 0x1000, size: 4096 },
        CmdRequest::BufferClear { device_ptr: 0x2000, size: 512, value: 0xCC },
        CmdRequest::InitTensor { device_ptr: 0x4000, size: 304 },
        CmdRequest::SetTensor {
            buffer: BufferHandle(2),
            tensor: TensorHandle(7),
            device_ptr: 0x5000,
            size: 128,
        },
        CmdRequest::GetTensor,
        CmdRequest::MemsetTensor {
            buffer: BufferHandle(2),
            tensor: TensorHandle(7),
            value: 0,
            offset: 16,
            size: 64,
        },
        CmdRequest::CopyTensor {
            buffer: BufferHandle(2),
            src: TensorHandle(7),
            dst: TensorHandle(8),
        },
        CmdRequest::GraphCompute { device_ptr: 0x6000, size: 76 },
        CmdRequest::GetDeviceMemory,
    ];

    for req in reqs {
        let id = CorrelationId::generate();
        let frame = encode_command(&id, &req);
        let (got_id, got_req) = decode_command(&frame).unwrap();
        assert_eq!(got_id, id);
        assert_eq!(got_req, req, "kind {:?}", req.kind());
    }
}

#[test]
fn unknown_command_tag_rejected() {
    let mut frame = encode_command(&CorrelationId::generate(), &CmdRequest::GetAlignment);
    frame[CMD_KIND_OFFSET..CMD_KIND_OFFSET + 4].copy_from_slice(&99u32.to_le_bytes());
    assert!(matches!(decode_command(&frame), Err(ProtoError::UnknownCommand(99))));
}

#[test]
fn short_command_frame_rejected() {
    let err = decode_command(&[0u8; 100]).unwrap_err();
    assert!(matches!(err, ProtoError::ShortBuffer { need: CMD_BUFFER_SIZE, got: 100 }));
}

#[test]
fn response_round_trip_with_result() {
    let rsp = CmdResponse {
        id: CorrelationId::generate(),
        status: 0,
        result: Some(ResultLocation { device_addr: 0x9000, size: 8 }),
    };
    let frame = encode_response(&rsp);
    assert_eq!(decode_response(&frame, true).unwrap(), rsp);
}

#[test]
fn response_result_skipped_when_not_expected() {
    let rsp = CmdResponse {
        id: CorrelationId::generate(),
        status: -3,
        result: Some(ResultLocation { device_addr: 0x9000, size: 8 }),
    };
    let frame = encode_response(&rsp);
    let got = decode_response(&frame, false).unwrap();
    assert_eq!(got.status, -3);
    assert!(got.result.is_none());
}

#[test]
fn tensor_record_wire_size_fixed() {
    assert_eq!(TensorRecord::WIRE_SIZE, 304);
    let rec = TensorRecord::default();
    assert_eq!(rec.encode().len(), 304);
}

#[test]
fn tensor_record_round_trip() {
    let mut rec = TensorRecord {
        id: TensorHandle(0xDEAD_BEEF),
        dtype: 1,
        buffer: BufferHandle(42),
        ne: [16, 8, 4, 1],
        nb: [4, 64, 512, 2048],
        op: 23,
        op_params: [0; 16],
        flags: TensorFlags::INPUT | TensorFlags::PARAM,
        src: [TensorHandle(0); 10],
        view_src: TensorHandle(0x77),
        view_offs: 256,
        data: 0x0010_2000,
        data_size: 2048,
        name: [0; 64],
    };
    rec.op_params[0] = -5;
    rec.op_params[15] = i32::MAX;
    rec.src[0] = TensorHandle(0xA1);
    rec.src[9] = TensorHandle(0xA9);
    rec.set_name("blk.0.attn_q.weight");

    let buf = rec.encode();
    let got = TensorRecord::decode(&buf).unwrap();
    assert_eq!(got, rec);
    assert_eq!(got.name_str(), "blk.0.attn_q.weight");
}

#[test]
fn tensor_name_truncated_with_nul() {
    let mut rec = TensorRecord::default();
    rec.set_name(&"x".repeat(200));
    assert_eq!(rec.name_str().len(), 63);
    assert_eq!(rec.name[63], 0);
}

#[test]
fn tensor_record_short_buffer_rejected() {
    let err = TensorRecord::decode(&[0u8; 64]).unwrap_err();
    assert!(matches!(err, ProtoError::ShortBuffer { need: 304, got: 64 }));
}

#[test]
fn graph_payload_layout() {
    let graph = GraphDesc {
        nodes: vec![TensorHandle(10), TensorHandle(11)],
        leafs: vec![TensorHandle(1)],
        has_grads: true,
    };
    let buf = encode_graph(&graph);

    assert_eq!(buf.len(), GRAPH_HEADER_SIZE + 3 * 8);
    assert_eq!(i32::from_le_bytes(buf[0..4].try_into().unwrap()), 2);
    assert_eq!(i32::from_le_bytes(buf[4..8].try_into().unwrap()), 1);
    assert_eq!(i32::from_le_bytes(buf[8..12].try_into().unwrap()), 1);
    assert_eq!(u64::from_le_bytes(buf[12..20].try_into().unwrap()), 10);
    assert_eq!(u64::from_le_bytes(buf[28..36].try_into().unwrap()), 1);

    assert_eq!(decode_graph(&buf).unwrap(), graph);
}

#[test]
fn empty_graph_round_trips() {
    let graph = GraphDesc::default();
    let buf = encode_graph(&graph);
    assert_eq!(buf.len(), GRAPH_HEADER_SIZE);
    assert_eq!(decode_graph(&buf).unwrap(), graph);
}

#[test]
fn graph_negative_counts_rejected() {
    let mut buf = vec![0u8; GRAPH_HEADER_SIZE];
    buf[0..4].copy_from_slice(&(-1i32).to_le_bytes());
    assert!(matches!(decode_graph(&buf), Err(ProtoError::BadGraphHeader)));
}

#[test]
fn graph_truncated_ids_rejected() {
    let graph = GraphDesc {
        nodes: vec![TensorHandle(10), TensorHandle(11)],
        leafs: vec![],
        has_grads: false,
    };
    let buf = encode_graph(&graph);
    assert!(matches!(
        decode_graph(&buf[..buf.len() - 4]),
        Err(ProtoError::ShortBuffer { .. })
    ));
}

#[test]
fn correlation_ids_distinct() {
    let a = CorrelationId::generate();
    let b = CorrelationId::generate();
    assert_ne!(a, b);
    assert_eq!(a.as_bytes().len(), 16);
}

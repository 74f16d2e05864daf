//! One accelerator: its transport endpoints, its memory mirror, and the
//! synchronous command machine that drives it.

use tensorlink_heap::{DeviceHeap, HeapRegion};
use tensorlink_proto::{
    decode_response, encode_command, encode_graph, BufferHandle, CmdKind, CmdRequest,
    CorrelationId, GraphDesc, TensorHandle, TensorRecord, CMD_BUFFER_SIZE,
};
use tensorlink_xdma::{DeviceIrq, EventChannel, MmioDeviceIrq, XferChannel};
use tracing::{debug, trace, warn};

use crate::{DeviceConfig, HandleAllocator, HostError};

/// A buffer carved from the device arena. The base address is real device
/// memory; the handle is what crosses the wire as the buffer's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub handle: BufferHandle,
    pub base: u64,
    pub size: u64,
}

pub struct BackendDevice {
    id: usize,
    name: String,
    description: String,
    heap: DeviceHeap,
    h2c: XferChannel,
    c2h: XferChannel,
    events: EventChannel,
    irq: Box<dyn DeviceIrq>,
    handles: HandleAllocator,
    config: DeviceConfig,
}

impl BackendDevice {
    /// Opens the real device nodes named in `config`.
    pub fn open(id: usize, config: DeviceConfig) -> Result<Self, HostError> {
        let events = EventChannel::open(&config.event_path)?;
        let irq = Box::new(MmioDeviceIrq::open(config.reg_base)?);
        let h2c = XferChannel::new(&config.h2c_path);
        let c2h = XferChannel::new(&config.c2h_path);
        Ok(Self::from_parts(id, config, h2c, c2h, events, irq))
    }

    /// Assembles a device from pre-built transports, so tests can stand in
    /// a scripted device for the hardware.
    pub fn from_parts(
        id: usize,
        config: DeviceConfig,
        h2c: XferChannel,
        c2h: XferChannel,
        events: EventChannel,
        irq: Box<dyn DeviceIrq>,
    ) -> Self {
        let mut heap = DeviceHeap::new(config.alignment);
        heap.define_regions(&[HeapRegion { start: config.buffer_base, size: config.buffer_size }]);
        BackendDevice {
            id,
            name: format!("TENSORLINK-DEV{id}"),
            description: "TensorLink PCIe accelerator".to_string(),
            heap,
            h2c,
            c2h,
            events,
            irq,
            handles: HandleAllocator::new(),
            config,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Issues the wire identity for a tensor about to be registered.
    pub fn issue_tensor_handle(&mut self) -> TensorHandle {
        self.handles.next_tensor()
    }

    /// Free and total bytes of the device arena, from the local mirror.
    pub fn device_memory(&self) -> (u64, u64) {
        (self.heap.free_bytes(), self.heap.total_bytes())
    }

    // ---- backend operations ------------------------------------------

    /// Carves `size` bytes out of the device arena and registers the
    /// buffer with the device.
    ///
    /// # Panics
    ///
    /// Panics when the arena is exhausted; sizing the arena is a
    /// configuration decision, not a runtime condition.
    pub fn alloc_buffer(&mut self, size: u64) -> Result<DeviceBuffer, HostError> {
        let base = self.heap.alloc(size);
        let handle = self.handles.next_buffer();
        let req = CmdRequest::AllocBuffer { buffer: handle, device_ptr: base, size };
        if let Err(e) = self.submit_ok(&req) {
            self.heap.free(base);
            return Err(e);
        }
        Ok(DeviceBuffer { handle, base, size })
    }

    /// Releases a buffer on the device and returns its bytes to the arena.
    pub fn free_buffer(&mut self, buffer: DeviceBuffer) -> Result<(), HostError> {
        let req = CmdRequest::FreeBuffer {
            buffer: buffer.handle,
            device_ptr: buffer.base,
            size: buffer.size,
        };
        self.submit_ok(&req)?;
        self.heap.free(buffer.base);
        Ok(())
    }

    pub fn clear_buffer(&mut self, buffer: &DeviceBuffer, value: u8) -> Result<(), HostError> {
        let req = CmdRequest::BufferClear {
            device_ptr: buffer.base,
            size: buffer.size,
            value: value as u64,
        };
        self.submit_ok(&req)
    }

    /// Registers a tensor with the device. The record is staged into
    /// device memory so the command frame carries only its location.
    pub fn init_tensor(&mut self, record: &TensorRecord) -> Result<(), HostError> {
        let payload = record.encode();
        self.submit_staged(&payload, |device_ptr, size| CmdRequest::InitTensor {
            device_ptr,
            size,
        })
    }

    /// Uploads `data` into the tensor's storage at `offset`, then tells
    /// the device which range changed.
    pub fn set_tensor(
        &mut self,
        buffer: &DeviceBuffer,
        record: &TensorRecord,
        data: &[u8],
        offset: u64,
    ) -> Result<(), HostError> {
        let dst = record.data + offset;
        self.h2c.write_at(dst, data)?;
        let req = CmdRequest::SetTensor {
            buffer: buffer.handle,
            tensor: record.id,
            device_ptr: dst,
            size: data.len() as u64,
        };
        self.submit_ok(&req)
    }

    /// Downloads tensor bytes straight out of device storage. No command
    /// round-trip: the storage address is already known on this side.
    pub fn get_tensor(
        &mut self,
        record: &TensorRecord,
        out: &mut [u8],
        offset: u64,
    ) -> Result<(), HostError> {
        self.c2h.read_at(record.data + offset, out)?;
        Ok(())
    }

    pub fn memset_tensor(
        &mut self,
        buffer: &DeviceBuffer,
        record: &TensorRecord,
        value: u8,
        offset: u64,
        size: u64,
    ) -> Result<(), HostError> {
        let req = CmdRequest::MemsetTensor {
            buffer: buffer.handle,
            tensor: record.id,
            value: value as u64,
            offset,
            size,
        };
        self.submit_ok(&req)
    }

    pub fn copy_tensor(
        &mut self,
        buffer: &DeviceBuffer,
        src: &TensorRecord,
        dst: &TensorRecord,
    ) -> Result<(), HostError> {
        let req = CmdRequest::CopyTensor { buffer: buffer.handle, src: src.id, dst: dst.id };
        self.submit_ok(&req)
    }

    /// Ships a graph description to the device and blocks until the whole
    /// graph has been evaluated.
    pub fn graph_compute(&mut self, graph: &GraphDesc) -> Result<(), HostError> {
        let payload = encode_graph(graph);
        self.submit_staged(&payload, |device_ptr, size| CmdRequest::GraphCompute {
            device_ptr,
            size,
        })
    }

    /// Asks the device for its required buffer alignment.
    pub fn remote_alignment(&mut self) -> Result<u64, HostError> {
        self.query_u64(CmdRequest::GetAlignment)
    }

    /// Asks the device for the largest single buffer it accepts.
    pub fn remote_max_size(&mut self) -> Result<u64, HostError> {
        self.query_u64(CmdRequest::GetMaxSize)
    }

    /// Asks the device for the base address of its buffer arena.
    pub fn remote_buffer_base(&mut self) -> Result<u64, HostError> {
        self.query_u64(CmdRequest::BufferGetBase)
    }

    /// Asks the device for its own (free, total) memory accounting.
    pub fn remote_device_memory(&mut self) -> Result<(u64, u64), HostError> {
        let mut out = [0u8; 16];
        let status = self.submit(&CmdRequest::GetDeviceMemory, Some(&mut out))?;
        check(CmdKind::GetDeviceMemory, status)?;
        let free = u64::from_le_bytes(out[..8].try_into().unwrap());
        let total = u64::from_le_bytes(out[8..].try_into().unwrap());
        Ok((free, total))
    }

    // ---- command machine ---------------------------------------------

    fn query_u64(&mut self, req: CmdRequest) -> Result<u64, HostError> {
        let mut out = [0u8; 8];
        let status = self.submit(&req, Some(&mut out))?;
        check(req.kind(), status)?;
        Ok(u64::from_le_bytes(out))
    }

    fn submit_ok(&mut self, req: &CmdRequest) -> Result<(), HostError> {
        let status = self.submit(req, None)?;
        check(req.kind(), status)
    }

    /// Stages `payload` into the device arena, sends the command built
    /// over its location, and releases the staging block. The device
    /// consumes staged payloads before raising completion, so the release
    /// is safe immediately after the response.
    fn submit_staged(
        &mut self,
        payload: &[u8],
        build: impl FnOnce(u64, u64) -> CmdRequest,
    ) -> Result<(), HostError> {
        let addr = self.heap.alloc(payload.len() as u64);
        let req = build(addr, payload.len() as u64);
        let result = self
            .h2c
            .write_at(addr, payload)
            .map_err(HostError::from)
            .and_then(|()| self.submit_ok(&req));
        self.heap.free(addr);
        result
    }

    /// One full command round-trip: frame, transmit, doorbell, wait,
    /// acknowledge, receive, decode, and (when expected) DMA the result
    /// payload into `output`. Returns the device's status word.
    fn submit(
        &mut self,
        req: &CmdRequest,
        mut output: Option<&mut [u8]>,
    ) -> Result<i32, HostError> {
        let id = CorrelationId::generate();
        let frame = encode_command(&id, req);
        debug!(%id, kind = ?req.kind(), "dispatching command");

        self.h2c.write_at(self.config.cmd_send_addr(), &frame)?;
        self.irq.trigger();
        let cause = self.events.wait(self.config.wait_timeout)?;
        self.irq.clear();
        trace!(cause, "command completion interrupt");

        let mut rsp_buf = [0u8; CMD_BUFFER_SIZE];
        self.c2h.read_at(self.config.cmd_recv_addr(), &mut rsp_buf)?;
        let rsp = decode_response(&rsp_buf, output.is_some())?;
        if rsp.id != id {
            warn!(sent = %id, received = %rsp.id, "response correlation id mismatch");
        }

        if let (Some(out), Some(loc)) = (output.as_deref_mut(), rsp.result) {
            if loc.size as usize != out.len() {
                warn!(expected = out.len(), actual = loc.size, "result size mismatch");
            }
            let n = out.len().min(loc.size as usize);
            if n > 0 {
                self.c2h.read_at(loc.device_addr, &mut out[..n])?;
            }
        }

        Ok(rsp.status)
    }
}

fn check(kind: CmdKind, status: i32) -> Result<(), HostError> {
    if status != 0 {
        return Err(HostError::Device { kind, status });
    }
    Ok(())
}

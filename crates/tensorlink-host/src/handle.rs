use tensorlink_proto::{BufferHandle, TensorHandle};

/// Issues wire handles for buffers and tensors. Handles are opaque
/// monotonic tokens; the device correlates them against its own records
/// and never interprets them as addresses. Zero is reserved as "no
/// handle".
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        HandleAllocator { next: 0 }
    }

    fn bump(&mut self) -> u64 {
        self.next += 1;
        self.next
    }

    pub fn next_buffer(&mut self) -> BufferHandle {
        BufferHandle(self.bump())
    }

    pub fn next_tensor(&mut self) -> TensorHandle {
        TensorHandle(self.bump())
    }
}

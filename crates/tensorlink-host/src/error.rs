use tensorlink_proto::{CmdKind, ProtoError};
use tensorlink_xdma::DmaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    /// The device answered the command with a nonzero status word.
    #[error("device reported status {status} for {kind:?}")]
    Device { kind: CmdKind, status: i32 },

    #[error(transparent)]
    Dma(#[from] DmaError),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

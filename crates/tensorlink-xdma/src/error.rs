use std::io;

use thiserror::Error;

/// Transport-layer failures. Short transfers are surfaced as
/// [`DmaError::Underflow`] so callers never act on partial data.
#[derive(Debug, Error)]
pub enum DmaError {
    #[error("dma transfer moved {completed} of {requested} bytes")]
    Underflow { requested: usize, completed: usize },

    #[error("interrupt wait timed out after {0:?}")]
    IrqTimeout(std::time::Duration),

    #[error("dma i/o failed")]
    Io(#[from] io::Error),
}

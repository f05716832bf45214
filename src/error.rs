//! Error types for host-facing operations
//!
//! Nothing on the audio path returns these. They surface only from calls a
//! host makes while configuring the instrument: addressing parameters by name
//! or flat index, and handing over sample data.

use thiserror::Error;

/// Errors raised by instrument configuration APIs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SynthError {
    /// A parameter name that does not map to any control
    #[error("unknown parameter `{0}`")]
    UnknownParam(String),

    /// An oscillator, filter, sampler, slot or macro index past its bank size
    #[error("{section} index {index} out of range (bank holds {len})")]
    IndexOutOfRange {
        section: &'static str,
        index: usize,
        len: usize,
    },

    /// A position in the flat parameter layout past its end
    #[error("flat parameter index {0} out of range")]
    FlatIndexOutOfRange(usize),

    /// Sample data that cannot be interpreted at all
    #[error("invalid sample data: {0}")]
    InvalidSampleData(String),
}

/// Check `index` against a bank length
pub(crate) fn check_index(
    section: &'static str,
    index: usize,
    len: usize,
) -> Result<usize, SynthError> {
    if index < len {
        Ok(index)
    } else {
        Err(SynthError::IndexOutOfRange {
            section,
            index,
            len,
        })
    }
}

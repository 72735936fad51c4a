// Errors for the core, its protocol and the host side tooling.

use crate::data::Addr;
use crate::vm::Status;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Code,
    Data,
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Space::Code => write!(f, "code"),
            Space::Data => write!(f, "data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("stack underflow at pc {pc:#04x}")]
    StackUnderflow { pc: Addr },
    #[error("stack overflow at pc {pc:#04x} (depth {depth})")]
    StackOverflow { pc: Addr, depth: usize },
    #[error("{space} address {addr:#04x} out of range (size {size})")]
    AddressOutOfRange { space: Space, addr: Addr, size: usize },
    #[error("core is not ready for commands ({0:?})")]
    NotReady(Status),
    #[error("no register at select index {0}")]
    InvalidRegister(u8),
    #[error("core did not stop within {0} cycles")]
    Timeout(u64),
    #[error("program of {len} bytes does not fit in {size} bytes of code memory")]
    ProgramTooLarge { len: usize, size: usize },
    #[error("config error: {0}")]
    Config(String),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

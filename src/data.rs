// Data types and constants

use std::fmt;

// Type aliases for readability ///////////////////////////////////////////////
pub type Cell = u8;
pub type Addr = u8;
pub type OpCode = u8;

// Opcodes ////////////////////////////////////////////////////////////////////

// The operators are printable characters so programs can be written as text.
// Any byte that is not in this set is a literal and gets pushed as is, which
// is why the raw bytes are kept as constants next to the decoded Op below.

// Arithmetic
pub const ADD: OpCode = b'+';
pub const SUBTRACT: OpCode = b'-';
// Bits
pub const BITAND: OpCode = b'&';
pub const BITOR: OpCode = b'|';
pub const BITXOR: OpCode = b'^';
pub const RSHIFT: OpCode = b'>';
pub const LSHIFT: OpCode = b'<';
// Stack
pub const DUP: OpCode = b'2';
pub const EXCHANGE: OpCode = b'x';
// Control Flow
pub const JUMP: OpCode = b'=';
pub const LOOP: OpCode = b'@';
// Code memory
pub const CODEREAD: OpCode = b'?';
pub const CODEWRITE: OpCode = b'!';
// Data memory and I/O
pub const DATAWRITE: OpCode = b'w';
pub const DATAREAD: OpCode = b'r';
// Timing and stopping
pub const DELAY: OpCode = b',';
pub const SLEEP: OpCode = b'z';
pub const HALT: OpCode = 0xff;

// Register shift interface ///////////////////////////////////////////////////
pub const REG_PC: u8 = 0;
pub const REG_SP: u8 = 1;
pub const REG_EXEC: u8 = 2;
pub const REG_STACK_TOP: u8 = 3;

// Memory mapped I/O //////////////////////////////////////////////////////////
//
// Same layout as the classic AVR port registers. Writing PIN toggles PORT.
pub const IO_PIN: Addr = 0x36;
pub const IO_DDR: Addr = 0x37;
pub const IO_PORT: Addr = 0x38;

// Decoded operators //////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Push(Cell),
    Add,
    Subtract,
    BitAnd,
    BitOr,
    BitXor,
    RShift,
    LShift,
    Dup,
    Exchange,
    Jump,
    Loop,
    CodeRead,
    CodeWrite,
    DataWrite,
    DataRead,
    Delay,
    Sleep,
    Halt,
}

impl Op {
    pub fn decode(byte: OpCode) -> Op {
        match byte {
            ADD => Op::Add,
            SUBTRACT => Op::Subtract,
            BITAND => Op::BitAnd,
            BITOR => Op::BitOr,
            BITXOR => Op::BitXor,
            RSHIFT => Op::RShift,
            LSHIFT => Op::LShift,
            DUP => Op::Dup,
            EXCHANGE => Op::Exchange,
            JUMP => Op::Jump,
            LOOP => Op::Loop,
            CODEREAD => Op::CodeRead,
            CODEWRITE => Op::CodeWrite,
            DATAWRITE => Op::DataWrite,
            DATAREAD => Op::DataRead,
            DELAY => Op::Delay,
            SLEEP => Op::Sleep,
            HALT => Op::Halt,
            literal => Op::Push(literal),
        }
    }

    pub fn byte(self) -> OpCode {
        match self {
            Op::Push(literal) => literal,
            Op::Add => ADD,
            Op::Subtract => SUBTRACT,
            Op::BitAnd => BITAND,
            Op::BitOr => BITOR,
            Op::BitXor => BITXOR,
            Op::RShift => RSHIFT,
            Op::LShift => LSHIFT,
            Op::Dup => DUP,
            Op::Exchange => EXCHANGE,
            Op::Jump => JUMP,
            Op::Loop => LOOP,
            Op::CodeRead => CODEREAD,
            Op::CodeWrite => CODEWRITE,
            Op::DataWrite => DATAWRITE,
            Op::DataRead => DATAREAD,
            Op::Delay => DELAY,
            Op::Sleep => SLEEP,
            Op::Halt => HALT,
        }
    }

    pub fn is_operator(byte: OpCode) -> bool {
        !matches!(Op::decode(byte), Op::Push(_))
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Push(literal) => write!(f, "push {}", literal),
            Op::Halt => write!(f, "halt"),
            op => write!(f, "'{}'", op.byte() as char),
        }
    }
}

use crate::data::{REG_EXEC, REG_PC, REG_SP, REG_STACK_TOP};
use crate::error::CoreError;
use crate::vm::Signals;

// Register Shift Interface ///////////////////////////////////////////////////
//
// Values move one bit per clock, MSB first. Shifting in happens on every
// clock that is not a load or dump, so the input register always holds the
// last 8 bits seen. A load clock latches it into the selected register. A
// dump clock captures the selected register and the next 8 clocks put its
// bits out.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Pc,
    Sp,
    Exec,
    StackTop,
}

impl Register {
    pub fn index(self) -> u8 {
        match self {
            Register::Pc => REG_PC,
            Register::Sp => REG_SP,
            Register::Exec => REG_EXEC,
            Register::StackTop => REG_STACK_TOP,
        }
    }
}

impl TryFrom<u8> for Register {
    type Error = CoreError;

    fn try_from(select: u8) -> Result<Self, Self::Error> {
        match select {
            REG_PC => Ok(Register::Pc),
            REG_SP => Ok(Register::Sp),
            REG_EXEC => Ok(Register::Exec),
            REG_STACK_TOP => Ok(Register::StackTop),
            other => Err(CoreError::InvalidRegister(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShiftState {
    #[default]
    Idle,
    // bits shifted in since the last transfer, saturating at 8
    ShiftingIn(u8),
    Latching,
    // bits already put out
    ShiftingOut(u8),
}

// A transfer request for the core to resolve. The select is passed through
// raw so the core decides what to do with a bad one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Load { select: u8, value: u8, bits: u8 },
    Dump { select: u8 },
}

#[derive(Debug, Default)]
pub struct ShiftPort {
    state: ShiftState,
    input: u8,
    output: u8,
    out_bit: bool,
}

impl ShiftPort {
    pub fn new() -> ShiftPort {
        ShiftPort::default()
    }

    pub fn reset(&mut self) {
        *self = ShiftPort::default();
    }

    pub fn state(&self) -> ShiftState {
        self.state
    }

    pub fn shift_out(&self) -> bool {
        self.out_bit
    }

    pub fn clock(&mut self, signals: &Signals) -> Option<Transfer> {
        if signals.load {
            let bits = match self.state {
                ShiftState::ShiftingIn(n) => n,
                _ => 0,
            };
            self.state = ShiftState::Latching;
            return Some(Transfer::Load {
                select: signals.reg_sel,
                value: self.input,
                bits: bits,
            });
        }
        if signals.dump {
            // stays idle and low unless the core accepts and calls begin_dump
            self.state = ShiftState::Idle;
            self.out_bit = false;
            return Some(Transfer::Dump {
                select: signals.reg_sel,
            });
        }

        match self.state {
            ShiftState::ShiftingOut(n) => {
                self.out_bit = (self.output >> (7 - n)) & 1 == 1;
                self.state = if n + 1 == 8 {
                    ShiftState::Idle
                } else {
                    ShiftState::ShiftingOut(n + 1)
                };
            }
            ShiftState::ShiftingIn(n) => {
                self.shift_in(signals.shift_in);
                self.state = ShiftState::ShiftingIn((n + 1).min(8));
            }
            ShiftState::Idle | ShiftState::Latching => {
                self.shift_in(signals.shift_in);
                self.state = ShiftState::ShiftingIn(1);
            }
        }
        None
    }

    pub fn begin_dump(&mut self, value: u8) {
        self.output = value;
        self.state = ShiftState::ShiftingOut(0);
    }

    fn shift_in(&mut self, bit: bool) {
        self.input = (self.input << 1) | bit as u8;
    }
}

use crate::bus::DataBus;
use crate::data::{CODEWRITE, OpCode};
use crate::error::{CoreError, Result};
use crate::shift::Register;
use crate::vm::{Core, Outputs, Signals};

// Controller /////////////////////////////////////////////////////////////////
//
// The host side of the debug protocol. Everything here goes through the pins
// one clock at a time, the same sequences a board or a test bench would
// drive. Waits are bounded by max_wait_cycles so a program that never stops
// comes back as a Timeout instead of a hang.

#[derive(Debug)]
pub struct Controller<B: DataBus> {
    core: Core<B>,
    signals: Signals,
    max_wait_cycles: u64,
}

impl<B: DataBus> Controller<B> {
    pub fn new(core: Core<B>, max_wait_cycles: u64) -> Controller<B> {
        Controller {
            core: core,
            signals: Signals::default(),
            max_wait_cycles: max_wait_cycles,
        }
    }

    pub fn core(&self) -> &Core<B> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Core<B> {
        &mut self.core
    }

    pub fn into_core(self) -> Core<B> {
        self.core
    }

    fn clock(&mut self) -> Outputs {
        self.core.clock(self.signals)
    }

    pub fn reset(&mut self) {
        self.signals = Signals::default();
        self.core.reset();
    }

    // Clock with all inputs low.
    pub fn idle(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.clock();
        }
    }

    pub fn ensure_stopped(&mut self) -> Result<()> {
        let mut waited = 0;
        while !self.core.outputs().ready {
            if waited >= self.max_wait_cycles {
                return Err(CoreError::Timeout(waited));
            }
            self.clock();
            waited += 1;
        }
        Ok(())
    }

    pub fn sleeping(&self) -> bool {
        self.core.outputs().sleeping
    }

    pub fn waiting_on_delay(&self) -> bool {
        self.core.outputs().wait_delay
    }

    // Register transfers /////////////////////////////////////////////////////

    pub fn write_reg(&mut self, reg: Register, value: u8) {
        for i in 0..8 {
            self.signals.shift_in = (value >> (7 - i)) & 1 == 1;
            self.clock();
        }
        self.signals.reg_sel = reg.index();
        self.signals.load = true;
        self.clock();
        self.signals.load = false;
        self.clock();
    }

    pub fn read_reg(&mut self, reg: Register) -> u8 {
        self.signals.reg_sel = reg.index();
        self.signals.dump = true;
        self.clock();
        self.signals.dump = false;
        let mut value = 0;
        for i in 0..8 {
            let out = self.clock();
            value |= (out.shift_out as u8) << (7 - i);
        }
        value
    }

    pub fn read_pc(&mut self) -> u8 {
        self.read_reg(Register::Pc)
    }

    pub fn set_pc(&mut self, value: u8) {
        self.write_reg(Register::Pc, value);
    }

    pub fn read_sp(&mut self) -> u8 {
        self.read_reg(Register::Sp)
    }

    pub fn set_sp(&mut self, value: u8) {
        self.write_reg(Register::Sp, value);
    }

    pub fn read_stack_top(&mut self) -> u8 {
        self.read_reg(Register::StackTop)
    }

    pub fn set_sp_read_stack(&mut self, index: u8) -> u8 {
        self.set_sp(index);
        self.read_stack_top()
    }

    pub fn push(&mut self, value: u8) -> Result<()> {
        self.ensure_stopped()?;
        self.write_reg(Register::StackTop, value);
        Ok(())
    }

    pub fn exec_opcode(&mut self, opcode: OpCode) -> Result<()> {
        self.ensure_stopped()?;
        self.write_reg(Register::Exec, opcode);
        self.ensure_stopped()
    }

    // Run control ////////////////////////////////////////////////////////////

    pub fn execute(&mut self, wait: bool) -> Result<()> {
        self.ensure_stopped()?;
        self.signals.run = true;
        self.signals.step = false;
        self.clock();
        self.signals.run = false;
        self.clock();
        if wait {
            self.ensure_stopped()?;
        }
        Ok(())
    }

    pub fn single_step(&mut self) -> Result<()> {
        self.ensure_stopped()?;
        self.signals.run = true;
        self.signals.step = true;
        self.clock();
        self.signals.run = false;
        self.signals.step = false;
        self.clock();
        self.ensure_stopped()
    }

    // Program memory /////////////////////////////////////////////////////////
    //
    // There is no direct path into program memory: the value and address go
    // onto the stack and the core runs '!' on them.

    pub fn write_progmem(&mut self, addr: u8, value: u8) -> Result<()> {
        self.push(value)?;
        self.push(addr)?;
        self.exec_opcode(CODEWRITE)
    }

    pub fn write_program(&mut self, program: &[u8], offset: u8) -> Result<()> {
        let size = self.core.code().len();
        if offset as usize + program.len() > size {
            return Err(CoreError::ProgramTooLarge {
                len: offset as usize + program.len(),
                size: size,
            });
        }
        for (index, opcode) in program.iter().enumerate() {
            self.write_progmem(offset + index as u8, *opcode)?;
        }
        log::debug!("wrote {} bytes at {:#04x}", program.len(), offset);
        Ok(())
    }
}

// Tests //////////////////////////////////////////////////////////////////////
//
// These drive the core only through its pins.

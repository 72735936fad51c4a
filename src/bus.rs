use crate::config::AddressPolicy;
use crate::data::{Addr, Cell, IO_DDR, IO_PIN, IO_PORT};
use crate::error::{CoreError, Result, Space};
use serde::Serialize;

// Data Bus Trait /////////////////////////////////////////////////////////////
//
// Everything the 'r' and 'w' opcodes can reach. The core only talks to the
// data space through this, so tests can swap in something that records.

pub trait DataBus {
    fn read(&mut self, addr: Addr) -> Result<Cell>;
    fn write(&mut self, addr: Addr, value: Cell) -> Result<()>;
    fn reset(&mut self);
    fn io(&self) -> IoPins;
}

// Output side of the I/O port: which pins are driven and what they drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IoPins {
    pub direction: u8,
    pub port: u8,
}

// Mapped Memory Implementation ///////////////////////////////////////////////

#[derive(Debug)]
pub struct MappedMemory {
    ram: Vec<Cell>,
    policy: AddressPolicy,
    direction: u8,
    port: u8,
    pin_input: u8,
}

impl MappedMemory {
    pub fn new(size: usize, policy: AddressPolicy) -> MappedMemory {
        MappedMemory {
            ram: vec![0; size],
            policy: policy,
            direction: 0,
            port: 0,
            pin_input: 0,
        }
    }

    // Levels on the external pins, as seen by reads of PIN
    pub fn set_pin_input(&mut self, value: u8) {
        self.pin_input = value;
    }

    pub fn pin_input(&self) -> u8 {
        self.pin_input
    }

    pub fn ram(&self) -> &[Cell] {
        &self.ram
    }

    fn index(&self, addr: Addr) -> Result<usize> {
        let idx = addr as usize;
        if idx < self.ram.len() {
            return Ok(idx);
        }
        match self.policy {
            AddressPolicy::Wrap => Ok(idx % self.ram.len()),
            AddressPolicy::Fault => Err(CoreError::AddressOutOfRange {
                space: Space::Data,
                addr: addr,
                size: self.ram.len(),
            }),
        }
    }
}

impl DataBus for MappedMemory {
    fn read(&mut self, addr: Addr) -> Result<Cell> {
        match addr {
            IO_PIN => Ok(self.pin_input),
            IO_DDR => Ok(self.direction),
            IO_PORT => Ok(self.port),
            _ => {
                let idx = self.index(addr)?;
                Ok(self.ram[idx])
            }
        }
    }

    fn write(&mut self, addr: Addr, value: Cell) -> Result<()> {
        match addr {
            // toggle, not store
            IO_PIN => self.port ^= value,
            IO_DDR => self.direction = value,
            IO_PORT => self.port = value,
            _ => {
                let idx = self.index(addr)?;
                self.ram[idx] = value;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.ram.fill(0);
        self.direction = 0;
        self.port = 0;
    }

    fn io(&self) -> IoPins {
        IoPins {
            direction: self.direction,
            port: self.port,
        }
    }
}

use crate::bus::{DataBus, IoPins, MappedMemory};
use crate::config::{AddressPolicy, CoreConfig, StackPolicy};
use crate::data::{Addr, Cell, Op};
use crate::delay::DelayTimer;
use crate::error::{CoreError, Result, Space};
use crate::shift::{Register, ShiftPort, Transfer};
use serde::Serialize;

// Stack Core /////////////////////////////////////////////////////////////////
//
// A byte wide stack machine with a separate program memory and a data space
// that has the I/O port mapped into it. Nothing happens except on a clock
// edge: each call to clock() samples the input pins, runs the register shift
// interface and then moves the engine forward by one action, which is one
// opcode while running or stepping, or one timer tick while waiting.
//
// The same execute() is used for opcodes fetched at the pc and for opcodes
// written to the exec register by the host. Only the sequencing after it
// differs: injected opcodes never move the pc forward.
//
// Stack cells are never cleared by a pop, only the sp moves. Raising the sp
// through the register interface brings old values back into view.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Running,
    SteppingOne,
    Stopped,
    Sleeping,
    WaitingDelay,
    Halted,
}

// Input pins sampled on a clock edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    pub run: bool,
    pub step: bool,
    pub load: bool,
    pub dump: bool,
    pub shift_in: bool,
    pub reg_sel: u8,
}

// Output pins after a clock edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Outputs {
    pub ready: bool,
    pub sleeping: bool,
    pub wait_delay: bool,
    pub shift_out: bool,
    pub io: IoPins,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub pc: Addr,
    pub sp: u8,
    pub stack: Vec<Cell>,
    pub top: Option<Cell>,
    pub status: Status,
    pub sleeping: bool,
    pub waiting: bool,
    pub io: IoPins,
    pub cycles: u64,
    pub fault: Option<String>,
}

// What an executed opcode asks of the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Advance,
    Jump(Addr),
    Delay(u8),
    Sleep,
    Halt,
}

#[derive(Debug)]
pub struct Core<B: DataBus> {
    pc: Addr,
    sp: u8,
    stack: Vec<Cell>,
    code: Vec<Cell>,
    bus: B,
    status: Status,
    // status to go back to when a delay runs out
    resume: Status,
    sleeping: bool,
    exec_latch: u8,
    delay: DelayTimer,
    shift: ShiftPort,
    stack_policy: StackPolicy,
    address_policy: AddressPolicy,
    cycles: u64,
    fault: Option<CoreError>,
}

impl Core<MappedMemory> {
    pub fn new(config: &CoreConfig) -> Result<Core<MappedMemory>> {
        let bus = MappedMemory::new(config.data_size, config.address_policy);
        Core::with_bus(config, bus)
    }
}

impl<B: DataBus> Core<B> {
    // Memory sizes are checked here, the pc and sp arithmetic relies on them.
    pub fn with_bus(config: &CoreConfig, bus: B) -> Result<Core<B>> {
        config.validate()?;
        Ok(Core {
            pc: 0,
            sp: 0,
            stack: vec![0; config.stack_depth],
            code: vec![0; config.code_size],
            bus: bus,
            status: Status::Stopped,
            resume: Status::Stopped,
            sleeping: false,
            exec_latch: 0,
            delay: DelayTimer::new(config.delay_cycles_per_unit),
            shift: ShiftPort::new(),
            stack_policy: config.stack_policy,
            address_policy: config.address_policy,
            cycles: 0,
            fault: None,
        })
    }

    // External reset. Program memory is kept so a loaded program can run again.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.sp = 0;
        self.stack.fill(0);
        self.bus.reset();
        self.status = Status::Stopped;
        self.resume = Status::Stopped;
        self.sleeping = false;
        self.exec_latch = 0;
        self.delay.cancel();
        self.shift.reset();
        self.cycles = 0;
        self.fault = None;
        log::debug!("core reset");
    }

    // State access ///////////////////////////////////////////////////////////

    pub fn pc(&self) -> Addr {
        self.pc
    }

    pub fn sp(&self) -> u8 {
        self.sp
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        matches!(
            self.status,
            Status::Stopped | Status::Sleeping | Status::Halted
        )
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    pub fn is_waiting(&self) -> bool {
        self.status == Status::WaitingDelay
    }

    pub fn stack_top(&self) -> Option<Cell> {
        match self.sp {
            0 => None,
            sp => Some(self.stack[sp as usize - 1]),
        }
    }

    pub fn live_stack(&self) -> &[Cell] {
        &self.stack[..self.sp as usize]
    }

    pub fn code(&self) -> &[Cell] {
        &self.code
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn fault(&self) -> Option<&CoreError> {
        self.fault.as_ref()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pc: self.pc,
            sp: self.sp,
            stack: self.live_stack().to_vec(),
            top: self.stack_top(),
            status: self.status,
            sleeping: self.sleeping,
            waiting: self.is_waiting(),
            io: self.bus.io(),
            cycles: self.cycles,
            fault: self.fault.as_ref().map(|e| e.to_string()),
        }
    }

    // Backdoor load of program memory, skipping the protocol.
    pub fn load_program(&mut self, program: &[Cell]) -> Result<()> {
        if !self.is_ready() {
            return Err(CoreError::NotReady(self.status));
        }
        if program.len() > self.code.len() {
            return Err(CoreError::ProgramTooLarge {
                len: program.len(),
                size: self.code.len(),
            });
        }
        self.code[..program.len()].copy_from_slice(program);
        Ok(())
    }

    // Stack Operations ///////////////////////////////////////////////////////
    //
    // The sp counts live cells, so the top is at sp - 1. All stack access from
    // opcodes and from the register interface goes through these.

    fn push(&mut self, val: Cell) -> Result<()> {
        let sp = self.sp as usize;
        if sp == self.stack.len() {
            return match self.stack_policy {
                StackPolicy::Saturate => {
                    log::debug!("stack full, dropping {:#04x}", val);
                    Ok(())
                }
                StackPolicy::Fault => Err(CoreError::StackOverflow {
                    pc: self.pc,
                    depth: self.stack.len(),
                }),
            };
        }
        self.stack[sp] = val;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Cell> {
        if self.sp == 0 {
            return match self.stack_policy {
                StackPolicy::Saturate => {
                    log::debug!("stack empty, popping 0");
                    Ok(0)
                }
                StackPolicy::Fault => Err(CoreError::StackUnderflow { pc: self.pc }),
            };
        }
        self.sp -= 1;
        Ok(self.stack[self.sp as usize])
    }

    fn binary<F: Fn(Cell, Cell) -> Cell>(&mut self, f: F) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(f(a, b))
    }

    fn unary<F: Fn(Cell) -> Cell>(&mut self, f: F) -> Result<()> {
        let a = self.pop()?;
        self.push(f(a))
    }

    fn code_index(&self, addr: Addr) -> Result<usize> {
        let idx = addr as usize;
        if idx < self.code.len() {
            return Ok(idx);
        }
        match self.address_policy {
            AddressPolicy::Wrap => Ok(idx % self.code.len()),
            AddressPolicy::Fault => Err(CoreError::AddressOutOfRange {
                space: Space::Code,
                addr: addr,
                size: self.code.len(),
            }),
        }
    }

    fn next_pc(&self) -> Addr {
        ((self.pc as usize + 1) % self.code.len()) as Addr
    }

    // Program Execution //////////////////////////////////////////////////////

    fn execute(&mut self, op: Op) -> Result<Next> {
        match op {
            Op::Push(literal) => self.push(literal)?,

            // Arithmetic and bits
            Op::Add => self.binary(|a, b| a.wrapping_add(b))?,
            Op::Subtract => self.binary(|a, b| a.wrapping_sub(b))?,
            Op::BitAnd => self.binary(|a, b| a & b)?,
            Op::BitOr => self.binary(|a, b| a | b)?,
            Op::BitXor => self.binary(|a, b| a ^ b)?,
            Op::RShift => self.unary(|a| a >> 1)?,
            Op::LShift => self.unary(|a| a << 1)?,

            // Stack
            Op::Dup => {
                let a = self.pop()?;
                self.push(a)?;
                self.push(a)?;
            }
            Op::Exchange => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?;
            }

            // Control flow
            Op::Jump => return Ok(Next::Jump(self.pop()?)),
            // target on top, count under it
            Op::Loop => {
                let target = self.pop()?;
                let count = self.pop()?;
                if count != 0 {
                    self.push(count - 1)?;
                    return Ok(Next::Jump(target));
                }
            }

            // Code memory, writes are seen by the next fetch
            Op::CodeRead => {
                let addr = self.pop()?;
                let idx = self.code_index(addr)?;
                self.push(self.code[idx])?;
            }
            Op::CodeWrite => {
                let addr = self.pop()?;
                let val = self.pop()?;
                let idx = self.code_index(addr)?;
                self.code[idx] = val;
            }

            // Data memory and I/O
            Op::DataWrite => {
                let addr = self.pop()?;
                let val = self.pop()?;
                self.bus.write(addr, val)?;
            }
            Op::DataRead => {
                let addr = self.pop()?;
                let val = self.bus.read(addr)?;
                self.push(val)?;
            }

            Op::Delay => return Ok(Next::Delay(self.pop()?)),
            Op::Sleep => return Ok(Next::Sleep),
            Op::Halt => return Ok(Next::Halt),
        }
        Ok(Next::Advance)
    }

    // Fetch at the pc and execute, for Running and SteppingOne.
    fn step_program(&mut self) {
        let op = Op::decode(self.code[self.pc as usize]);
        log::trace!("{:#04x}: {} (sp {})", self.pc, op, self.sp);
        // a single step ends after this opcode
        let after = match self.status {
            Status::Running => Status::Running,
            _ => Status::Stopped,
        };
        match self.execute(op) {
            Ok(next) => self.sequence(next, true, after),
            Err(err) => self.raise(err),
        }
    }

    // Out of band execution through the exec register.
    fn inject(&mut self, byte: u8) {
        let op = Op::decode(byte);
        log::debug!("injected {} (pc {:#04x}, sp {})", op, self.pc, self.sp);
        let after = self.status;
        match self.execute(op) {
            Ok(next) => self.sequence(next, false, after),
            Err(err) => self.raise(err),
        }
    }

    // Move the pc and status on after an opcode. Jumps never fall through,
    // everything else steps past the opcode when it came from the pc.
    fn sequence(&mut self, next: Next, advance: bool, after: Status) {
        if let Next::Jump(target) = next {
            match self.code_index(target) {
                Ok(idx) => {
                    self.pc = idx as Addr;
                    self.status = after;
                }
                Err(err) => self.raise(err),
            }
            return;
        }
        if advance {
            self.pc = self.next_pc();
        }
        match next {
            Next::Delay(units) if self.delay.start(units) => {
                log::debug!("waiting {} units at pc {:#04x}", units, self.pc);
                self.resume = after;
                self.status = Status::WaitingDelay;
            }
            Next::Sleep => {
                log::info!("sleeping at pc {:#04x}", self.pc);
                self.sleeping = true;
                self.status = Status::Sleeping;
            }
            Next::Halt => {
                log::info!("halted at pc {:#04x}", self.pc);
                self.status = Status::Halted;
            }
            _ => self.status = after,
        }
    }

    fn raise(&mut self, err: CoreError) {
        log::error!("fault: {}", err);
        self.fault = Some(err);
        self.delay.cancel();
        self.status = Status::Halted;
    }

    // Clocked Interface //////////////////////////////////////////////////////

    pub fn clock(&mut self, signals: Signals) -> Outputs {
        self.cycles += 1;
        let was_waiting = self.is_waiting();
        if let Some(transfer) = self.shift.clock(&signals) {
            self.transfer(transfer);
        }
        // a wait started by an injected ',' counts from the next edge
        let started_wait = !was_waiting && self.is_waiting();
        if !started_wait && !(signals.run && self.request_run(signals.step)) {
            self.advance();
        }
        self.outputs()
    }

    pub fn outputs(&self) -> Outputs {
        Outputs {
            ready: self.is_ready(),
            sleeping: self.sleeping,
            wait_delay: self.is_waiting(),
            shift_out: self.shift.shift_out(),
            io: self.bus.io(),
        }
    }

    fn advance(&mut self) {
        match self.status {
            Status::Running | Status::SteppingOne => self.step_program(),
            Status::WaitingDelay => {
                if self.delay.tick() {
                    log::debug!("delay done, back to {:?}", self.resume);
                    self.status = self.resume;
                }
            }
            Status::Stopped | Status::Sleeping | Status::Halted => {}
        }
    }

    // Returns true if the request was taken.
    fn request_run(&mut self, step: bool) -> bool {
        match self.status {
            Status::Stopped => {
                self.status = if step {
                    Status::SteppingOne
                } else {
                    Status::Running
                };
                log::debug!("{:?} from pc {:#04x}", self.status, self.pc);
                true
            }
            Status::Sleeping | Status::Halted => {
                log::warn!("run request ignored, core is {:?} until reset", self.status);
                false
            }
            _ => false,
        }
    }

    fn transfer(&mut self, transfer: Transfer) {
        match transfer {
            Transfer::Load {
                select,
                value,
                bits,
            } => {
                if !self.is_ready() {
                    log::warn!("load ignored, core is {:?}", self.status);
                    return;
                }
                if bits < 8 {
                    log::debug!("latching after {} shifted bits", bits);
                }
                let result = Register::try_from(select).and_then(|reg| self.write_register(reg, value));
                if let Err(err) = result {
                    log::warn!("load rejected: {}", err);
                }
            }
            Transfer::Dump { select } => {
                if !(self.is_ready() || self.is_waiting()) {
                    log::warn!("dump ignored, core is {:?}", self.status);
                    return;
                }
                match Register::try_from(select) {
                    Ok(reg) => {
                        let value = self.read_register(reg);
                        self.shift.begin_dump(value);
                    }
                    Err(err) => log::warn!("dump rejected: {}", err),
                }
            }
        }
    }

    fn write_register(&mut self, reg: Register, value: u8) -> Result<()> {
        match reg {
            Register::Pc => self.pc = self.code_index(value)? as Addr,
            Register::Sp => {
                let depth = self.stack.len();
                if value as usize <= depth {
                    self.sp = value;
                } else {
                    match self.stack_policy {
                        StackPolicy::Saturate => self.sp = depth as u8,
                        StackPolicy::Fault => {
                            return Err(CoreError::StackOverflow {
                                pc: self.pc,
                                depth: depth,
                            })
                        }
                    }
                }
            }
            Register::Exec => {
                self.exec_latch = value;
                self.inject(value);
            }
            Register::StackTop => self.push(value)?,
        }
        Ok(())
    }

    fn read_register(&self, reg: Register) -> u8 {
        match reg {
            Register::Pc => self.pc,
            Register::Sp => self.sp,
            Register::Exec => self.exec_latch,
            Register::StackTop => self.stack_top().unwrap_or(0),
        }
    }
}

// Tests //////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod vm_tests {
    use super::*;
    use crate::data;
    use proptest::prelude::*;

    fn setup_core() -> Core<MappedMemory> {
        Core::new(&CoreConfig::default()).unwrap()
    }

    fn setup_faulting_core() -> Core<MappedMemory> {
        let config = CoreConfig {
            stack_policy: StackPolicy::Fault,
            address_policy: AddressPolicy::Fault,
            ..CoreConfig::default()
        };
        Core::new(&config).unwrap()
    }

    fn with_stack(values: &[u8]) -> Core<MappedMemory> {
        let mut core = setup_core();
        for v in values {
            core.write_register(Register::StackTop, *v).unwrap();
        }
        core
    }

    fn step(core: &mut Core<MappedMemory>) {
        core.clock(Signals {
            run: true,
            step: true,
            ..Signals::default()
        });
        core.clock(Signals::default());
    }

    fn run(core: &mut Core<MappedMemory>) {
        core.clock(Signals {
            run: true,
            ..Signals::default()
        });
        for _ in 0..10_000 {
            core.clock(Signals::default());
            if core.is_ready() {
                return;
            }
        }
        panic!("program did not stop");
    }

    // Shift a byte in MSB first and latch it into a register, all over the pins.
    fn load_over_pins(core: &mut Core<MappedMemory>, select: u8, value: u8) -> Outputs {
        for i in 0..8 {
            core.clock(Signals {
                shift_in: (value >> (7 - i)) & 1 == 1,
                ..Signals::default()
            });
        }
        core.clock(Signals {
            load: true,
            reg_sel: select,
            ..Signals::default()
        })
    }

    // Data bus that keeps a log of every access.
    #[derive(Debug)]
    struct RecordingBus {
        memory: MappedMemory,
        accesses: Vec<(char, Addr, Cell)>,
    }

    impl DataBus for RecordingBus {
        fn read(&mut self, addr: Addr) -> Result<Cell> {
            let value = self.memory.read(addr)?;
            self.accesses.push(('r', addr, value));
            Ok(value)
        }

        fn write(&mut self, addr: Addr, value: Cell) -> Result<()> {
            self.accesses.push(('w', addr, value));
            self.memory.write(addr, value)
        }

        fn reset(&mut self) {
            self.accesses.clear();
            self.memory.reset();
        }

        fn io(&self) -> IoPins {
            self.memory.io()
        }
    }

    // RUN testing with actual programs ///////////////////////////////////////

    #[test]
    fn test_add() {
        let mut core = setup_core();
        core.load_program(&[42, 58, data::ADD, data::SLEEP]).unwrap();
        run(&mut core);
        assert_eq!(core.pc(), 4);
        assert_eq!(core.sp(), 1);
        assert_eq!(core.stack_top(), Some(100));
    }

    #[test]
    fn test_subtract_wraps() {
        let mut core = setup_core();
        core.load_program(&[5, 7, data::SUBTRACT, data::SLEEP]).unwrap();
        run(&mut core);
        assert_eq!(core.stack_top(), Some(254));
    }

    #[test]
    fn test_bitwise() {
        let mut core = setup_core();
        core.load_program(&[
            0x88,
            0xf0,
            data::BITAND,
            0x88,
            0xf0,
            data::BITOR,
            0x88,
            0xf0,
            data::BITXOR,
            0x88,
            data::RSHIFT,
            0x88,
            data::LSHIFT,
            data::SLEEP,
        ])
        .unwrap();
        run(&mut core);
        assert_eq!(core.pc(), 14);
        assert_eq!(core.live_stack(), &[0x80, 0xf8, 0x78, 0x44, 0x10]);
    }

    #[test]
    fn test_dup_and_exchange() {
        let mut core = setup_core();
        core.load_program(&[12, data::DUP, 89, data::EXCHANGE, data::SLEEP])
            .unwrap();
        run(&mut core);
        assert_eq!(core.live_stack(), &[12, 89, 12]);
    }

    #[test]
    fn test_jump_does_not_fall_through() {
        let mut core = setup_core();
        core.load_program(&[22, data::JUMP]).unwrap();
        step(&mut core);
        step(&mut core);
        assert_eq!(core.pc(), 22);
        assert_eq!(core.sp(), 0);
        assert_eq!(core.status(), Status::Stopped);
    }

    #[test]
    fn test_loop_steps() {
        let mut core = setup_core();
        core.load_program(&[2, 1, data::LOOP]).unwrap();
        for _ in 0..3 {
            step(&mut core);
        }
        assert_eq!((core.pc(), core.sp(), core.stack_top()), (1, 1, Some(1)));
        for _ in 0..2 {
            step(&mut core);
        }
        assert_eq!((core.pc(), core.sp(), core.stack_top()), (1, 1, Some(0)));
        for _ in 0..2 {
            step(&mut core);
        }
        assert_eq!((core.pc(), core.sp()), (3, 0));
    }

    #[test]
    fn test_self_modifying_code() {
        let mut core = setup_core();
        core.load_program(&[5, 3, data::CODEWRITE, data::SLEEP, data::SLEEP])
            .unwrap();
        run(&mut core);
        assert_eq!(core.code()[3], 5);
        assert_eq!(core.pc(), 5);
        assert_eq!(core.live_stack(), &[5]);
    }

    #[test]
    fn test_code_read() {
        let mut core = setup_core();
        core.load_program(&[4, data::CODEREAD, data::SLEEP, 0, 45])
            .unwrap();
        run(&mut core);
        assert_eq!(core.pc(), 3);
        assert_eq!(core.live_stack(), &[45]);
    }

    #[test]
    fn test_data_memory() {
        let mut core = setup_core();
        core.load_program(&[10, 4, data::DATAWRITE, 15, 4, data::DATAREAD, data::SLEEP])
            .unwrap();
        run(&mut core);
        assert_eq!(core.pc(), 7);
        assert_eq!(core.live_stack(), &[15, 10]);
        assert_eq!(core.bus().ram()[4], 10);
    }

    #[test]
    fn test_io_pin_toggle() {
        let mut core = setup_core();
        core.load_program(&[
            0xf0,
            data::IO_PIN,
            data::DATAWRITE,
            0x55,
            data::IO_PIN,
            data::DATAWRITE,
            data::SLEEP,
        ])
        .unwrap();
        run(&mut core);
        assert_eq!(core.outputs().io.port, 0xa5);
    }

    #[test]
    fn test_sleep_and_halt_differ() {
        let mut sleeper = setup_core();
        sleeper.load_program(&[data::SLEEP]).unwrap();
        run(&mut sleeper);
        let mut halter = setup_core();
        halter.load_program(&[data::HALT]).unwrap();
        run(&mut halter);

        assert_eq!((sleeper.pc(), sleeper.sp()), (1, 0));
        assert_eq!((halter.pc(), halter.sp()), (1, 0));
        assert_eq!(sleeper.status(), Status::Sleeping);
        assert_eq!(halter.status(), Status::Halted);
        assert!(sleeper.outputs().sleeping);
        assert!(!halter.outputs().sleeping);
        assert!(sleeper.outputs().ready && halter.outputs().ready);
    }

    #[test]
    fn test_run_ignored_until_reset() {
        let mut core = setup_core();
        core.load_program(&[data::SLEEP, 7, data::SLEEP]).unwrap();
        run(&mut core);
        step(&mut core);
        assert_eq!(core.pc(), 1);
        assert_eq!(core.status(), Status::Sleeping);

        core.reset();
        assert_eq!(core.status(), Status::Stopped);
        assert!(!core.is_sleeping());
        assert_eq!(core.code()[1], 7);
    }

    #[test]
    fn test_run_ignored_after_halt() {
        let mut core = setup_core();
        core.load_program(&[data::HALT, 7, data::SLEEP]).unwrap();
        run(&mut core);
        assert_eq!(core.status(), Status::Halted);
        step(&mut core);
        core.clock(Signals {
            run: true,
            ..Signals::default()
        });
        core.clock(Signals::default());
        assert_eq!(core.pc(), 1);
        assert_eq!(core.sp(), 0);
        assert_eq!(core.status(), Status::Halted);

        core.reset();
        run(&mut core);
        assert_eq!(core.pc(), 1);
        assert_eq!(core.status(), Status::Halted);
    }

    #[test]
    fn test_pc_wraps_at_code_size() {
        let mut core = setup_core();
        let mut program = vec![1u8; 32];
        program[0] = data::SLEEP;
        program[31] = 9;
        core.load_program(&program).unwrap();
        core.write_register(Register::Pc, 31).unwrap();
        run(&mut core);
        assert_eq!(core.pc(), 1);
        assert_eq!(core.live_stack(), &[9]);
    }

    // DELAY //

    #[test]
    fn test_delay_timing() {
        let config = CoreConfig {
            delay_cycles_per_unit: 10,
            ..CoreConfig::default()
        };
        let mut core = Core::new(&config).unwrap();
        core.load_program(&[3, data::DELAY, data::SLEEP]).unwrap();
        core.clock(Signals {
            run: true,
            ..Signals::default()
        });
        core.clock(Signals::default()); // push 3
        core.clock(Signals::default()); // ','
        assert_eq!(core.status(), Status::WaitingDelay);
        assert_eq!(core.pc(), 2);
        assert_eq!(core.sp(), 0);
        for _ in 0..29 {
            assert!(core.clock(Signals::default()).wait_delay);
        }
        let out = core.clock(Signals::default());
        assert!(!out.wait_delay);
        assert_eq!(core.status(), Status::Running);
        core.clock(Signals::default());
        assert_eq!(core.pc(), 3);
        assert_eq!(core.status(), Status::Sleeping);
    }

    #[test]
    fn test_zero_delay_does_not_wait() {
        let mut core = setup_core();
        core.load_program(&[0, data::DELAY, data::SLEEP]).unwrap();
        step(&mut core);
        step(&mut core);
        assert_eq!(core.status(), Status::Stopped);
        assert_eq!(core.pc(), 2);
    }

    #[test]
    fn test_stepped_delay_ends_stopped() {
        let config = CoreConfig {
            delay_cycles_per_unit: 2,
            ..CoreConfig::default()
        };
        let mut core = Core::new(&config).unwrap();
        core.load_program(&[1, data::DELAY, data::SLEEP]).unwrap();
        step(&mut core);
        step(&mut core);
        assert_eq!(core.status(), Status::WaitingDelay);
        core.clock(Signals::default());
        core.clock(Signals::default());
        assert_eq!(core.status(), Status::Stopped);
        assert_eq!(core.pc(), 2);
    }

    #[test]
    fn test_injected_delay_full_length() {
        let config = CoreConfig {
            delay_cycles_per_unit: 10,
            ..CoreConfig::default()
        };
        let mut core = Core::new(&config).unwrap();
        load_over_pins(&mut core, data::REG_STACK_TOP, 1);
        assert_eq!(core.live_stack(), &[1]);

        let out = load_over_pins(&mut core, data::REG_EXEC, data::DELAY);
        assert!(out.wait_delay);
        assert!(!out.ready);
        assert_eq!(core.pc(), 0);
        assert_eq!(core.sp(), 0);
        for _ in 0..9 {
            assert!(core.clock(Signals::default()).wait_delay);
        }
        let out = core.clock(Signals::default());
        assert!(!out.wait_delay);
        assert!(out.ready);
        assert_eq!(core.status(), Status::Stopped);
        assert_eq!(core.pc(), 0);
    }

    // REGISTERS //

    #[test]
    fn test_stack_top_register() {
        let mut core = with_stack(&[1, 2, 3]);
        assert_eq!(core.sp(), 3);
        assert_eq!(core.read_register(Register::StackTop), 3);
        core.write_register(Register::Sp, 1).unwrap();
        assert_eq!(core.read_register(Register::StackTop), 1);
        // cells above the sp are still there
        core.write_register(Register::Sp, 2).unwrap();
        assert_eq!(core.read_register(Register::StackTop), 2);
        core.write_register(Register::Sp, 0).unwrap();
        assert_eq!(core.read_register(Register::StackTop), 0);
    }

    #[test]
    fn test_exec_register_does_not_move_pc() {
        let mut core = with_stack(&[20, 30]);
        core.write_register(Register::Exec, data::ADD).unwrap();
        assert_eq!(core.pc(), 0);
        assert_eq!(core.live_stack(), &[50]);
        assert_eq!(core.read_register(Register::Exec), data::ADD);
    }

    #[test]
    fn test_exec_register_jump_sets_pc() {
        let mut core = with_stack(&[9]);
        core.write_register(Register::Exec, data::JUMP).unwrap();
        assert_eq!(core.pc(), 9);
        assert_eq!(core.status(), Status::Stopped);
    }

    #[test]
    fn test_exec_in_sleep_keeps_sleeping() {
        let mut core = setup_core();
        core.load_program(&[data::SLEEP]).unwrap();
        run(&mut core);
        core.write_register(Register::StackTop, 4).unwrap();
        core.write_register(Register::StackTop, 5).unwrap();
        core.write_register(Register::Exec, data::ADD).unwrap();
        assert_eq!(core.status(), Status::Sleeping);
        assert_eq!(core.stack_top(), Some(9));
    }

    #[test]
    fn test_sp_register_saturates() {
        let mut core = setup_core();
        core.write_register(Register::Sp, 200).unwrap();
        assert_eq!(core.sp(), 32);
    }

    #[test]
    fn test_load_rejected_while_running() {
        let mut core = setup_core();
        core.load_program(&[0, data::JUMP]).unwrap();
        core.clock(Signals {
            run: true,
            ..Signals::default()
        });
        assert_eq!(core.status(), Status::Running);
        core.transfer(Transfer::Load {
            select: data::REG_SP,
            value: 5,
            bits: 8,
        });
        assert!(core.sp() <= 1);
        assert!(core.load_program(&[1]).is_err());
    }

    #[test]
    fn test_bad_select_is_a_noop() {
        let mut core = with_stack(&[7]);
        core.transfer(Transfer::Load {
            select: 5,
            value: 0,
            bits: 8,
        });
        assert_eq!(core.live_stack(), &[7]);
        assert_eq!(core.pc(), 0);
    }

    // POLICIES //

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CoreConfig {
            code_size: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(Core::new(&config), Err(CoreError::Config(_))));

        let config = CoreConfig {
            stack_depth: 300,
            ..CoreConfig::default()
        };
        let bus = MappedMemory::new(config.data_size, config.address_policy);
        assert!(matches!(
            Core::with_bus(&config, bus),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn test_data_access_goes_through_bus() {
        let config = CoreConfig::default();
        let bus = RecordingBus {
            memory: MappedMemory::new(config.data_size, config.address_policy),
            accesses: Vec::new(),
        };
        let mut core = Core::with_bus(&config, bus).unwrap();
        core.load_program(&[10, 4, data::DATAWRITE, 4, data::DATAREAD, data::SLEEP])
            .unwrap();
        core.clock(Signals {
            run: true,
            ..Signals::default()
        });
        for _ in 0..6 {
            core.clock(Signals::default());
        }
        assert_eq!(core.status(), Status::Sleeping);
        assert_eq!(core.live_stack(), &[10]);
        assert_eq!(core.bus().accesses, vec![('w', 4, 10), ('r', 4, 10)]);

        core.reset();
        assert!(core.bus().accesses.is_empty());
    }

    #[test]
    fn test_saturating_stack() {
        let mut core = setup_core();
        core.load_program(&[data::ADD, data::SLEEP]).unwrap();
        run(&mut core);
        assert_eq!(core.live_stack(), &[0]);
        assert!(core.fault().is_none());

        let mut core = with_stack(&[1; 32]);
        core.write_register(Register::StackTop, 2).unwrap();
        assert_eq!(core.sp(), 32);
        assert_eq!(core.stack_top(), Some(1));
    }

    #[test]
    fn test_underflow_fault_halts() {
        let mut core = setup_faulting_core();
        core.load_program(&[1, data::ADD, data::SLEEP]).unwrap();
        run(&mut core);
        assert_eq!(core.status(), Status::Halted);
        assert_eq!(core.fault(), Some(&CoreError::StackUnderflow { pc: 1 }));
        assert!(core.snapshot().fault.is_some());
    }

    #[test]
    fn test_overflow_fault_rejects_load() {
        let mut core = setup_faulting_core();
        for v in 0..32 {
            core.write_register(Register::StackTop, v).unwrap();
        }
        assert_eq!(
            core.write_register(Register::StackTop, 99),
            Err(CoreError::StackOverflow { pc: 0, depth: 32 })
        );
        assert!(core.write_register(Register::Sp, 33).is_err());
        assert_eq!(core.status(), Status::Stopped);
    }

    #[test]
    fn test_jump_out_of_range() {
        let mut core = setup_core();
        core.load_program(&[40, data::JUMP]).unwrap();
        step(&mut core);
        step(&mut core);
        assert_eq!(core.pc(), 8);

        let mut core = setup_faulting_core();
        core.load_program(&[40, data::JUMP]).unwrap();
        step(&mut core);
        step(&mut core);
        assert_eq!(core.status(), Status::Halted);
        assert!(matches!(
            core.fault(),
            Some(CoreError::AddressOutOfRange {
                space: Space::Code,
                addr: 40,
                ..
            })
        ));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut core = with_stack(&[3, 4]);
        core.write_register(Register::StackTop, data::IO_DDR).unwrap();
        core.write_register(Register::Exec, data::DATAWRITE).unwrap();
        core.write_register(Register::Pc, 5).unwrap();
        assert_eq!(core.outputs().io.direction, 4);
        core.reset();
        assert_eq!(core.pc(), 0);
        assert_eq!(core.sp(), 0);
        assert_eq!(core.outputs().io.direction, 0);
        core.write_register(Register::Sp, 2).unwrap();
        assert_eq!(core.live_stack(), &[0, 0]);
    }

    // LAWS //

    proptest! {
        #[test]
        fn literal_pushes_and_advances(byte in any::<u8>(), start in 0u8..31) {
            prop_assume!(!Op::is_operator(byte));
            let mut core = setup_core();
            core.write_register(Register::Pc, start).unwrap();
            core.code[start as usize] = byte;
            step(&mut core);
            prop_assert_eq!(core.pc(), start + 1);
            prop_assert_eq!(core.live_stack(), &[byte][..]);
        }

        #[test]
        fn binary_ops_are_mod_256(a in any::<u8>(), b in any::<u8>()) {
            let cases = [
                (data::ADD, a.wrapping_add(b)),
                (data::SUBTRACT, a.wrapping_sub(b)),
                (data::BITAND, a & b),
                (data::BITOR, a | b),
                (data::BITXOR, a ^ b),
            ];
            for (op, expected) in cases {
                let mut core = with_stack(&[a, b]);
                core.write_register(Register::Exec, op).unwrap();
                prop_assert_eq!(core.live_stack(), &[expected][..]);
            }
        }

        #[test]
        fn shifts_are_unary(a in any::<u8>()) {
            let mut core = with_stack(&[a]);
            core.write_register(Register::Exec, data::RSHIFT).unwrap();
            prop_assert_eq!(core.live_stack(), &[a >> 1][..]);
            core.write_register(Register::Exec, data::LSHIFT).unwrap();
            prop_assert_eq!(core.live_stack(), &[(a >> 1) << 1][..]);
        }

        #[test]
        fn loop_law(target in 0u8..32, count in any::<u8>(), start in 0u8..32) {
            let mut core = with_stack(&[count, target]);
            core.write_register(Register::Pc, start).unwrap();
            core.code[start as usize] = data::LOOP;
            step(&mut core);
            if count != 0 {
                prop_assert_eq!(core.pc(), target);
                prop_assert_eq!(core.live_stack(), &[count - 1][..]);
            } else {
                prop_assert_eq!(core.pc(), (start + 1) % 32);
                prop_assert_eq!(core.sp(), 0);
            }
        }
    }
}

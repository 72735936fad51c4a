//! spell: load a program into the stack core over its debug protocol and run it.

use clap::Parser;
use std::path::PathBuf;

use spell::config::CoreConfig;
use spell::controller::Controller;
use spell::program::{parse_byte, parse_program};
use spell::vm::{Core, Snapshot};

#[derive(Parser)]
#[command(name = "spell")]
#[command(about = "Run programs on the SPELL stack core", long_about = None)]
struct Cli {
    /// Program source: whitespace separated literals and operators
    program: PathBuf,

    /// Config file, instead of ./spell.toml and the environment
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Single-step this many opcodes instead of running to a stop
    #[arg(short, long)]
    steps: Option<u32>,

    /// Level on the external input pins
    #[arg(long, value_parser = parse_byte, default_value = "0")]
    pins: u8,

    /// Print the final state as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CoreConfig::from_file(path)?,
        None => CoreConfig::load(),
    };

    let source = std::fs::read_to_string(&cli.program)?;
    let program = parse_program(&source)?;
    log::info!("{}: {} bytes", cli.program.display(), program.len());

    let mut spell = Controller::new(Core::new(&config)?, config.max_wait_cycles);
    spell.core_mut().bus_mut().set_pin_input(cli.pins);
    spell.write_program(&program, 0)?;

    match cli.steps {
        Some(steps) => {
            for _ in 0..steps {
                spell.single_step()?;
                if !cli.json {
                    print_state(&spell.core().snapshot());
                }
            }
        }
        None => spell.execute(true)?,
    }

    let snapshot = spell.core().snapshot();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else if cli.steps.is_none() {
        print_state(&snapshot);
    }
    Ok(())
}

fn print_state(s: &Snapshot) {
    let top = s
        .top
        .map(|v| format!("{:#04x} ({})", v, v))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "pc={:#04x} sp={} top={} status={:?} port={:#04x} ddr={:#04x} cycles={}",
        s.pc, s.sp, top, s.status, s.io.port, s.io.direction, s.cycles
    );
    if let Some(fault) = &s.fault {
        println!("fault: {}", fault);
    }
}

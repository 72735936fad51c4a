pub mod bus;
pub mod config;
pub mod controller;
pub mod data;
pub mod delay;
pub mod error;
pub mod program;
pub mod shift;
pub mod vm;
use wasm_bindgen::prelude::*;

use crate::config::CoreConfig;
use crate::controller::Controller;
use crate::vm::{Core, Snapshot};

// Assemble a program, write it into a fresh core through the debug protocol,
// run it until it stops and return the final state.
pub fn run_source(source: &str, config: &CoreConfig) -> error::Result<Snapshot> {
    let program = program::parse_program(source)?;
    let mut spell = Controller::new(Core::new(config)?, config.max_wait_cycles);
    spell.write_program(&program, 0)?;
    spell.execute(true)?;
    Ok(spell.core().snapshot())
}

// Same as run_source with the default config, for the browser. The result is
// the snapshot as JSON.
#[wasm_bindgen]
pub fn web_run(source: &str) -> Result<String, JsValue> {
    let snapshot =
        run_source(source, &CoreConfig::default()).map_err(|e| JsValue::from_str(&e.to_string()))?;
    serde_json::to_string(&snapshot).map_err(|e| JsValue::from_str(&e.to_string()))
}

//! Configuration for the core and the controller.
//!
//! Values come from, lowest priority first:
//! 1. Built-in defaults
//! 2. Project-local config file (`./spell.toml`)
//! 3. Environment variables (`SPELL_DELAY_CYCLES`, `SPELL_STACK_POLICY`,
//!    `SPELL_ADDRESS_POLICY`)
//!
//! # Config File Format
//!
//! ```toml
//! code_size = 32
//! data_size = 32
//! stack_depth = 32
//! delay_cycles_per_unit = 10000
//! stack_policy = "saturate"   # or "fault"
//! address_policy = "wrap"     # or "fault"
//! max_wait_cycles = 10000000
//! ```

use crate::data::IO_PIN;
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_CODE_SIZE: usize = 32;
pub const DEFAULT_DATA_SIZE: usize = 32;
pub const DEFAULT_STACK_DEPTH: usize = 32;
/// Clock cycles per unit of the `,` opcode (1ms at a 10MHz clock).
pub const DEFAULT_DELAY_CYCLES: u32 = 10_000;
pub const DEFAULT_MAX_WAIT_CYCLES: u64 = 10_000_000;

const LOCAL_CONFIG: &str = "spell.toml";

/// What happens on a pop from an empty stack or a push onto a full one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackPolicy {
    /// Empty pops read 0, pushes onto a full stack are dropped.
    #[default]
    Saturate,
    /// Raise an error and halt the core.
    Fault,
}

/// What happens when a code or data address is past the end of its memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPolicy {
    /// Addresses wrap modulo the memory size.
    #[default]
    Wrap,
    /// Raise an error and halt the core.
    Fault,
}

impl FromStr for StackPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "saturate" => Ok(StackPolicy::Saturate),
            "fault" => Ok(StackPolicy::Fault),
            other => Err(CoreError::Config(format!("unknown stack policy `{}`", other))),
        }
    }
}

impl FromStr for AddressPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wrap" => Ok(AddressPolicy::Wrap),
            "fault" => Ok(AddressPolicy::Fault),
            other => Err(CoreError::Config(format!("unknown address policy `{}`", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Bytes of program memory. PC wraps modulo this.
    pub code_size: usize,
    /// Bytes of data RAM below the I/O registers.
    pub data_size: usize,
    /// Number of stack cells.
    pub stack_depth: usize,
    pub delay_cycles_per_unit: u32,
    pub stack_policy: StackPolicy,
    pub address_policy: AddressPolicy,
    /// Upper bound on the cycles the controller waits for the core to stop.
    pub max_wait_cycles: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            code_size: DEFAULT_CODE_SIZE,
            data_size: DEFAULT_DATA_SIZE,
            stack_depth: DEFAULT_STACK_DEPTH,
            delay_cycles_per_unit: DEFAULT_DELAY_CYCLES,
            stack_policy: StackPolicy::default(),
            address_policy: AddressPolicy::default(),
            max_wait_cycles: DEFAULT_MAX_WAIT_CYCLES,
        }
    }
}

impl CoreConfig {
    /// Load configuration from all sources.
    ///
    /// A missing or broken `spell.toml` falls back to the defaults with a
    /// warning, bad environment values are skipped the same way.
    pub fn load() -> Self {
        let mut config = Self::default();

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::from_file(local) {
                Ok(c) => config = c,
                Err(e) => log::warn!("Ignoring {}: {}", local.display(), e),
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_toml(&content)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Apply overrides from a key lookup, normally the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SPELL_DELAY_CYCLES") {
            match value.trim().parse() {
                Ok(cycles) => {
                    log::info!("Using SPELL_DELAY_CYCLES from environment: {}", cycles);
                    self.delay_cycles_per_unit = cycles;
                }
                Err(e) => log::warn!("Bad SPELL_DELAY_CYCLES `{}`: {}", value, e),
            }
        }
        if let Some(value) = lookup("SPELL_STACK_POLICY") {
            match value.parse() {
                Ok(policy) => self.stack_policy = policy,
                Err(e) => log::warn!("{}", e),
            }
        }
        if let Some(value) = lookup("SPELL_ADDRESS_POLICY") {
            match value.parse() {
                Ok(policy) => self.address_policy = policy,
                Err(e) => log::warn!("{}", e),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=256).contains(&self.code_size) {
            return Err(CoreError::Config(format!(
                "code_size must be 1..=256, got {}",
                self.code_size
            )));
        }
        // RAM must end below the I/O window
        if !(1..=IO_PIN as usize).contains(&self.data_size) {
            return Err(CoreError::Config(format!(
                "data_size must be 1..={}, got {}",
                IO_PIN, self.data_size
            )));
        }
        if !(1..=255).contains(&self.stack_depth) {
            return Err(CoreError::Config(format!(
                "stack_depth must be 1..=255, got {}",
                self.stack_depth
            )));
        }
        if self.delay_cycles_per_unit == 0 {
            return Err(CoreError::Config("delay_cycles_per_unit must be positive".into()));
        }
        if self.max_wait_cycles == 0 {
            return Err(CoreError::Config("max_wait_cycles must be positive".into()));
        }
        Ok(())
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        toml::to_string(&Self::default()).unwrap_or_default()
    }
}

//! Execution context delivered by the interception layer: named registers
//! plus address-sized argument slots on the Dart stack.

use std::collections::HashMap;

use thiserror::Error;

use crate::{DecodeConfig, MemoryReader};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("malformed register dump: {0}")]
    Json(#[from] serde_json::Error),
    #[error("register {name} has unparseable value {value:?}")]
    BadValue { name: String, value: String },
}

/// Registers captured at a function-entry interception event.
pub trait ExecutionContext {
    /// Value of a named register; implementations return zero for
    /// registers they do not carry.
    fn register(&self, name: &str) -> u64;
}

/// Plain map-backed context, as loaded from a register dump.
#[derive(Debug, Clone, Default)]
pub struct RegisterSnapshot {
    registers: HashMap<String, u64>,
}

impl RegisterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: u64) -> &mut Self {
        self.registers.insert(name.to_string(), value);
        self
    }

    /// Loads a dump of the form `{"x28": "0x10", "x15": 462912}`; values
    /// may be JSON numbers or hex/decimal strings.
    pub fn from_json(text: &str) -> Result<Self, ContextError> {
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut registers = HashMap::with_capacity(raw.len());
        for (name, value) in raw {
            let parsed = match &value {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => parse_address(s),
                _ => None,
            };
            let Some(parsed) = parsed else {
                return Err(ContextError::BadValue {
                    name,
                    value: value.to_string(),
                });
            };
            registers.insert(name, parsed);
        }
        Ok(Self { registers })
    }
}

impl ExecutionContext for RegisterSnapshot {
    fn register(&self, name: &str) -> u64 {
        self.registers.get(name).copied().unwrap_or_else(|| {
            log::warn!("register {name} not present in context, using 0");
            0
        })
    }
}

/// Parses `0x`-prefixed hex or plain decimal.
pub fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// Reads the `index`-th argument slot relative to the designated stack
/// register. Argument slots hold full pointers and are never compressed.
pub fn read_argument(
    ctx: &impl ExecutionContext,
    memory: &impl MemoryReader,
    config: &DecodeConfig,
    index: u32,
) -> u64 {
    let stack = ctx.register(&config.stack_register);
    memory.read_u64(stack.wrapping_add(8 * index as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SnapshotMemory;

    #[test]
    fn missing_register_reads_zero() {
        let ctx = RegisterSnapshot::new();
        assert_eq!(ctx.register("x28"), 0);
    }

    #[test]
    fn json_dump_accepts_hex_strings_and_numbers() {
        let ctx = RegisterSnapshot::from_json(r#"{"x28": "0x10", "x15": 4096}"#)
            .expect("dump should parse");
        assert_eq!(ctx.register("x28"), 0x10);
        assert_eq!(ctx.register("x15"), 4096);
    }

    #[test]
    fn json_dump_rejects_junk_values() {
        let err = RegisterSnapshot::from_json(r#"{"x0": true}"#).unwrap_err();
        assert!(matches!(err, ContextError::BadValue { .. }));
    }

    #[test]
    fn argument_slots_are_eight_bytes_apart() {
        let mut bytes = vec![0u8; 24];
        bytes[0..8].copy_from_slice(&111u64.to_le_bytes());
        bytes[8..16].copy_from_slice(&222u64.to_le_bytes());
        bytes[16..24].copy_from_slice(&333u64.to_le_bytes());
        let memory = SnapshotMemory::new(0x4000, bytes);

        let mut ctx = RegisterSnapshot::new();
        ctx.set("x15", 0x4000);
        let config = DecodeConfig::default();

        assert_eq!(read_argument(&ctx, &memory, &config, 0), 111);
        assert_eq!(read_argument(&ctx, &memory, &config, 1), 222);
        assert_eq!(read_argument(&ctx, &memory, &config, 2), 333);
    }
}

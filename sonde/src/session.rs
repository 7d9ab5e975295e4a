//! Per-attachment decode state: configuration plus the cached heap base.
//!
//! The heap base used to be process-global in the original tooling; here
//! it lives in an explicit session object the host creates once per
//! attachment and threads through every decode call.

use thiserror::Error;

use crate::{ExecutionContext, TaggedValue};

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The decompression arithmetic assumes 32-bit compressed heap
    /// references; running against an uncompressed-pointer VM build is a
    /// configuration-time failure, not a degradable decode error.
    #[error("uncompressed pointer mode is not supported")]
    UnsupportedPointerMode,
}

#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Maximum nesting level before reference expansion stops.
    pub max_depth: u32,
    /// Emit reference fields that resolve to null.
    pub show_null_fields: bool,
    /// Whether the target VM runs with compressed pointers. Only `true`
    /// is accepted in v1.
    pub compressed_pointers: bool,
    /// Register holding the upper half of the heap base, unshifted.
    pub heap_base_register: String,
    /// Register the argument slots are addressed from.
    pub stack_register: String,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        // arm64 AOT defaults, same as the generated hook script uses
        Self {
            max_depth: 5,
            show_null_fields: false,
            compressed_pointers: true,
            heap_base_register: "x28".to_string(),
            stack_register: "x15".to_string(),
        }
    }
}

/// Lives for one interception session. Single-threaded by contract: the
/// host must serialize events from simultaneously firing hooks, there is
/// no locking here.
#[derive(Debug)]
pub struct DecodeSession {
    pub config: DecodeConfig,
    heap_base: u64,
}

impl DecodeSession {
    pub fn new(config: DecodeConfig) -> Result<Self, ConfigError> {
        if !config.compressed_pointers {
            return Err(ConfigError::UnsupportedPointerMode);
        }
        Ok(Self {
            config,
            heap_base: 0,
        })
    }

    /// Captures the heap base from the designated register on the first
    /// event of the session. Idempotent: later calls are no-ops.
    pub fn ensure_heap_base(&mut self, ctx: &impl ExecutionContext) {
        if self.heap_base != 0 {
            return;
        }
        let upper = ctx.register(&self.config.heap_base_register);
        self.heap_base = upper << 32;
        log::debug!("heap base initialized to {:#x}", self.heap_base);
    }

    /// Pins the heap base directly (offline replay). First value wins,
    /// same contract as [`Self::ensure_heap_base`].
    pub fn set_heap_base(&mut self, base: u64) {
        if self.heap_base == 0 {
            self.heap_base = base;
        }
    }

    #[inline]
    pub fn heap_base(&self) -> u64 {
        self.heap_base
    }

    /// Reconstructs the absolute address of a compressed heap reference:
    /// heap base plus the sign-extended low 32 bits.
    ///
    /// Decompressing before the base is initialized is a caller error;
    /// it is logged and the decode continues against a zero base,
    /// producing wrong but non-crashing output.
    pub fn decompress(&self, value: TaggedValue) -> u64 {
        if self.heap_base == 0 {
            log::error!(
                "decompressing {:#x} with uninitialized heap base",
                value.raw()
            );
        }
        let offset = value.low_word().cast_signed() as i64;
        self.heap_base.wrapping_add(offset.cast_unsigned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegisterSnapshot;

    #[test]
    fn uncompressed_mode_is_rejected_at_construction() {
        let config = DecodeConfig {
            compressed_pointers: false,
            ..Default::default()
        };
        assert!(matches!(
            DecodeSession::new(config),
            Err(ConfigError::UnsupportedPointerMode)
        ));
    }

    #[test]
    fn heap_base_is_register_upper_half_shifted() {
        let mut session = DecodeSession::new(DecodeConfig::default()).unwrap();
        let mut ctx = RegisterSnapshot::new();
        ctx.set("x28", 0x12);
        session.ensure_heap_base(&ctx);
        assert_eq!(session.heap_base(), 0x12_0000_0000);
    }

    #[test]
    fn heap_base_init_is_idempotent() {
        let mut session = DecodeSession::new(DecodeConfig::default()).unwrap();
        let mut first = RegisterSnapshot::new();
        first.set("x28", 0x1);
        let mut second = RegisterSnapshot::new();
        second.set("x28", 0x2);

        session.ensure_heap_base(&first);
        session.ensure_heap_base(&second);
        assert_eq!(session.heap_base(), 0x1_0000_0000);
    }

    #[test]
    fn decompress_sign_extends_the_low_word() {
        let mut session = DecodeSession::new(DecodeConfig::default()).unwrap();
        session.set_heap_base(0x2_0000_0000);
        assert_eq!(
            session.decompress(TaggedValue::new(0x101)),
            0x2_0000_0101
        );
        // negative 32-bit offsets reach below the base
        assert_eq!(
            session.decompress(TaggedValue::new(0xFFFF_FFFF)),
            0x1_FFFF_FFFF
        );
    }

    #[test]
    fn decompress_with_zero_base_degrades_to_the_offset() {
        let session = DecodeSession::new(DecodeConfig::default()).unwrap();
        assert_eq!(session.decompress(TaggedValue::new(0x45)), 0x45);
    }
}

//! Tagged words as the Dart VM stores them: an address-sized value is
//! either an inline small integer (smi) or a reference into the managed
//! heap, told apart by the low bit. Classification is a pure function of
//! the bit pattern and never touches memory.

/// Low bit set means the word is a heap reference.
pub const HEAP_TAG_BIT: u64 = 0b1;

/// Smis carry their payload shifted up by one.
pub const SMI_SHIFT: u32 = 1;

/// A decompressed reference points one byte before the object header.
pub const HEAP_OBJECT_TAG: u64 = 1;

/// Tagged slots inside heap objects are compressed to 32 bits.
pub const COMPRESSED_WORD_SIZE: u64 = 4;

/// Unboxed fields always occupy a full native word, even in compressed
/// pointer mode.
pub const NATIVE_WORD_SIZE: u64 = 8;

/// A raw tagged word read from a register, stack slot or object field.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaggedValue(u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaggedKind {
    /// Inline small integer, payload carried in the word itself.
    Smi(i64),
    /// Compressed heap reference; meaningless until decompressed against
    /// the session heap base.
    HeapRef,
}

impl TaggedValue {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// The compressed half of the word. Stack arguments hold full
    /// pointers, but decompression only ever consumes these bits.
    #[inline]
    pub fn low_word(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn is_heap_ref(self) -> bool {
        self.0 & HEAP_TAG_BIT == HEAP_TAG_BIT
    }

    /// Smi payload via arithmetic right shift of the low 32 bits. The
    /// decoder supports only compressed-pointer mode, where every tagged
    /// slot is 32 bits wide.
    #[inline]
    pub fn smi_value(self) -> i64 {
        ((self.0 as u32).cast_signed() >> SMI_SHIFT) as i64
    }

    #[inline]
    pub fn classify(self) -> TaggedKind {
        if self.is_heap_ref() {
            TaggedKind::HeapRef
        } else {
            TaggedKind::Smi(self.smi_value())
        }
    }
}

impl From<u64> for TaggedValue {
    #[inline]
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<u32> for TaggedValue {
    /// Compressed slot reads zero-extend; only the low word matters.
    #[inline]
    fn from(raw: u32) -> Self {
        Self(raw as u64)
    }
}

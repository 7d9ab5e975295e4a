//! Static class metadata for the target VM. The table is produced by an
//! offline disassembly/analysis pass and injected read-only; nothing in
//! it is hard-coded because every constant is runtime-version specific.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::{Address, COMPRESSED_WORD_SIZE, MemoryReader};

pub type ClassId = u32;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read class table: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed class table: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bit position and width of the class-id field inside an object's
/// 32-bit header tag word.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderLayout {
    pub class_id_shift: u32,
    pub class_id_mask: u32,
}

impl Default for HeaderLayout {
    fn default() -> Self {
        // UntaggedObject::kClassIdTagPos / a 20-bit id field; overridable
        // per VM version through the table file
        Self {
            class_id_shift: 12,
            class_id_mask: 0xF_FFFF,
        }
    }
}

/// Predefined class ids the extractor special-cases. Supplied alongside
/// the table; ids shift between VM versions.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WellKnownCids {
    /// Root of every superclass chain.
    pub object: ClassId,
    pub null: ClassId,
    pub smi: ClassId,
    pub mint: ClassId,
    pub double: ClassId,
    #[serde(rename = "bool")]
    pub boolean: ClassId,
    pub one_byte_string: ClassId,
    pub two_byte_string: ClassId,
    pub array: ClassId,
    pub growable_array: ClassId,
    pub int8_array: ClassId,
    pub uint8_array: ClassId,
    pub int16_array: ClassId,
    pub uint16_array: ClassId,
    pub int32_array: ClassId,
    pub uint32_array: ClassId,
    pub int64_array: ClassId,
    pub uint64_array: ClassId,
}

/// One class-table entry. Offsets are in bytes from the untagged object
/// base; which of them is meaningful depends on the class.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassMetadata {
    pub id: ClassId,
    pub name: String,
    /// Immediate superclass id; the chain terminates at the root cid.
    #[serde(default)]
    pub sid: ClassId,
    /// Instance size in bytes, upper bound of the field walk.
    #[serde(default)]
    pub size: u64,
    /// Bit per compressed-word offset; a set bit marks an unboxed native
    /// word rather than a tagged reference.
    #[serde(default)]
    pub fbitmap: u64,
    #[serde(default, rename = "valOffset")]
    pub val_offset: u64,
    #[serde(default, rename = "lenOffset")]
    pub len_offset: u64,
    #[serde(default, rename = "dataOffset")]
    pub data_offset: u64,
    /// Generic type-argument slot; zero when the class has none (field
    /// ranges start at the root instance size, so offset zero is never
    /// walked).
    #[serde(default, rename = "argOffset")]
    pub arg_offset: u64,
}

impl ClassMetadata {
    #[inline]
    pub fn is_native_field(&self, offset: u64) -> bool {
        let idx = offset / COMPRESSED_WORD_SIZE;
        idx < u64::BITS as u64 && (self.fbitmap >> idx) & 1 == 1
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassTableFile {
    #[serde(default)]
    header: HeaderLayout,
    num_predefined_cids: ClassId,
    cids: WellKnownCids,
    classes: Vec<ClassMetadata>,
}

/// Immutable id-to-metadata mapping plus the runtime-ABI constants that
/// come with it.
#[derive(Debug)]
pub struct ClassTable {
    header: HeaderLayout,
    num_predefined_cids: ClassId,
    cids: WellKnownCids,
    classes: HashMap<ClassId, ClassMetadata>,
}

impl ClassTable {
    pub fn new(
        header: HeaderLayout,
        num_predefined_cids: ClassId,
        cids: WellKnownCids,
        classes: Vec<ClassMetadata>,
    ) -> Self {
        let classes = classes.into_iter().map(|c| (c.id, c)).collect();
        Self {
            header,
            num_predefined_cids,
            cids,
            classes,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, TableError> {
        let file: ClassTableFile = serde_json::from_str(text)?;
        Ok(Self::new(
            file.header,
            file.num_predefined_cids,
            file.cids,
            file.classes,
        ))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TableError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    #[inline]
    pub fn lookup(&self, id: ClassId) -> Option<&ClassMetadata> {
        self.classes.get(&id)
    }

    #[inline]
    pub fn is_predefined(&self, id: ClassId) -> bool {
        id < self.num_predefined_cids
    }

    #[inline]
    pub fn cids(&self) -> &WellKnownCids {
        &self.cids
    }

    #[inline]
    pub fn header(&self) -> HeaderLayout {
        self.header
    }

    /// Class id from the header tag word at an object's untagged base
    /// address.
    #[inline]
    pub fn class_id_of(&self, memory: &impl MemoryReader, addr: Address) -> ClassId {
        let tag = memory.read_u32(addr);
        (tag >> self.header.class_id_shift) & self.header.class_id_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SnapshotMemory;

    #[test]
    fn table_parses_the_generated_json_shape() {
        let text = r#"{
            "numPredefinedCids": 105,
            "cids": {
                "object": 5, "null": 7, "smi": 56, "mint": 57,
                "double": 58, "bool": 61, "oneByteString": 85,
                "twoByteString": 86, "array": 78, "growableArray": 79,
                "int8Array": 90, "uint8Array": 91, "int16Array": 92,
                "uint16Array": 93, "int32Array": 94, "uint32Array": 95,
                "int64Array": 96, "uint64Array": 97
            },
            "classes": [
                {"id": 5, "name": "Object", "size": 8},
                {"id": 58, "name": "double", "valOffset": 8},
                {"id": 1105, "name": "Point", "sid": 5, "size": 24,
                 "fbitmap": 12, "argOffset": 0}
            ]
        }"#;
        let table = ClassTable::from_json(text).expect("table should parse");

        assert_eq!(table.cids().double, 58);
        assert!(table.is_predefined(104));
        assert!(!table.is_predefined(1105));

        let point = table.lookup(1105).expect("Point entry");
        assert_eq!(point.sid, 5);
        assert_eq!(point.size, 24);
        assert!(point.is_native_field(8));
        assert!(point.is_native_field(12));
        assert!(!point.is_native_field(16));

        // defaulted header layout
        assert_eq!(table.header().class_id_shift, 12);
        assert_eq!(table.header().class_id_mask, 0xF_FFFF);
    }

    #[test]
    fn class_id_is_extracted_by_shift_and_mask() {
        let table = ClassTable::from_json(
            r#"{
                "header": {"classIdShift": 12, "classIdMask": 1048575},
                "numPredefinedCids": 10,
                "cids": {
                    "object": 1, "null": 2, "smi": 3, "mint": 4,
                    "double": 5, "bool": 6, "oneByteString": 7,
                    "twoByteString": 8, "array": 9, "growableArray": 10,
                    "int8Array": 11, "uint8Array": 12, "int16Array": 13,
                    "uint16Array": 14, "int32Array": 15, "uint32Array": 16,
                    "int64Array": 17, "uint64Array": 18
                },
                "classes": []
            }"#,
        )
        .unwrap();

        let tag: u32 = (777 << 12) | 0xABC;
        let memory = SnapshotMemory::new(0x100, tag.to_le_bytes().to_vec());
        assert_eq!(table.class_id_of(&memory, 0x100), 777);
    }

    #[test]
    fn missing_id_looks_up_to_none() {
        let table = ClassTable::new(
            HeaderLayout::default(),
            10,
            serde_json::from_str(
                r#"{"object":1,"null":2,"smi":3,"mint":4,"double":5,
                    "bool":6,"oneByteString":7,"twoByteString":8,"array":9,
                    "growableArray":10,"int8Array":11,"uint8Array":12,
                    "int16Array":13,"uint16Array":14,"int32Array":15,
                    "uint32Array":16,"int64Array":17,"uint64Array":18}"#,
            )
            .unwrap(),
            vec![],
        );
        assert!(table.lookup(9999).is_none());
    }
}

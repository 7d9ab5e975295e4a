//! The recursive value extractor. Given a raw tagged word it resolves
//! the referenced object's class, reconstructs its fields from the class
//! metadata and expands child references depth-first.
//!
//! Nothing in here returns `Err` or panics: this code runs inside a live
//! interception handler, so every malformed input degrades to a
//! placeholder value and the walk continues.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::{
    Address, COMPRESSED_WORD_SIZE, ClassId, ClassMetadata, ClassTable, DecodeSession,
    DecodedObject, ExecutionContext, ExtractedValue, HEAP_OBJECT_TAG, MemoryReader, TaggedKind,
    TaggedValue, WellKnownCids, read_argument,
};

/// Bound on superclass-chain collection. The table invariant says chains
/// are finite, but the table is external data and a corrupt `sid` loop
/// must not hang the host process.
const MAX_SUPERCLASS_CHAIN: usize = 256;

#[derive(Debug, Clone, Copy)]
enum TypedElement {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
}

impl TypedElement {
    fn for_cid(cids: &WellKnownCids, id: ClassId) -> Option<Self> {
        match id {
            _ if id == cids.uint8_array => Some(Self::U8),
            _ if id == cids.int8_array => Some(Self::I8),
            _ if id == cids.uint16_array => Some(Self::U16),
            _ if id == cids.int16_array => Some(Self::I16),
            _ if id == cids.uint32_array => Some(Self::U32),
            _ if id == cids.int32_array => Some(Self::I32),
            _ if id == cids.uint64_array => Some(Self::U64),
            _ if id == cids.int64_array => Some(Self::I64),
            _ => None,
        }
    }

    fn size(self) -> u64 {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
            Self::U64 | Self::I64 => 8,
        }
    }

    fn read(self, memory: &impl MemoryReader, addr: Address) -> ExtractedValue {
        match self {
            Self::U8 => ExtractedValue::Uint(memory.read_u8(addr) as u64),
            Self::I8 => ExtractedValue::Int(memory.read_i8(addr) as i64),
            Self::U16 => ExtractedValue::Uint(memory.read_u16(addr) as u64),
            Self::I16 => ExtractedValue::Int(memory.read_i16(addr) as i64),
            Self::U32 => ExtractedValue::Uint(memory.read_u32(addr) as u64),
            Self::I32 => ExtractedValue::Int(memory.read_i32(addr) as i64),
            Self::U64 => ExtractedValue::Uint(memory.read_u64(addr)),
            Self::I64 => ExtractedValue::Int(memory.read_i64(addr)),
        }
    }
}

/// Class resolution of one decoded reference, used for field labels.
#[derive(Debug, Clone)]
enum RefClass {
    Smi,
    Known { id: ClassId, name: String },
    Unknown(ClassId),
}

impl RefClass {
    fn display_name(&self) -> String {
        match self {
            Self::Smi => "Smi".to_string(),
            Self::Known { name, .. } => name.clone(),
            Self::Unknown(id) => format!("<cid {id}>"),
        }
    }
}

#[derive(Debug)]
struct DecodedRef {
    /// Absolute tagged address for heap objects, the raw word for smis.
    tagged_addr: u64,
    class: RefClass,
    value: ExtractedValue,
}

/// Decodes tagged heap words into [`ExtractedValue`] trees.
///
/// Collaborators are injected and read-only; the only state owned here is
/// the set of addresses on the active recursion path, which makes cyclic
/// object graphs terminate with a [`ExtractedValue::Cycle`] marker
/// instead of burning the whole depth budget.
pub struct Extractor<'a, M: MemoryReader> {
    memory: &'a M,
    table: &'a ClassTable,
    session: &'a DecodeSession,
    visited: HashSet<Address>,
}

impl<'a, M: MemoryReader> Extractor<'a, M> {
    pub fn new(memory: &'a M, table: &'a ClassTable, session: &'a DecodeSession) -> Self {
        Self {
            memory,
            table,
            session,
            visited: HashSet::new(),
        }
    }

    /// Plain synchronous entry point: decode whatever the raw tagged
    /// word refers to, up to the configured depth.
    pub fn decode(&mut self, raw: u64) -> DecodedObject {
        self.visited.clear();
        let decoded = self.decode_tagged(TaggedValue::new(raw), self.session.config.max_depth);
        DecodedObject {
            address: decoded.tagged_addr,
            class_name: decoded.class.display_name(),
            value: decoded.value,
        }
    }

    /// Decodes the `index`-th stack argument slot of an interception
    /// event.
    pub fn decode_argument(&mut self, ctx: &impl ExecutionContext, index: u32) -> DecodedObject {
        let raw = read_argument(ctx, self.memory, &self.session.config, index);
        self.decode(raw)
    }

    fn decode_tagged(&mut self, raw: TaggedValue, depth_left: u32) -> DecodedRef {
        match raw.classify() {
            TaggedKind::Smi(value) => DecodedRef {
                tagged_addr: raw.raw(),
                class: RefClass::Smi,
                value: ExtractedValue::Int(value),
            },
            TaggedKind::HeapRef => {
                let tagged_addr = self.session.decompress(raw);
                let obj = tagged_addr.wrapping_sub(HEAP_OBJECT_TAG);
                let table = self.table;
                let cid = table.class_id_of(self.memory, obj);
                let Some(cls) = table.lookup(cid) else {
                    log::warn!("unknown class id {cid} at {obj:#x}");
                    return DecodedRef {
                        tagged_addr,
                        class: RefClass::Unknown(cid),
                        value: ExtractedValue::diagnostic(format!("unknown class id: {cid}")),
                    };
                };

                let value = if self.visited.insert(obj) {
                    let value = self.decode_object(obj, cls, depth_left);
                    self.visited.remove(&obj);
                    value
                } else {
                    ExtractedValue::Cycle(tagged_addr)
                };

                DecodedRef {
                    tagged_addr,
                    class: RefClass::Known {
                        id: cls.id,
                        name: cls.name.clone(),
                    },
                    value,
                }
            }
        }
    }

    /// Dispatch over the predefined decoders, then the generic instance
    /// walk for user-defined classes.
    fn decode_object(
        &mut self,
        obj: Address,
        cls: &'a ClassMetadata,
        depth_left: u32,
    ) -> ExtractedValue {
        let cids = self.table.cids();
        let id = cls.id;

        if id == cids.null {
            return ExtractedValue::Null;
        }
        if id == cids.boolean {
            return ExtractedValue::Bool(self.memory.read_u8(obj.wrapping_add(cls.val_offset)) != 0);
        }
        if id == cids.mint {
            return ExtractedValue::Int(self.memory.read_i64(obj.wrapping_add(cls.val_offset)));
        }
        if id == cids.double {
            return ExtractedValue::Double(self.memory.read_f64(obj.wrapping_add(cls.val_offset)));
        }
        if id == cids.one_byte_string {
            let len = self.read_smi_length(obj, cls);
            return ExtractedValue::Text(
                self.memory
                    .read_utf8(obj.wrapping_add(cls.data_offset), len as usize),
            );
        }
        if id == cids.two_byte_string {
            let len = self.read_smi_length(obj, cls);
            return ExtractedValue::Text(
                self.memory
                    .read_utf16(obj.wrapping_add(cls.data_offset), len as usize),
            );
        }
        if id == cids.array {
            return self.decode_array(obj, cls, depth_left, None);
        }
        if id == cids.growable_array {
            return self.decode_growable_array(obj, cls, depth_left);
        }
        if let Some(element) = TypedElement::for_cid(cids, id) {
            return self.decode_typed_array(obj, cls, element);
        }

        if self.table.is_predefined(id) {
            log::warn!("unhandled predefined class id {id} ({})", cls.name);
            return ExtractedValue::diagnostic(format!(
                "unhandled class id: {id} ({})",
                cls.name
            ));
        }

        if depth_left == 0 {
            return ExtractedValue::Truncated;
        }

        self.decode_instance_tree(obj, cls, depth_left)
    }

    /// String and array lengths are stored as smis; undo the inline tag.
    #[inline]
    fn read_smi_length(&self, obj: Address, cls: &ClassMetadata) -> u32 {
        self.memory.read_u32(obj.wrapping_add(cls.len_offset)) >> 1
    }

    /// Fixed-length array: tagged compressed slots at `data_offset`.
    /// `explicit_len` overrides the object's own length field when a
    /// growable array delegates here with its logical length.
    fn decode_array(
        &mut self,
        obj: Address,
        cls: &ClassMetadata,
        depth_left: u32,
        explicit_len: Option<u32>,
    ) -> ExtractedValue {
        let len = explicit_len.unwrap_or_else(|| self.read_smi_length(obj, cls));
        let data = obj.wrapping_add(cls.data_offset);

        let mut values = Vec::with_capacity(len as usize);
        for i in 0..len as u64 {
            let slot = self
                .memory
                .read_u32(data.wrapping_add(i * COMPRESSED_WORD_SIZE));
            let element = self.decode_tagged(TaggedValue::from(slot), depth_left.saturating_sub(1));
            if self.is_bare_element(&element.class) {
                values.push(element.value);
            } else {
                // keep the class and address visible for non-scalar
                // elements, same shape as a reference field label
                let mut wrapped = IndexMap::with_capacity(1);
                wrapped.insert(
                    format!("{}@{:x}", element.class.display_name(), element.tagged_addr),
                    element.value,
                );
                values.push(ExtractedValue::Object(wrapped));
            }
        }
        ExtractedValue::List(values)
    }

    /// Growable array: logical length on the object itself, elements in a
    /// referenced backing array whose capacity may be larger.
    fn decode_growable_array(
        &mut self,
        obj: Address,
        cls: &ClassMetadata,
        depth_left: u32,
    ) -> ExtractedValue {
        let len = self.read_smi_length(obj, cls);
        let slot = self.memory.read_u32(obj.wrapping_add(cls.data_offset));
        let backing = TaggedValue::from(slot);
        if !backing.is_heap_ref() {
            return ExtractedValue::diagnostic("growable array backing store is not a heap object");
        }

        let table = self.table;
        let Some(array_cls) = table.lookup(table.cids().array) else {
            return ExtractedValue::diagnostic("class table has no fixed array entry");
        };

        let backing_obj = self.session.decompress(backing).wrapping_sub(HEAP_OBJECT_TAG);
        self.decode_array(backing_obj, array_cls, depth_left, Some(len))
    }

    /// Typed-data array: untagged fixed-width values, no recursion.
    fn decode_typed_array(
        &self,
        obj: Address,
        cls: &ClassMetadata,
        element: TypedElement,
    ) -> ExtractedValue {
        let len = self.read_smi_length(obj, cls);
        let data = obj.wrapping_add(cls.data_offset);
        let mut values = Vec::with_capacity(len as usize);
        for i in 0..len as u64 {
            values.push(element.read(self.memory, data.wrapping_add(i * element.size())));
        }
        ExtractedValue::List(values)
    }

    /// Generic instance walk: collect the superclass chain up to the
    /// root, then report each ancestor's own field range most-base first,
    /// the class's own fields last and unprefixed.
    fn decode_instance_tree(
        &mut self,
        obj: Address,
        cls: &'a ClassMetadata,
        depth_left: u32,
    ) -> ExtractedValue {
        let table = self.table;
        let root_cid = table.cids().object;

        let mut ancestors: Vec<&'a ClassMetadata> = Vec::new();
        let mut sid = cls.sid;
        let root = loop {
            if sid == root_cid {
                match table.lookup(root_cid) {
                    Some(root) => break root,
                    None => {
                        return ExtractedValue::diagnostic(
                            "class table has no root object entry",
                        );
                    }
                }
            }
            let Some(super_cls) = table.lookup(sid) else {
                log::warn!("missing superclass {sid} below {}", cls.name);
                return ExtractedValue::diagnostic(format!(
                    "missing superclass {sid} of {}",
                    cls.name
                ));
            };
            ancestors.push(super_cls);
            if ancestors.len() > MAX_SUPERCLASS_CHAIN {
                log::error!("superclass chain of {} does not reach the root", cls.name);
                return ExtractedValue::diagnostic(format!(
                    "superclass chain of {} exceeds {MAX_SUPERCLASS_CHAIN}",
                    cls.name
                ));
            }
            sid = super_cls.sid;
        };

        let mut values = IndexMap::new();
        let mut upper = root;
        while let Some(ancestor) = ancestors.pop() {
            let fields = self.instance_fields(obj, ancestor, upper, depth_left);
            values.insert(
                format!("parent!{}", ancestor.name),
                ExtractedValue::Object(fields),
            );
            upper = ancestor;
        }
        values.extend(self.instance_fields(obj, cls, upper, depth_left));
        ExtractedValue::Object(values)
    }

    /// Walks the half-open byte range `[base.size, cls.size)` of one
    /// class level, classifying each compressed-word offset through the
    /// field bitmap.
    fn instance_fields(
        &mut self,
        obj: Address,
        cls: &ClassMetadata,
        base: &ClassMetadata,
        depth_left: u32,
    ) -> IndexMap<String, ExtractedValue> {
        let null_cid = self.table.cids().null;
        let show_null = self.session.config.show_null_fields;

        let mut values = IndexMap::new();
        let mut offset = base.size;
        while offset < cls.size {
            if offset == cls.arg_offset {
                // type arguments are not decoded, skip the slot
                offset += COMPRESSED_WORD_SIZE;
            } else if cls.is_native_field(offset) {
                if !cls.is_native_field(offset + COMPRESSED_WORD_SIZE) {
                    log::error!(
                        "native field at {offset:#x} in {} marks only half a slot",
                        cls.name
                    );
                }
                let raw = self.memory.read_u64(obj.wrapping_add(offset));
                values.insert(format!("off_{offset:x}"), ExtractedValue::NativeWord(raw));
                offset += 2 * COMPRESSED_WORD_SIZE;
            } else {
                let slot = self.memory.read_u32(obj.wrapping_add(offset));
                let field =
                    self.decode_tagged(TaggedValue::from(slot), depth_left.saturating_sub(1));
                match &field.class {
                    RefClass::Smi => {
                        values.insert(format!("off_{offset:x}!Smi"), field.value);
                    }
                    RefClass::Known { id, .. } if *id == null_cid => {
                        if show_null {
                            values.insert(format!("off_{offset:x}"), field.value);
                        }
                    }
                    _ => {
                        values.insert(
                            format!(
                                "off_{offset:x}!{}@{:x}",
                                field.class.display_name(),
                                field.tagged_addr
                            ),
                            field.value,
                        );
                    }
                }
                offset += COMPRESSED_WORD_SIZE;
            }
        }
        values
    }

    /// Null, smi, boxed scalars and strings read as bare array elements;
    /// everything else keeps its class and address.
    fn is_bare_element(&self, class: &RefClass) -> bool {
        match class {
            RefClass::Smi => true,
            RefClass::Unknown(_) => false,
            RefClass::Known { id, .. } => {
                let c = self.table.cids();
                [
                    c.null,
                    c.mint,
                    c.double,
                    c.boolean,
                    c.one_byte_string,
                    c.two_byte_string,
                ]
                .contains(id)
            }
        }
    }
}

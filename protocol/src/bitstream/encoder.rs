use std::collections::HashMap;

use quilt_serde::{BitWrite, Serde, UnsignedVariableInteger};

use crate::bitstream::{
    schema::TypeSchema,
    shared_object::{SharedObjectId, SharedObjectRegistry, SharedRef},
    value::{tag, RecordValue, Value},
};

pub(crate) const SHARED_FULL: u64 = 0;
pub(crate) const SHARED_REF: u64 = 1;
pub(crate) const SHARED_DELTA: u64 = 2;

pub(crate) fn write_raw_bits(writer: &mut dyn BitWrite, value: u64, bits: u32) {
    let mut value = value;
    for _ in 0..bits {
        writer.write_bit(value & 1 != 0);
        value >>= 1;
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Mapping {
    Type(String),
    Object(SharedObjectId, RecordValue),
}

/// The type definitions and object snapshots written since the last
/// [`Encoder::take_batch`]. The carrier stores the batch against the packet
/// that carried it and feeds it back to [`Encoder::commit`] once that packet
/// is acknowledged.
#[derive(Debug, Default)]
pub struct MappingBatch(pub(crate) Vec<Mapping>);

impl MappingBatch {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug)]
struct TypeEntry {
    index: u64,
    committed: bool,
}

/// Encodes values into a bitstream, maintaining the per-stream type table and
/// shared-object baselines.
///
/// Until a type definition or object snapshot is committed, the encoder keeps
/// re-writing it in full; references and deltas are only ever emitted against
/// snapshots the peer has provably decoded, and each names the packet number
/// of the snapshot it assumes. An immediate-mode encoder (for loss-free
/// carriers) commits after every top-level value under packet number zero.
#[derive(Debug)]
pub struct Encoder {
    deferred: bool,
    types: HashMap<String, TypeEntry>,
    next_type_index: u64,
    baselines: HashMap<SharedObjectId, (u32, RecordValue)>,
    pending: Vec<Mapping>,
}

impl Encoder {
    /// An encoder for a loss-free carrier: every write commits immediately.
    pub fn new() -> Self {
        Self::with_deferral(false)
    }

    /// An encoder for a lossy carrier: writes stay pending until the caller
    /// commits the batch that carried them.
    pub fn deferred() -> Self {
        Self::with_deferral(true)
    }

    fn with_deferral(deferred: bool) -> Self {
        Self {
            deferred,
            types: HashMap::new(),
            next_type_index: 0,
            baselines: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn write_value(
        &mut self,
        writer: &mut dyn BitWrite,
        registry: &mut SharedObjectRegistry,
        value: &Value,
    ) {
        self.write_value_inner(writer, registry, value);
        if !self.deferred {
            let batch = self.take_batch();
            self.commit(batch, 0);
        }
    }

    /// Drains the mappings written since the last call.
    pub fn take_batch(&mut self) -> MappingBatch {
        MappingBatch(std::mem::take(&mut self.pending))
    }

    /// Marks a batch's mappings as known to the peer, recorded against the
    /// packet that carried them. From here on the encoder references them
    /// instead of re-writing them.
    pub fn commit(&mut self, batch: MappingBatch, packet_number: u32) {
        for mapping in batch.0 {
            match mapping {
                Mapping::Type(name) => {
                    if let Some(entry) = self.types.get_mut(&name) {
                        entry.committed = true;
                    }
                }
                Mapping::Object(id, state) => {
                    self.baselines.insert(id, (packet_number, state));
                }
            }
        }
    }

    /// The oldest packet number any committed baseline still names. The peer
    /// may discard decode records below it.
    pub fn commit_floor(&self) -> Option<u32> {
        self.baselines.values().map(|(packet, _)| *packet).min()
    }

    fn write_value_inner(
        &mut self,
        writer: &mut dyn BitWrite,
        registry: &mut SharedObjectRegistry,
        value: &Value,
    ) {
        match value {
            Value::Null => write_raw_bits(writer, tag::NULL as u64, 4),
            Value::Bool(value) => {
                write_raw_bits(writer, tag::BOOL as u64, 4);
                value.ser(writer);
            }
            Value::Int(value) => {
                write_raw_bits(writer, tag::INT as u64, 4);
                value.ser(writer);
            }
            Value::Float(value) => {
                write_raw_bits(writer, tag::FLOAT as u64, 4);
                value.ser(writer);
            }
            Value::Bytes(bytes) => {
                write_raw_bits(writer, tag::BYTES as u64, 4);
                bytes.ser(writer);
            }
            Value::Str(text) => {
                write_raw_bits(writer, tag::STR as u64, 4);
                text.ser(writer);
            }
            Value::List(values) => {
                write_raw_bits(writer, tag::LIST as u64, 4);
                UnsignedVariableInteger::<7>::new(values.len() as u64).ser(writer);
                for value in values {
                    self.write_value_inner(writer, registry, value);
                }
            }
            Value::Record(record) => {
                write_raw_bits(writer, tag::RECORD as u64, 4);
                self.write_record(writer, registry, record);
            }
            Value::Enum(value) => {
                write_raw_bits(writer, tag::ENUM as u64, 4);
                self.write_type_ref(writer, &TypeSchema::Enum(value.schema.clone()));
                write_raw_bits(writer, value.index as u64, value.schema.index_bits());
            }
            Value::Flags(value) => {
                write_raw_bits(writer, tag::FLAGS as u64, 4);
                self.write_type_ref(writer, &TypeSchema::Enum(value.schema.clone()));
                write_raw_bits(writer, value.bits, value.schema.variants.len() as u32);
            }
            Value::Shared(object) => {
                write_raw_bits(writer, tag::SHARED as u64, 4);
                self.write_shared(writer, registry, object);
            }
        }
    }

    fn write_record(
        &mut self,
        writer: &mut dyn BitWrite,
        registry: &mut SharedObjectRegistry,
        record: &RecordValue,
    ) {
        self.write_type_ref(writer, &TypeSchema::Record(record.schema.clone()));
        for value in &record.values {
            self.write_value_inner(writer, registry, value);
        }
    }

    /// Writes a reference to a committed type table entry, or the full
    /// definition otherwise. A type keeps its tentative index across
    /// re-definitions so the peer's table stays consistent no matter which
    /// carrying packet arrives first.
    fn write_type_ref(&mut self, writer: &mut dyn BitWrite, schema: &TypeSchema) {
        let name = schema.name();
        if let Some(entry) = self.types.get(name) {
            if entry.committed {
                writer.write_bit(false);
                UnsignedVariableInteger::<7>::new(entry.index).ser(writer);
                return;
            }
        }

        let index = match self.types.get(name) {
            Some(entry) => entry.index,
            None => {
                let index = self.next_type_index;
                self.next_type_index += 1;
                self.types.insert(
                    name.to_string(),
                    TypeEntry {
                        index,
                        committed: false,
                    },
                );
                index
            }
        };

        writer.write_bit(true);
        UnsignedVariableInteger::<7>::new(index).ser(writer);
        match schema {
            TypeSchema::Record(schema) => {
                writer.write_bit(false);
                schema.name.ser(writer);
                UnsignedVariableInteger::<7>::new(schema.fields.len() as u64).ser(writer);
                for field in &schema.fields {
                    field.ser(writer);
                }
            }
            TypeSchema::Enum(schema) => {
                writer.write_bit(true);
                schema.name.ser(writer);
                UnsignedVariableInteger::<7>::new(schema.variants.len() as u64).ser(writer);
                for variant in &schema.variants {
                    variant.ser(writer);
                }
            }
        }
        self.pending.push(Mapping::Type(name.to_string()));
    }

    fn write_shared(
        &mut self,
        writer: &mut dyn BitWrite,
        registry: &mut SharedObjectRegistry,
        object: &SharedRef,
    ) {
        let id = registry.resolve_or_register(object);
        let current = object.state();
        let baseline = self.baselines.get(&id).cloned();

        match baseline {
            Some((packet, baseline)) if baseline == current => {
                write_raw_bits(writer, SHARED_REF, 2);
                id.ser(writer);
                UnsignedVariableInteger::<7>::new(packet as u64).ser(writer);
            }
            Some((packet, baseline)) if baseline.schema == current.schema => {
                write_raw_bits(writer, SHARED_DELTA, 2);
                id.ser(writer);
                UnsignedVariableInteger::<7>::new(packet as u64).ser(writer);
                let changed: Vec<usize> = (0..current.values.len())
                    .filter(|&index| baseline.values[index] != current.values[index])
                    .collect();
                UnsignedVariableInteger::<7>::new(changed.len() as u64).ser(writer);
                for index in changed {
                    UnsignedVariableInteger::<7>::new(index as u64).ser(writer);
                    let value = current.values[index].clone();
                    self.write_value_inner(writer, registry, &value);
                }
                self.pending.push(Mapping::Object(id, current));
            }
            _ => {
                write_raw_bits(writer, SHARED_FULL, 2);
                id.ser(writer);
                self.write_record(writer, registry, &current);
                self.pending.push(Mapping::Object(id, current));
            }
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

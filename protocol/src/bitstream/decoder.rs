use std::{
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use quilt_serde::{BitReader, Serde, SerdeErr, UnsignedVariableInteger};

use crate::bitstream::{
    encoder::{SHARED_DELTA, SHARED_FULL, SHARED_REF},
    error::BitstreamError,
    schema::{EnumSchema, RecordSchema, Substitutions, TypeRegistry, TypeSchema},
    shared_object::{SharedObjectId, SharedObjectRegistry, SharedRef},
    value::{tag, EnumValue, FlagsValue, RecordValue, Value},
};

pub(crate) fn read_raw_bits(reader: &mut BitReader, bits: u32) -> Result<u64, SerdeErr> {
    let mut value: u64 = 0;
    for i in 0..bits {
        if reader.read_bit()? {
            value |= 1 << i;
        }
    }
    Ok(value)
}

/// How decoded type metadata is resolved against local knowledge.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DecodeMode {
    /// Every wire type must be registered locally under the same name.
    #[default]
    ExactTypes,
    /// Nothing is resolved; values keep the schemas the wire carried. Used to
    /// inspect or relay streams whose types are not known locally.
    AllGenerics,
    /// Wire names are remapped before resolution; unmapped names fall back to
    /// exact matching.
    Substituted(Substitutions),
}

/// Decodes values out of a bitstream, mirroring [`Encoder`]'s type table and
/// keeping per-packet snapshots of decoded object state so a later reference
/// or delta can name the exact snapshot it was encoded against.
///
/// [`Encoder`]: crate::bitstream::Encoder
#[derive(Debug)]
pub struct Decoder {
    deferred: bool,
    mode: DecodeMode,
    types: HashMap<u64, TypeSchema>,
    records: BTreeMap<u32, HashMap<SharedObjectId, RecordValue>>,
    // strong refs so stream-decoded objects outlive application interest
    live: HashMap<SharedObjectId, SharedRef>,
    current_packet: u32,
    pending: Vec<(SharedObjectId, RecordValue)>,
}

impl Decoder {
    /// A decoder for a loss-free carrier: snapshots are recorded under packet
    /// number zero, which is what an immediate-mode encoder's references
    /// name.
    pub fn new(mode: DecodeMode) -> Self {
        Self::with_deferral(mode, false)
    }

    /// A decoder for a lossy carrier: the caller brackets each datagram with
    /// [`begin_packet`](Self::begin_packet) and
    /// [`finish_packet`](Self::finish_packet) so snapshots land under the
    /// right packet number.
    pub fn deferred(mode: DecodeMode) -> Self {
        Self::with_deferral(mode, true)
    }

    fn with_deferral(mode: DecodeMode, deferred: bool) -> Self {
        Self {
            deferred,
            mode,
            types: HashMap::new(),
            records: BTreeMap::new(),
            live: HashMap::new(),
            current_packet: 0,
            pending: Vec::new(),
        }
    }

    pub fn decode_value(
        &mut self,
        reader: &mut BitReader,
        types: &TypeRegistry,
        registry: &mut SharedObjectRegistry,
    ) -> Result<Value, BitstreamError> {
        let value = self.decode_value_inner(reader, types, registry)?;
        if !self.deferred {
            self.finish_packet();
        }
        Ok(value)
    }

    /// Starts recording snapshots for a datagram.
    pub fn begin_packet(&mut self, packet_number: u32) {
        self.current_packet = packet_number;
        self.pending.clear();
    }

    /// Files the snapshots decoded since [`begin_packet`](Self::begin_packet)
    /// under its packet number.
    pub fn finish_packet(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let record = self.records.entry(self.current_packet).or_default();
        for (id, state) in self.pending.drain(..) {
            record.insert(id, state);
        }
    }

    /// Discards pending snapshots, e.g. after a mid-datagram decode failure.
    pub fn discard_packet(&mut self) {
        self.pending.clear();
    }

    /// Drops snapshot records no committed baseline can name any more, per
    /// the peer's advertised commit floor.
    pub fn prune_records_below(&mut self, floor: u32) {
        self.records = self.records.split_off(&floor);
    }

    fn baseline(
        &self,
        id: SharedObjectId,
        packet: u32,
    ) -> Result<RecordValue, BitstreamError> {
        self.records
            .get(&packet)
            .and_then(|record| record.get(&id))
            .cloned()
            .ok_or(BitstreamError::MissingObjectBaseline { id })
    }

    fn decode_value_inner(
        &mut self,
        reader: &mut BitReader,
        types: &TypeRegistry,
        registry: &mut SharedObjectRegistry,
    ) -> Result<Value, BitstreamError> {
        let tag = read_raw_bits(reader, 4)? as u8;
        match tag {
            tag::NULL => Ok(Value::Null),
            tag::BOOL => Ok(Value::Bool(bool::de(reader)?)),
            tag::INT => Ok(Value::Int(i64::de(reader)?)),
            tag::FLOAT => Ok(Value::Float(f32::de(reader)?)),
            tag::BYTES => Ok(Value::Bytes(Vec::<u8>::de(reader)?)),
            tag::STR => Ok(Value::Str(String::de(reader)?)),
            tag::LIST => {
                let length = UnsignedVariableInteger::<7>::de(reader)?.get();
                let mut values = Vec::new();
                for _ in 0..length {
                    values.push(self.decode_value_inner(reader, types, registry)?);
                }
                Ok(Value::List(values))
            }
            tag::RECORD => {
                let (_, resolved) = self.decode_record(reader, types, registry)?;
                Ok(Value::Record(resolved))
            }
            tag::ENUM => {
                let wire = self.read_enum_ref(reader)?;
                let index = read_raw_bits(reader, wire.index_bits())?;
                if index as usize >= wire.variants.len() {
                    return Err(BitstreamError::MalformedDatagram {
                        reason: "enum variant index out of range",
                    });
                }
                resolve_enum(&self.mode, types, &wire, index as u32)
            }
            tag::FLAGS => {
                let wire = self.read_enum_ref(reader)?;
                if wire.variants.len() > 64 {
                    return Err(BitstreamError::MalformedDatagram {
                        reason: "flag set wider than 64 variants",
                    });
                }
                let bits = read_raw_bits(reader, wire.variants.len() as u32)?;
                resolve_flags(&self.mode, types, &wire, bits)
            }
            tag::SHARED => self.decode_shared(reader, types, registry),
            tag => Err(BitstreamError::InvalidTag { tag }),
        }
    }

    fn read_type_ref(&mut self, reader: &mut BitReader) -> Result<TypeSchema, BitstreamError> {
        if reader.read_bit()? {
            // full definition; later definitions of an index must agree, so
            // overwriting is harmless
            let index = UnsignedVariableInteger::<7>::de(reader)?.get();
            let is_enum = reader.read_bit()?;
            let name = String::de(reader)?;
            let count = UnsignedVariableInteger::<7>::de(reader)?.get();
            let mut names = Vec::new();
            for _ in 0..count {
                names.push(String::de(reader)?);
            }
            let schema = if is_enum {
                TypeSchema::Enum(Rc::new(EnumSchema {
                    name,
                    variants: names,
                }))
            } else {
                TypeSchema::Record(Rc::new(RecordSchema { name, fields: names }))
            };
            self.types.insert(index, schema.clone());
            Ok(schema)
        } else {
            let index = UnsignedVariableInteger::<7>::de(reader)?.get();
            self.types
                .get(&index)
                .cloned()
                .ok_or(BitstreamError::UnknownTypeIndex { index })
        }
    }

    fn read_enum_ref(&mut self, reader: &mut BitReader) -> Result<Rc<EnumSchema>, BitstreamError> {
        match self.read_type_ref(reader)? {
            TypeSchema::Enum(schema) => Ok(schema),
            TypeSchema::Record(_) => Err(BitstreamError::MalformedDatagram {
                reason: "record metadata where enumeration expected",
            }),
        }
    }

    /// Decodes a record, returning both the wire-shaped instance (fields in
    /// the sender's order, for delta bookkeeping) and the locally resolved
    /// one.
    fn decode_record(
        &mut self,
        reader: &mut BitReader,
        types: &TypeRegistry,
        registry: &mut SharedObjectRegistry,
    ) -> Result<(RecordValue, RecordValue), BitstreamError> {
        let wire = match self.read_type_ref(reader)? {
            TypeSchema::Record(schema) => schema,
            TypeSchema::Enum(_) => {
                return Err(BitstreamError::MalformedDatagram {
                    reason: "enumeration metadata where record expected",
                })
            }
        };
        let mut values = Vec::with_capacity(wire.fields.len());
        for _ in 0..wire.fields.len() {
            values.push(self.decode_value_inner(reader, types, registry)?);
        }
        let resolved = resolve_record(&self.mode, types, &wire, values.clone())?;
        let wire_record = RecordValue {
            schema: wire,
            values,
        };
        Ok((wire_record, resolved))
    }

    fn decode_shared(
        &mut self,
        reader: &mut BitReader,
        types: &TypeRegistry,
        registry: &mut SharedObjectRegistry,
    ) -> Result<Value, BitstreamError> {
        let mode = read_raw_bits(reader, 2)?;
        let id = SharedObjectId::de(reader)?;
        match mode {
            SHARED_FULL => {
                let (wire_record, resolved) = self.decode_record(reader, types, registry)?;
                let object = self.install(id, resolved, registry);
                self.pending.push((id, wire_record));
                Ok(Value::Shared(object))
            }
            SHARED_REF => {
                let packet = UnsignedVariableInteger::<7>::de(reader)?.get() as u32;
                let wire_record = self.baseline(id, packet)?;
                // the named snapshot is authoritative; a newer decoded state
                // may have been rolled back on the sending side
                let resolved = resolve_record(
                    &self.mode,
                    types,
                    &wire_record.schema.clone(),
                    wire_record.values.clone(),
                )?;
                let object = self.install(id, resolved, registry);
                Ok(Value::Shared(object))
            }
            SHARED_DELTA => {
                let packet = UnsignedVariableInteger::<7>::de(reader)?.get() as u32;
                let mut wire_record = self.baseline(id, packet)?;
                let count = UnsignedVariableInteger::<7>::de(reader)?.get();
                for _ in 0..count {
                    let index = UnsignedVariableInteger::<7>::de(reader)?.get() as usize;
                    let value = self.decode_value_inner(reader, types, registry)?;
                    if index >= wire_record.values.len() {
                        return Err(BitstreamError::DeltaFieldOutOfRange { index });
                    }
                    wire_record.values[index] = value;
                }
                let resolved = resolve_record(
                    &self.mode,
                    types,
                    &wire_record.schema.clone(),
                    wire_record.values.clone(),
                )?;
                let object = self.install(id, resolved, registry);
                self.pending.push((id, wire_record));
                Ok(Value::Shared(object))
            }
            _ => Err(BitstreamError::MalformedDatagram {
                reason: "invalid shared object mode",
            }),
        }
    }

    /// Applies new state to the live object for an id, creating and adopting
    /// one if this is its first appearance.
    fn install(
        &mut self,
        id: SharedObjectId,
        state: RecordValue,
        registry: &mut SharedObjectRegistry,
    ) -> SharedRef {
        if let Some(object) = self.live.get(&id) {
            object.set_state(state);
            return object.clone();
        }
        if let Some(object) = registry.lookup(id) {
            object.set_state(state);
            self.live.insert(id, object.clone());
            return object;
        }
        let object = SharedRef::new(state);
        registry.adopt(id, &object);
        self.live.insert(id, object.clone());
        object
    }
}

/// Resolves a wire record against the local type registry per the decode
/// mode. Fields are matched by name; locally known fields the wire lacks
/// become [`Value::Null`].
pub(crate) fn resolve_record(
    mode: &DecodeMode,
    types: &TypeRegistry,
    wire: &Rc<RecordSchema>,
    values: Vec<Value>,
) -> Result<RecordValue, BitstreamError> {
    let local_name = match mode {
        DecodeMode::AllGenerics => {
            return Ok(RecordValue {
                schema: wire.clone(),
                values,
            })
        }
        DecodeMode::ExactTypes => wire.name.as_str(),
        DecodeMode::Substituted(subs) => subs.map_type(&wire.name),
    };
    let local = types
        .record(local_name)
        .ok_or_else(|| BitstreamError::TypeMismatch {
            name: wire.name.clone(),
        })?;

    let mut slots: Vec<Option<Value>> = values.into_iter().map(Some).collect();
    let values = local
        .fields
        .iter()
        .map(|field| {
            wire.field_index(field)
                .and_then(|index| slots[index].take())
                .unwrap_or(Value::Null)
        })
        .collect();
    Ok(RecordValue {
        schema: local,
        values,
    })
}

/// Resolves a wire enum value, remapping the variant by name. A variant with
/// no local counterpart keeps its index when that index exists locally.
pub(crate) fn resolve_enum(
    mode: &DecodeMode,
    types: &TypeRegistry,
    wire: &Rc<EnumSchema>,
    index: u32,
) -> Result<Value, BitstreamError> {
    let local_name = match mode {
        DecodeMode::AllGenerics => {
            return Ok(Value::Enum(EnumValue {
                schema: wire.clone(),
                index,
            }))
        }
        DecodeMode::ExactTypes => wire.name.as_str(),
        DecodeMode::Substituted(subs) => subs.map_enum(&wire.name),
    };
    let local = types
        .enumeration(local_name)
        .ok_or_else(|| BitstreamError::TypeMismatch {
            name: wire.name.clone(),
        })?;

    let mapped = wire
        .variants
        .get(index as usize)
        .and_then(|variant| local.variant_index(variant))
        .or_else(|| {
            if (index as usize) < local.variants.len() {
                Some(index)
            } else {
                None
            }
        });
    let index = match mapped {
        Some(index) => index,
        None => {
            log::warn!(
                "variant {index} of enumeration `{}` has no local counterpart",
                wire.name
            );
            0
        }
    };
    Ok(Value::Enum(EnumValue {
        schema: local,
        index,
    }))
}

/// Resolves a wire flag set, remapping each set bit by variant name. A bit
/// with no local counterpart keeps its position when that position exists
/// locally, and is dropped otherwise.
pub(crate) fn resolve_flags(
    mode: &DecodeMode,
    types: &TypeRegistry,
    wire: &Rc<EnumSchema>,
    bits: u64,
) -> Result<Value, BitstreamError> {
    let local_name = match mode {
        DecodeMode::AllGenerics => {
            return Ok(Value::Flags(FlagsValue {
                schema: wire.clone(),
                bits,
            }))
        }
        DecodeMode::ExactTypes => wire.name.as_str(),
        DecodeMode::Substituted(subs) => subs.map_enum(&wire.name),
    };
    let local = types
        .enumeration(local_name)
        .ok_or_else(|| BitstreamError::TypeMismatch {
            name: wire.name.clone(),
        })?;

    let mut mapped: u64 = 0;
    for (position, variant) in wire.variants.iter().enumerate() {
        if bits & (1 << position) == 0 {
            continue;
        }
        match local
            .variant_index(variant)
            .map(|index| index as usize)
            .or_else(|| (position < local.variants.len()).then_some(position))
        {
            Some(index) => mapped |= 1 << index,
            None => log::warn!(
                "flag `{variant}` of `{}` has no local counterpart",
                wire.name
            ),
        }
    }
    Ok(Value::Flags(FlagsValue {
        schema: local,
        bits: mapped,
    }))
}

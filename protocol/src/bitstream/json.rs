use std::collections::{HashMap, HashSet};

use serde_json::{json, Value as Json};

use crate::bitstream::{
    decoder::{resolve_enum, resolve_flags, resolve_record, DecodeMode},
    error::BitstreamError,
    schema::{EnumSchema, RecordSchema, TypeRegistry, TypeSchema},
    shared_object::{SharedObjectId, SharedObjectRegistry, SharedRef},
    value::{RecordValue, Value},
};

fn malformed(reason: &'static str) -> BitstreamError {
    BitstreamError::MalformedDocument { reason }
}

/// Builds the JSON document form of a value stream: a type table plus a list
/// of values referencing it. Documents are self-contained, so shared objects
/// appear in full on first use and by reference afterwards; there is no delta
/// form.
#[derive(Debug, Default)]
pub struct JsonWriter {
    types: Vec<Json>,
    type_indices: HashMap<String, u64>,
    objects: HashSet<SharedObjectId>,
    values: Vec<Json>,
}

impl JsonWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_value(&mut self, registry: &mut SharedObjectRegistry, value: &Value) {
        let encoded = self.encode(registry, value);
        self.values.push(encoded);
    }

    pub fn finish(self) -> Json {
        json!({ "types": self.types, "values": self.values })
    }

    fn encode(&mut self, registry: &mut SharedObjectRegistry, value: &Value) -> Json {
        match value {
            Value::Null => Json::Null,
            Value::Bool(value) => json!({ "bool": value }),
            Value::Int(value) => json!({ "int": value }),
            Value::Float(value) => json!({ "float": value }),
            Value::Bytes(bytes) => json!({ "bytes": bytes }),
            Value::Str(text) => json!({ "str": text }),
            Value::List(values) => {
                let items: Vec<Json> = values
                    .iter()
                    .map(|value| self.encode(registry, value))
                    .collect();
                json!({ "list": items })
            }
            Value::Record(record) => {
                let encoded = self.encode_record(registry, record);
                json!({ "record": encoded })
            }
            Value::Enum(value) => {
                let index = self.type_index(&TypeSchema::Enum(value.schema.clone()));
                json!({ "enum": { "type": index, "index": value.index } })
            }
            Value::Flags(value) => {
                let index = self.type_index(&TypeSchema::Enum(value.schema.clone()));
                json!({ "flags": { "type": index, "bits": value.bits } })
            }
            Value::Shared(object) => {
                let id = registry.resolve_or_register(object);
                if self.objects.insert(id) {
                    let state = object.state();
                    let encoded = self.encode_record(registry, &state);
                    json!({ "shared": { "origin": id.origin, "local": id.local, "state": encoded } })
                } else {
                    json!({ "shared": { "origin": id.origin, "local": id.local } })
                }
            }
        }
    }

    fn encode_record(&mut self, registry: &mut SharedObjectRegistry, record: &RecordValue) -> Json {
        let index = self.type_index(&TypeSchema::Record(record.schema.clone()));
        let fields: Vec<Json> = record
            .values
            .iter()
            .map(|value| self.encode(registry, value))
            .collect();
        json!({ "type": index, "fields": fields })
    }

    fn type_index(&mut self, schema: &TypeSchema) -> u64 {
        if let Some(&index) = self.type_indices.get(schema.name()) {
            return index;
        }
        let index = self.types.len() as u64;
        self.types.push(match schema {
            TypeSchema::Record(schema) => {
                json!({ "kind": "record", "name": schema.name, "fields": schema.fields })
            }
            TypeSchema::Enum(schema) => {
                json!({ "kind": "enum", "name": schema.name, "variants": schema.variants })
            }
        });
        self.type_indices.insert(schema.name().to_string(), index);
        index
    }
}

/// Reads a JSON document produced by [`JsonWriter`] back into values, under
/// the same resolution modes as the binary decoder.
pub fn read_document(
    mode: &DecodeMode,
    types: &TypeRegistry,
    registry: &mut SharedObjectRegistry,
    document: &Json,
) -> Result<Vec<Value>, BitstreamError> {
    let table = document
        .get("types")
        .and_then(Json::as_array)
        .ok_or_else(|| malformed("missing type table"))?
        .iter()
        .map(parse_table_entry)
        .collect::<Result<Vec<_>, _>>()?;
    let values = document
        .get("values")
        .and_then(Json::as_array)
        .ok_or_else(|| malformed("missing value list"))?;

    let mut reader = DocumentReader {
        mode,
        types,
        table,
        live: HashMap::new(),
    };
    values
        .iter()
        .map(|value| reader.decode(registry, value))
        .collect()
}

fn parse_table_entry(entry: &Json) -> Result<TypeSchema, BitstreamError> {
    let kind = entry
        .get("kind")
        .and_then(Json::as_str)
        .ok_or_else(|| malformed("type table entry without kind"))?;
    let name = entry
        .get("name")
        .and_then(Json::as_str)
        .ok_or_else(|| malformed("type table entry without name"))?;
    let names = |key: &str| -> Result<Vec<&str>, BitstreamError> {
        entry
            .get(key)
            .and_then(Json::as_array)
            .ok_or_else(|| malformed("type table entry without member names"))?
            .iter()
            .map(|name| {
                name.as_str()
                    .ok_or_else(|| malformed("non-string member name"))
            })
            .collect()
    };
    match kind {
        "record" => Ok(TypeSchema::Record(RecordSchema::new(name, &names("fields")?))),
        "enum" => Ok(TypeSchema::Enum(EnumSchema::new(name, &names("variants")?))),
        _ => Err(malformed("unknown type table entry kind")),
    }
}

struct DocumentReader<'a> {
    mode: &'a DecodeMode,
    types: &'a TypeRegistry,
    table: Vec<TypeSchema>,
    live: HashMap<SharedObjectId, SharedRef>,
}

impl DocumentReader<'_> {
    fn decode(
        &mut self,
        registry: &mut SharedObjectRegistry,
        value: &Json,
    ) -> Result<Value, BitstreamError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let object = value
            .as_object()
            .ok_or_else(|| malformed("value is neither null nor an object"))?;
        let (key, body) = object
            .iter()
            .next()
            .ok_or_else(|| malformed("empty value object"))?;
        match key.as_str() {
            "bool" => Ok(Value::Bool(
                body.as_bool().ok_or_else(|| malformed("bad bool"))?,
            )),
            "int" => Ok(Value::Int(
                body.as_i64().ok_or_else(|| malformed("bad int"))?,
            )),
            "float" => Ok(Value::Float(
                body.as_f64().ok_or_else(|| malformed("bad float"))? as f32,
            )),
            "bytes" => {
                let bytes = body
                    .as_array()
                    .ok_or_else(|| malformed("bad bytes"))?
                    .iter()
                    .map(|byte| {
                        byte.as_u64()
                            .filter(|&byte| byte <= u8::MAX as u64)
                            .map(|byte| byte as u8)
                            .ok_or_else(|| malformed("byte out of range"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Bytes(bytes))
            }
            "str" => Ok(Value::str(
                body.as_str().ok_or_else(|| malformed("bad string"))?,
            )),
            "list" => {
                let items = body.as_array().ok_or_else(|| malformed("bad list"))?;
                let values = items
                    .iter()
                    .map(|item| self.decode(registry, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(values))
            }
            "record" => {
                let (_, resolved) = self.decode_record(registry, body)?;
                Ok(Value::Record(resolved))
            }
            "enum" => {
                let schema = self.enum_entry(body)?;
                let index = body
                    .get("index")
                    .and_then(Json::as_u64)
                    .filter(|&index| (index as usize) < schema.variants.len())
                    .ok_or_else(|| malformed("enum variant index out of range"))?;
                resolve_enum(self.mode, self.types, &schema, index as u32)
            }
            "flags" => {
                let schema = self.enum_entry(body)?;
                if schema.variants.len() > 64 {
                    return Err(malformed("flag set wider than 64 variants"));
                }
                let bits = body
                    .get("bits")
                    .and_then(Json::as_u64)
                    .ok_or_else(|| malformed("bad flag bits"))?;
                resolve_flags(self.mode, self.types, &schema, bits)
            }
            "shared" => self.decode_shared(registry, body),
            _ => Err(malformed("unknown value kind")),
        }
    }

    fn table_entry(&self, body: &Json) -> Result<TypeSchema, BitstreamError> {
        let index = body
            .get("type")
            .and_then(Json::as_u64)
            .ok_or_else(|| malformed("missing type index"))?;
        self.table
            .get(index as usize)
            .cloned()
            .ok_or_else(|| malformed("type index out of range"))
    }

    fn enum_entry(&self, body: &Json) -> Result<std::rc::Rc<EnumSchema>, BitstreamError> {
        match self.table_entry(body)? {
            TypeSchema::Enum(schema) => Ok(schema),
            TypeSchema::Record(_) => Err(malformed("record metadata where enumeration expected")),
        }
    }

    fn decode_record(
        &mut self,
        registry: &mut SharedObjectRegistry,
        body: &Json,
    ) -> Result<(RecordValue, RecordValue), BitstreamError> {
        let wire = match self.table_entry(body)? {
            TypeSchema::Record(schema) => schema,
            TypeSchema::Enum(_) => {
                return Err(malformed("enumeration metadata where record expected"))
            }
        };
        let fields = body
            .get("fields")
            .and_then(Json::as_array)
            .ok_or_else(|| malformed("record without fields"))?;
        if fields.len() != wire.fields.len() {
            return Err(malformed("record field count does not match schema"));
        }
        let values = fields
            .iter()
            .map(|field| self.decode(registry, field))
            .collect::<Result<Vec<_>, _>>()?;
        let resolved = resolve_record(self.mode, self.types, &wire, values.clone())?;
        Ok((
            RecordValue {
                schema: wire,
                values,
            },
            resolved,
        ))
    }

    fn decode_shared(
        &mut self,
        registry: &mut SharedObjectRegistry,
        body: &Json,
    ) -> Result<Value, BitstreamError> {
        let origin = body
            .get("origin")
            .and_then(Json::as_u64)
            .filter(|&origin| origin <= u16::MAX as u64)
            .ok_or_else(|| malformed("bad shared object origin"))?;
        let local = body
            .get("local")
            .and_then(Json::as_u64)
            .filter(|&local| local <= u32::MAX as u64)
            .ok_or_else(|| malformed("bad shared object id"))?;
        let id = SharedObjectId {
            origin: origin as u16,
            local: local as u32,
        };

        match body.get("state") {
            Some(state) => {
                let (_, resolved) = self.decode_record(registry, state)?;
                let object = match self.live.get(&id).cloned().or_else(|| registry.lookup(id)) {
                    Some(object) => {
                        object.set_state(resolved);
                        object
                    }
                    None => {
                        let object = SharedRef::new(resolved);
                        registry.adopt(id, &object);
                        object
                    }
                };
                self.live.insert(id, object.clone());
                Ok(Value::Shared(object))
            }
            None => {
                if let Some(object) = self.live.get(&id).cloned().or_else(|| registry.lookup(id)) {
                    self.live.insert(id, object.clone());
                    return Ok(Value::Shared(object));
                }
                log::warn!("document references unknown shared object {id}");
                let stub = SharedRef::new(RecordValue::empty(RecordSchema::new("", &[])));
                registry.adopt(id, &stub);
                self.live.insert(id, stub.clone());
                Ok(Value::Shared(stub))
            }
        }
    }
}

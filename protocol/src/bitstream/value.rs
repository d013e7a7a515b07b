use std::rc::Rc;

use crate::bitstream::{
    schema::{EnumSchema, RecordSchema},
    shared_object::SharedRef,
};

/// Wire value tags, serialized as a 4-bit field ahead of every value.
pub(crate) mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const BYTES: u8 = 4;
    pub const STR: u8 = 5;
    pub const LIST: u8 = 6;
    pub const RECORD: u8 = 7;
    pub const ENUM: u8 = 8;
    pub const FLAGS: u8 = 9;
    pub const SHARED: u8 = 10;
}

/// A self-describing value: the unit of everything the protocol moves, from
/// application messages to state deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f32),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<Value>),
    Record(RecordValue),
    Enum(EnumValue),
    Flags(FlagsValue),
    Shared(SharedRef),
}

impl Value {
    pub fn record(schema: Rc<RecordSchema>, values: Vec<Value>) -> Self {
        Value::Record(RecordValue::new(schema, values))
    }

    pub fn str(text: &str) -> Self {
        Value::Str(text.to_string())
    }

    pub fn as_record(&self) -> Option<&RecordValue> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_shared(&self) -> Option<&SharedRef> {
        match self {
            Value::Shared(shared) => Some(shared),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }
}

/// A record instance: values in the field order its schema declares. Keeping
/// field order schema-driven makes re-encoding deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValue {
    pub schema: Rc<RecordSchema>,
    pub values: Vec<Value>,
}

impl RecordValue {
    pub fn new(schema: Rc<RecordSchema>, values: Vec<Value>) -> Self {
        debug_assert_eq!(schema.fields.len(), values.len());
        Self { schema, values }
    }

    /// A record with every field set to [`Value::Null`].
    pub fn empty(schema: Rc<RecordSchema>) -> Self {
        let values = vec![Value::Null; schema.fields.len()];
        Self { schema, values }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.schema
            .field_index(name)
            .and_then(|index| self.values.get(index))
    }

    pub fn set_field(&mut self, name: &str, value: Value) -> bool {
        match self.schema.field_index(name) {
            Some(index) => {
                self.values[index] = value;
                true
            }
            None => false,
        }
    }
}

/// An enumeration instance: a variant index into its schema.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub schema: Rc<EnumSchema>,
    pub index: u32,
}

impl EnumValue {
    pub fn new(schema: Rc<EnumSchema>, index: u32) -> Self {
        debug_assert!((index as usize) < schema.variants.len());
        Self { schema, index }
    }

    pub fn variant(&self) -> Option<&str> {
        self.schema.variants.get(self.index as usize).map(String::as_str)
    }
}

/// A flag-set instance: one bit per schema variant.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagsValue {
    pub schema: Rc<EnumSchema>,
    pub bits: u64,
}

impl FlagsValue {
    pub fn new(schema: Rc<EnumSchema>, bits: u64) -> Self {
        Self { schema, bits }
    }

    pub fn contains(&self, variant: &str) -> bool {
        match self.schema.variant_index(variant) {
            Some(index) => self.bits & (1 << index) != 0,
            None => false,
        }
    }

    pub fn insert(&mut self, variant: &str) -> bool {
        match self.schema.variant_index(variant) {
            Some(index) => {
                self.bits |= 1 << index;
                true
            }
            None => false,
        }
    }
}

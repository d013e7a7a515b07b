use std::{collections::HashMap, rc::Rc};

/// Describes a named composite type: an ordered list of field names. Field
/// values are self-describing on the wire, so the schema carries names only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<String>,
}

impl RecordSchema {
    pub fn new(name: &str, fields: &[&str]) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        })
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }
}

/// Describes a named enumeration (or flag set): an ordered list of variant
/// names. Plain enum values are serialized as a variant index; flag values as
/// one bit per variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSchema {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumSchema {
    pub fn new(name: &str, variants: &[&str]) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        })
    }

    pub fn variant_index(&self, name: &str) -> Option<u32> {
        self.variants.iter().position(|v| v == name).map(|i| i as u32)
    }

    /// Bits needed to serialize a variant index.
    pub fn index_bits(&self) -> u32 {
        let max = self.variants.len().saturating_sub(1) as u64;
        (64 - max.leading_zeros()).max(1)
    }
}

/// A schema table entry: either a record type or an enumeration.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSchema {
    Record(Rc<RecordSchema>),
    Enum(Rc<EnumSchema>),
}

impl TypeSchema {
    pub fn name(&self) -> &str {
        match self {
            TypeSchema::Record(schema) => &schema.name,
            TypeSchema::Enum(schema) => &schema.name,
        }
    }
}

/// The locally known types a decoder may resolve wire metadata against.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    records: HashMap<String, Rc<RecordSchema>>,
    enums: HashMap<String, Rc<EnumSchema>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_record(&mut self, name: &str, fields: &[&str]) -> Rc<RecordSchema> {
        let schema = RecordSchema::new(name, fields);
        self.records.insert(name.to_string(), schema.clone());
        schema
    }

    pub fn register_enum(&mut self, name: &str, variants: &[&str]) -> Rc<EnumSchema> {
        let schema = EnumSchema::new(name, variants);
        self.enums.insert(name.to_string(), schema.clone());
        schema
    }

    pub fn record(&self, name: &str) -> Option<Rc<RecordSchema>> {
        self.records.get(name).cloned()
    }

    pub fn enumeration(&self, name: &str) -> Option<Rc<EnumSchema>> {
        self.enums.get(name).cloned()
    }
}

/// Wire-name to local-name remappings applied while decoding, bridging
/// schema versions where old and new names coexist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    types: HashMap<String, String>,
    enums: HashMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, wire_name: &str, local_name: &str) -> &mut Self {
        self.types
            .insert(wire_name.to_string(), local_name.to_string());
        self
    }

    pub fn add_enum(&mut self, wire_name: &str, local_name: &str) -> &mut Self {
        self.enums
            .insert(wire_name.to_string(), local_name.to_string());
        self
    }

    /// Resolves a wire type name, falling back to the name itself.
    pub fn map_type<'a>(&'a self, wire_name: &'a str) -> &'a str {
        self.types.get(wire_name).map(String::as_str).unwrap_or(wire_name)
    }

    pub fn map_enum<'a>(&'a self, wire_name: &'a str) -> &'a str {
        self.enums.get(wire_name).map(String::as_str).unwrap_or(wire_name)
    }
}

//! The bitstream codec: self-describing values, per-stream type metadata,
//! shared objects with full/reference/delta encodings, and a JSON document
//! form of the same model.

mod decoder;
mod encoder;
mod error;
pub mod json;
mod schema;
mod shared_object;
mod value;

pub use decoder::{DecodeMode, Decoder};
pub use encoder::{Encoder, MappingBatch};
pub use error::BitstreamError;
pub use json::{read_document, JsonWriter};
pub use schema::{EnumSchema, RecordSchema, Substitutions, TypeRegistry, TypeSchema};
pub use shared_object::{SharedObjectId, SharedObjectRegistry, SharedRef};
pub use value::{EnumValue, FlagsValue, RecordValue, Value};

#[cfg(test)]
mod tests {
    use quilt_serde::{BitReader, BitWriter};

    use super::*;

    fn encode_one(
        encoder: &mut Encoder,
        registry: &mut SharedObjectRegistry,
        value: &Value,
    ) -> Box<[u8]> {
        let mut writer = BitWriter::new();
        encoder.write_value(&mut writer, registry, value);
        writer.to_bytes()
    }

    #[test]
    fn primitive_round_trip() {
        let types = TypeRegistry::new();
        let mut registry = SharedObjectRegistry::new(1);
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new(DecodeMode::ExactTypes);

        let original = Value::List(vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(-40),
            Value::Float(2.5),
            Value::Bytes(vec![9, 8, 7]),
            Value::str("hello"),
        ]);
        let bytes = encode_one(&mut encoder, &mut registry, &original);
        let mut reader = BitReader::new(&bytes);
        let decoded = decoder
            .decode_value(&mut reader, &types, &mut registry)
            .unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn record_round_trip_uses_table_reference() {
        let mut types = TypeRegistry::new();
        let schema = types.register_record("Pair", &["left", "right"]);
        let mut registry = SharedObjectRegistry::new(1);
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new(DecodeMode::ExactTypes);

        let first = Value::record(schema.clone(), vec![Value::Int(1), Value::Int(2)]);
        let second = Value::record(schema, vec![Value::Int(3), Value::Int(4)]);

        let bytes_first = encode_one(&mut encoder, &mut registry, &first);
        let bytes_second = encode_one(&mut encoder, &mut registry, &second);
        // the second encoding references the table instead of re-defining
        assert!(bytes_second.len() < bytes_first.len());

        let mut reader = BitReader::new(&bytes_first);
        assert_eq!(
            decoder
                .decode_value(&mut reader, &types, &mut registry)
                .unwrap(),
            first
        );
        let mut reader = BitReader::new(&bytes_second);
        assert_eq!(
            decoder
                .decode_value(&mut reader, &types, &mut registry)
                .unwrap(),
            second
        );
    }

    #[test]
    fn unknown_type_is_a_mismatch() {
        let mut sender_types = TypeRegistry::new();
        let schema = sender_types.register_record("Exotic", &["payload"]);
        let types = TypeRegistry::new();
        let mut registry = SharedObjectRegistry::new(1);
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new(DecodeMode::ExactTypes);

        let value = Value::record(schema, vec![Value::Int(5)]);
        let bytes = encode_one(&mut encoder, &mut registry, &value);
        let mut reader = BitReader::new(&bytes);
        assert_eq!(
            decoder.decode_value(&mut reader, &types, &mut registry),
            Err(BitstreamError::TypeMismatch {
                name: "Exotic".to_string()
            })
        );
    }

    #[test]
    fn shared_object_delta_after_commit() {
        let mut types = TypeRegistry::new();
        let schema = types.register_record("Counter", &["count", "label"]);
        let mut registry = SharedObjectRegistry::new(1);
        let mut remote_registry = SharedObjectRegistry::new(2);
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new(DecodeMode::ExactTypes);

        let object = SharedRef::new(RecordValue::new(
            schema,
            vec![Value::Int(0), Value::str("counter")],
        ));
        let value = Value::Shared(object.clone());

        let full = encode_one(&mut encoder, &mut registry, &value);
        let mut reader = BitReader::new(&full);
        let decoded = decoder
            .decode_value(&mut reader, &types, &mut remote_registry)
            .unwrap();
        let remote = decoded.as_shared().unwrap().clone();
        // the decoded stand-in keeps the id the wire carried
        assert_eq!(remote.id(), object.id());
        assert_eq!(remote.field("count"), Some(Value::Int(0)));

        // unchanged state encodes as a bare reference
        let reference = encode_one(&mut encoder, &mut registry, &value);
        assert!(reference.len() < full.len());
        let mut reader = BitReader::new(&reference);
        decoder
            .decode_value(&mut reader, &types, &mut remote_registry)
            .unwrap();

        // a field change rides as a delta and lands on the same object
        object.set_field("count", Value::Int(7));
        let delta = encode_one(&mut encoder, &mut registry, &value);
        assert!(delta.len() < full.len());
        let mut reader = BitReader::new(&delta);
        let decoded = decoder
            .decode_value(&mut reader, &types, &mut remote_registry)
            .unwrap();
        assert!(remote == *decoded.as_shared().unwrap());
        assert_eq!(remote.field("count"), Some(Value::Int(7)));
        assert_eq!(remote.field("label"), Some(Value::str("counter")));
    }

    #[test]
    fn substituted_record_remaps_fields_by_name() {
        let mut sender_types = TypeRegistry::new();
        let old = sender_types.register_record("OldThing", &["foo", "bar", "gone"]);
        let mut receiver_types = TypeRegistry::new();
        receiver_types.register_record("NewThing", &["bar", "foo", "baz"]);

        let mut subs = Substitutions::new();
        subs.add_type("OldThing", "NewThing");

        let mut registry = SharedObjectRegistry::new(1);
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new(DecodeMode::Substituted(subs));

        let value = Value::record(
            old,
            vec![Value::Int(1), Value::str("two"), Value::Bool(true)],
        );
        let bytes = encode_one(&mut encoder, &mut registry, &value);
        let mut reader = BitReader::new(&bytes);
        let decoded = decoder
            .decode_value(&mut reader, &receiver_types, &mut registry)
            .unwrap();

        let record = decoded.as_record().unwrap();
        assert_eq!(record.schema.name, "NewThing");
        assert_eq!(record.field("foo"), Some(&Value::Int(1)));
        assert_eq!(record.field("bar"), Some(&Value::str("two")));
        // locally known field the wire never carried
        assert_eq!(record.field("baz"), Some(&Value::Null));
    }

    #[test]
    fn substituted_enum_remaps_variants_by_name() {
        let mut sender_types = TypeRegistry::new();
        let old = sender_types.register_enum("OldMode", &["alpha", "beta", "gamma"]);
        let mut receiver_types = TypeRegistry::new();
        receiver_types.register_enum("NewMode", &["gamma", "alpha", "beta"]);

        let mut subs = Substitutions::new();
        subs.add_enum("OldMode", "NewMode");

        let mut registry = SharedObjectRegistry::new(1);
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new(DecodeMode::Substituted(subs.clone()));

        let value = Value::Enum(EnumValue::new(old.clone(), 2));
        let bytes = encode_one(&mut encoder, &mut registry, &value);
        let mut reader = BitReader::new(&bytes);
        let decoded = decoder
            .decode_value(&mut reader, &receiver_types, &mut registry)
            .unwrap();
        match decoded {
            Value::Enum(decoded) => {
                assert_eq!(decoded.schema.name, "NewMode");
                assert_eq!(decoded.variant(), Some("gamma"));
            }
            other => panic!("expected enum, got {other:?}"),
        }

        // flags remap each set bit the same way
        let mut flags = FlagsValue::new(old, 0);
        flags.insert("alpha");
        flags.insert("gamma");
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new(DecodeMode::Substituted(subs));
        let bytes = encode_one(&mut encoder, &mut registry, &Value::Flags(flags));
        let mut reader = BitReader::new(&bytes);
        let decoded = decoder
            .decode_value(&mut reader, &receiver_types, &mut registry)
            .unwrap();
        match decoded {
            Value::Flags(decoded) => {
                assert!(decoded.contains("alpha"));
                assert!(decoded.contains("gamma"));
                assert!(!decoded.contains("beta"));
            }
            other => panic!("expected flags, got {other:?}"),
        }
    }

    #[test]
    fn generic_decode_re_encodes_byte_identically() {
        let mut sender_types = TypeRegistry::new();
        let inner = sender_types.register_record("Inner", &["value"]);
        let outer = sender_types.register_record("Outer", &["first", "second", "mode"]);
        let mode = sender_types.register_enum("Mode", &["on", "off"]);

        let mut registry = SharedObjectRegistry::new(1);
        let mut encoder = Encoder::new();
        let value = Value::record(
            outer,
            vec![
                Value::record(inner.clone(), vec![Value::Int(11)]),
                Value::record(inner, vec![Value::str("x")]),
                Value::Enum(EnumValue::new(mode, 1)),
            ],
        );
        let original = encode_one(&mut encoder, &mut registry, &value);

        // decode with no local types at all, then re-encode from scratch
        let empty_types = TypeRegistry::new();
        let mut relay_registry = SharedObjectRegistry::new(9);
        let mut decoder = Decoder::new(DecodeMode::AllGenerics);
        let mut reader = BitReader::new(&original);
        let generic = decoder
            .decode_value(&mut reader, &empty_types, &mut relay_registry)
            .unwrap();

        let mut re_encoder = Encoder::new();
        let re_encoded = encode_one(&mut re_encoder, &mut relay_registry, &generic);
        assert_eq!(original, re_encoded);
    }
}

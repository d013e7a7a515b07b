use proptest::prelude::*;
use quilt_protocol::{
    read_document, DecodeMode, Decoder, Encoder, EnumValue, FlagsValue, JsonWriter, RecordValue,
    SharedObjectRegistry, SharedRef, Substitutions, TypeRegistry, Value,
};
use quilt_serde::{BitReader, BitWriter};

fn pose_types() -> TypeRegistry {
    let mut types = TypeRegistry::new();
    types.register_record("Pose", &["x", "y"]);
    types.register_enum("Mode", &["walk", "run", "fly"]);
    types
}

#[test]
fn json_document_round_trips_exactly() {
    let types = pose_types();
    let pose = types.record("Pose").unwrap();
    let mode = types.enumeration("Mode").unwrap();

    let mut registry = SharedObjectRegistry::new(1);
    let shared = SharedRef::new(RecordValue::new(
        pose.clone(),
        vec![Value::Float(1.5), Value::Float(-2.0)],
    ));
    let mut flags = FlagsValue::new(mode.clone(), 0);
    flags.insert("walk");
    flags.insert("fly");
    let values = vec![
        Value::Int(-77),
        Value::List(vec![Value::Null, Value::str("nested")]),
        Value::record(pose, vec![Value::Float(0.0), Value::Float(9.25)]),
        Value::Enum(EnumValue::new(mode, 1)),
        Value::Flags(flags),
        Value::Shared(shared.clone()),
        // written by reference the second time
        Value::Shared(shared),
    ];

    let mut writer = JsonWriter::new();
    for value in &values {
        writer.write_value(&mut registry, value);
    }
    let document = writer.finish();

    let mut remote_registry = SharedObjectRegistry::new(2);
    let decoded = read_document(
        &DecodeMode::ExactTypes,
        &types,
        &mut remote_registry,
        &document,
    )
    .unwrap();
    assert_eq!(decoded, values);

    // both shared occurrences resolved to the one object
    assert_eq!(
        decoded[5].as_shared().unwrap(),
        decoded[6].as_shared().unwrap()
    );
}

#[test]
fn generic_read_rewrites_the_identical_document() {
    let types = pose_types();
    let pose = types.record("Pose").unwrap();
    let mode = types.enumeration("Mode").unwrap();

    let mut registry = SharedObjectRegistry::new(1);
    let shared = SharedRef::new(RecordValue::new(
        pose.clone(),
        vec![Value::Float(4.0), Value::Float(5.0)],
    ));
    let values = vec![
        Value::record(pose, vec![Value::Int(1), Value::str("two")]),
        Value::Enum(EnumValue::new(mode, 2)),
        Value::Shared(shared.clone()),
        Value::Shared(shared),
        Value::Bytes(vec![0, 255, 7]),
    ];

    let mut writer = JsonWriter::new();
    for value in &values {
        writer.write_value(&mut registry, value);
    }
    let document = writer.finish();

    // a relay with no local types reads everything generically...
    let empty_types = TypeRegistry::new();
    let mut relay_registry = SharedObjectRegistry::new(9);
    let generic = read_document(
        &DecodeMode::AllGenerics,
        &empty_types,
        &mut relay_registry,
        &document,
    )
    .unwrap();

    // ...and writes back the document it was given, byte for byte
    let mut rewriter = JsonWriter::new();
    for value in &generic {
        rewriter.write_value(&mut relay_registry, value);
    }
    assert_eq!(rewriter.finish(), document);
}

#[test]
fn substituted_document_remaps_by_name() {
    let mut sender_types = TypeRegistry::new();
    let old = sender_types.register_record("OldThing", &["foo", "bar", "gone"]);
    let mut receiver_types = TypeRegistry::new();
    receiver_types.register_record("NewThing", &["bar", "foo", "baz"]);

    let mut subs = Substitutions::new();
    subs.add_type("OldThing", "NewThing");

    let mut registry = SharedObjectRegistry::new(1);
    let shared = SharedRef::new(RecordValue::new(
        old.clone(),
        vec![Value::Int(10), Value::str("twenty"), Value::Bool(false)],
    ));
    let mut writer = JsonWriter::new();
    writer.write_value(
        &mut registry,
        &Value::record(old, vec![Value::Int(1), Value::str("two"), Value::Bool(true)]),
    );
    writer.write_value(&mut registry, &Value::Shared(shared));
    let document = writer.finish();

    let mut remote_registry = SharedObjectRegistry::new(2);
    let decoded = read_document(
        &DecodeMode::Substituted(subs),
        &receiver_types,
        &mut remote_registry,
        &document,
    )
    .unwrap();

    let record = decoded[0].as_record().unwrap();
    assert_eq!(record.schema.name, "NewThing");
    assert_eq!(record.field("foo"), Some(&Value::Int(1)));
    assert_eq!(record.field("bar"), Some(&Value::str("two")));
    assert_eq!(record.field("baz"), Some(&Value::Null));

    let state = decoded[1].as_shared().unwrap().state();
    assert_eq!(state.schema.name, "NewThing");
    assert_eq!(state.field("foo"), Some(&Value::Int(10)));
}

#[test]
fn text_form_detour_re_encodes_byte_identically() {
    let types = pose_types();
    let pose = types.record("Pose").unwrap();
    let mode = types.enumeration("Mode").unwrap();

    let mut registry = SharedObjectRegistry::new(1);
    let shared = SharedRef::new(RecordValue::new(
        pose.clone(),
        vec![Value::Float(6.5), Value::Float(7.0)],
    ));
    let values = vec![
        Value::record(pose, vec![Value::Int(3), Value::str("four")]),
        Value::Enum(EnumValue::new(mode, 0)),
        Value::Shared(shared.clone()),
        Value::Shared(shared),
    ];

    let mut encoder = Encoder::new();
    let mut binary = BitWriter::new();
    for value in &values {
        encoder.write_value(&mut binary, &mut registry, value);
    }
    let binary = binary.to_bytes();

    // decode the binary generically, detour through the text form, and
    // re-encode from scratch
    let empty_types = TypeRegistry::new();
    let mut relay_registry = SharedObjectRegistry::new(9);
    let mut decoder = Decoder::new(DecodeMode::AllGenerics);
    let mut reader = BitReader::new(&binary);
    let mut generic = Vec::new();
    for _ in 0..values.len() {
        generic.push(
            decoder
                .decode_value(&mut reader, &empty_types, &mut relay_registry)
                .unwrap(),
        );
    }

    let mut writer = JsonWriter::new();
    for value in &generic {
        writer.write_value(&mut relay_registry, value);
    }
    let document = writer.finish();

    let mut text_registry = SharedObjectRegistry::new(11);
    let from_text = read_document(
        &DecodeMode::AllGenerics,
        &empty_types,
        &mut text_registry,
        &document,
    )
    .unwrap();

    let mut re_encoder = Encoder::new();
    let mut re_encoded = BitWriter::new();
    for value in &from_text {
        re_encoder.write_value(&mut re_encoded, &mut text_registry, value);
    }
    assert_eq!(re_encoded.to_bytes(), binary);
}

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e6f32..1.0e6f32).prop_map(Value::Float),
        proptest::collection::vec(any::<u8>(), 0..24).prop_map(Value::Bytes),
        any::<String>().prop_map(Value::Str),
    ];
    leaf.prop_recursive(3, 48, 6, |inner| {
        proptest::collection::vec(inner, 0..6).prop_map(Value::List)
    })
}

proptest! {
    #[test]
    fn arbitrary_values_survive_a_binary_round_trip(value in value_strategy()) {
        let types = TypeRegistry::new();
        let mut registry = SharedObjectRegistry::new(1);
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new(DecodeMode::ExactTypes);

        let mut writer = BitWriter::new();
        encoder.write_value(&mut writer, &mut registry, &value);
        let bytes = writer.to_bytes();

        let mut reader = BitReader::new(&bytes);
        let decoded = decoder.decode_value(&mut reader, &types, &mut registry).unwrap();
        prop_assert_eq!(decoded, value);
    }
}

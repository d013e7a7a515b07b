use std::collections::BTreeMap;

use crate::{
    bitstream::{RecordValue, TypeRegistry, Value},
    endpoint::error::ProtocolError,
};

pub(crate) const VIEW_PARAMS: &str = "ViewParams";
pub(crate) const CLIENT_STATE: &str = "ClientState";
pub(crate) const WORLD_DELTA: &str = "WorldDelta";
pub(crate) const WORLD_ENTRY: &str = "WorldEntry";

fn missing_schema(reason: &'static str) -> ProtocolError {
    ProtocolError::SessionState { reason }
}

fn invalid(reason: &'static str) -> ProtocolError {
    ProtocolError::InvalidDelta { reason }
}

/// The client's interest parameters, echoed back on every state delta so the
/// client knows which view a delta was computed for. Granularity zero marks
/// the view unset; a server sends nothing until it has a valid one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewParams {
    pub focus: [f32; 3],
    pub granularity: f32,
}

impl Default for ViewParams {
    fn default() -> Self {
        Self {
            focus: [0.0; 3],
            granularity: 0.0,
        }
    }
}

impl ViewParams {
    pub fn new(focus: [f32; 3], granularity: f32) -> Self {
        Self { focus, granularity }
    }

    pub fn is_valid(&self) -> bool {
        self.granularity > 0.0
    }

    pub fn to_value(&self, types: &TypeRegistry) -> Result<Value, ProtocolError> {
        let schema = types
            .record(VIEW_PARAMS)
            .ok_or_else(|| missing_schema("view schema not registered"))?;
        Ok(Value::record(
            schema,
            vec![
                Value::Float(self.focus[0]),
                Value::Float(self.focus[1]),
                Value::Float(self.focus[2]),
                Value::Float(self.granularity),
            ],
        ))
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let record = value
            .as_record()
            .ok_or_else(|| invalid("view is not a record"))?;
        let float = |name: &'static str| -> Result<f32, ProtocolError> {
            record
                .field(name)
                .and_then(Value::as_float)
                .ok_or_else(|| invalid("view field missing or mistyped"))
        };
        Ok(Self {
            focus: [float("focus_x")?, float("focus_y")?, float("focus_z")?],
            granularity: float("granularity")?,
        })
    }
}

/// The keyed state a server synchronizes down to its client. Values are
/// arbitrary bitstream values; keys are application-chosen integers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldState {
    entries: BTreeMap<i64, Value>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: i64, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: i64) -> Option<&Value> {
        self.entries.get(&key)
    }

    pub fn remove(&mut self, key: i64) -> Option<Value> {
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i64, &Value)> {
        self.entries.iter()
    }

    /// Encodes the difference from `baseline` to `self` as a delta value,
    /// tagged with the packet that established the baseline and the view it
    /// was computed for.
    pub fn delta_against(
        &self,
        baseline: &WorldState,
        baseline_packet: u32,
        baseline_view: &ViewParams,
        types: &TypeRegistry,
    ) -> Result<Value, ProtocolError> {
        let entry_schema = types
            .record(WORLD_ENTRY)
            .ok_or_else(|| missing_schema("world entry schema not registered"))?;
        let delta_schema = types
            .record(WORLD_DELTA)
            .ok_or_else(|| missing_schema("world delta schema not registered"))?;

        let changed: Vec<Value> = self
            .entries
            .iter()
            .filter(|(key, value)| baseline.entries.get(key) != Some(value))
            .map(|(key, value)| {
                Value::record(
                    entry_schema.clone(),
                    vec![Value::Int(*key), value.clone()],
                )
            })
            .collect();
        let removed: Vec<Value> = baseline
            .entries
            .keys()
            .filter(|key| !self.entries.contains_key(key))
            .map(|key| Value::Int(*key))
            .collect();

        Ok(Value::record(
            delta_schema,
            vec![
                Value::Int(baseline_packet as i64),
                baseline_view.to_value(types)?,
                Value::List(changed),
                Value::List(removed),
            ],
        ))
    }

    /// Applies a parsed delta on top of `self`, producing the new state.
    pub fn apply(&self, delta: &WorldDelta) -> WorldState {
        let mut entries = self.entries.clone();
        for (key, value) in &delta.changed {
            entries.insert(*key, value.clone());
        }
        for key in &delta.removed {
            entries.remove(key);
        }
        WorldState { entries }
    }
}

/// A decoded state delta, before application.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldDelta {
    pub baseline_packet: u32,
    pub baseline_view: ViewParams,
    pub changed: Vec<(i64, Value)>,
    pub removed: Vec<i64>,
}

impl WorldDelta {
    pub fn parse(record: &RecordValue) -> Result<Self, ProtocolError> {
        let baseline_packet = record
            .field("baseline")
            .and_then(Value::as_int)
            .filter(|&packet| packet >= 0 && packet <= u32::MAX as i64)
            .ok_or_else(|| invalid("baseline packet missing or out of range"))?
            as u32;
        let baseline_view = ViewParams::from_value(
            record
                .field("view")
                .ok_or_else(|| invalid("baseline view missing"))?,
        )?;

        let changed = record
            .field("changed")
            .and_then(Value::as_list)
            .ok_or_else(|| invalid("changed entry list missing"))?
            .iter()
            .map(|entry| {
                let entry = entry
                    .as_record()
                    .ok_or_else(|| invalid("changed entry is not a record"))?;
                let key = entry
                    .field("key")
                    .and_then(Value::as_int)
                    .ok_or_else(|| invalid("changed entry without key"))?;
                let value = entry
                    .field("value")
                    .ok_or_else(|| invalid("changed entry without value"))?;
                Ok((key, value.clone()))
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;
        let removed = record
            .field("removed")
            .and_then(Value::as_list)
            .ok_or_else(|| invalid("removed key list missing"))?
            .iter()
            .map(|key| key.as_int().ok_or_else(|| invalid("non-integer removed key")))
            .collect::<Result<Vec<_>, ProtocolError>>()?;

        Ok(Self {
            baseline_packet,
            baseline_view,
            changed,
            removed,
        })
    }
}

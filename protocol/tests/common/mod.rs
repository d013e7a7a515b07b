#![allow(dead_code)]

use quilt_protocol::{Endpoint, RecordValue, SharedRef, Value};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A deterministic unreliable link: drops, delays (reorders), and duplicates
/// datagrams at configured rates.
pub struct LossyLink {
    rng: StdRng,
    drop_rate: f64,
    reorder_rate: f64,
    duplicate_rate: f64,
    delayed: Vec<Vec<u8>>,
}

impl LossyLink {
    pub fn new(seed: u64, drop_rate: f64, reorder_rate: f64, duplicate_rate: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            drop_rate,
            reorder_rate,
            duplicate_rate,
            delayed: Vec::new(),
        }
    }

    pub fn lossless(seed: u64) -> Self {
        Self::new(seed, 0.0, 0.0, 0.0)
    }

    /// Sends one datagram, returning whatever arrives at the far side now,
    /// including previously delayed datagrams (now out of order).
    pub fn transmit(&mut self, datagram: &[u8]) -> Vec<Vec<u8>> {
        let mut arrivals = Vec::new();
        if self.rng.gen_bool(self.drop_rate) {
            return arrivals;
        }
        if self.rng.gen_bool(self.duplicate_rate) {
            arrivals.push(datagram.to_vec());
        }
        if self.rng.gen_bool(self.reorder_rate) {
            self.delayed.push(datagram.to_vec());
        } else {
            arrivals.push(datagram.to_vec());
            arrivals.append(&mut self.delayed);
        }
        arrivals
    }
}

pub fn register_test_types(endpoint: &mut Endpoint) {
    endpoint
        .types_mut()
        .register_record("TestMessage", &["id", "payload"]);
    endpoint
        .types_mut()
        .register_record("TestState", &["count", "label"]);
}

pub fn test_message(endpoint: &Endpoint, id: i64, payload: &str) -> Value {
    let schema = endpoint
        .types()
        .record("TestMessage")
        .expect("test types registered");
    Value::record(schema, vec![Value::Int(id), Value::str(payload)])
}

pub fn test_state(endpoint: &Endpoint) -> SharedRef {
    let schema = endpoint
        .types()
        .record("TestState")
        .expect("test types registered");
    SharedRef::new(RecordValue::new(
        schema,
        vec![Value::Int(0), Value::str("initial")],
    ))
}

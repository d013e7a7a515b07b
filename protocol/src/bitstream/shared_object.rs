use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
};

use quilt_serde::{BitReader, BitWrite, Serde, SerdeErr, UnsignedVariableInteger};

use crate::bitstream::value::{RecordValue, Value};

/// Identifies a shared object across the session. The origin half is the
/// peer-unique id of the endpoint that created the object, so ids minted
/// independently on both sides never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedObjectId {
    pub origin: u16,
    pub local: u32,
}

impl fmt::Display for SharedObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.local)
    }
}

impl Serde for SharedObjectId {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.origin.ser(writer);
        UnsignedVariableInteger::<7>::new(self.local as u64).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let origin = u16::de(reader)?;
        let local = UnsignedVariableInteger::<7>::de(reader)?.get();
        if local > u32::MAX as u64 {
            return Err(SerdeErr);
        }
        Ok(Self {
            origin,
            local: local as u32,
        })
    }

    fn bit_length(&self) -> u32 {
        16 + UnsignedVariableInteger::<7>::new(self.local as u64).bit_length()
    }
}

#[derive(Debug)]
struct SharedObject {
    id: Option<SharedObjectId>,
    state: RecordValue,
}

/// A handle to a mutable object both peers reference by id. Cheap to clone;
/// clones alias the same object.
#[derive(Debug, Clone)]
pub struct SharedRef(Rc<RefCell<SharedObject>>);

impl SharedRef {
    pub fn new(state: RecordValue) -> Self {
        Self(Rc::new(RefCell::new(SharedObject { id: None, state })))
    }

    /// The object's session id, once a registry has assigned or adopted one.
    pub fn id(&self) -> Option<SharedObjectId> {
        self.0.borrow().id
    }

    pub(crate) fn set_id(&self, id: SharedObjectId) {
        self.0.borrow_mut().id = Some(id);
    }

    /// A snapshot of the object's current state.
    pub fn state(&self) -> RecordValue {
        self.0.borrow().state.clone()
    }

    pub fn set_state(&self, state: RecordValue) {
        self.0.borrow_mut().state = state;
    }

    pub fn schema_name(&self) -> String {
        self.0.borrow().state.schema.name.clone()
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.0.borrow().state.field(name).cloned()
    }

    pub fn set_field(&self, name: &str, value: Value) -> bool {
        self.0.borrow_mut().state.set_field(name, value)
    }

    fn downgrade(&self) -> Weak<RefCell<SharedObject>> {
        Rc::downgrade(&self.0)
    }
}

impl PartialEq for SharedRef {
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        let this = self.0.borrow();
        let that = other.0.borrow();
        this.id == that.id && this.state == that.state
    }
}

/// Tracks every shared object this endpoint knows about, weakly, keyed by id.
/// Locally created objects get ids minted here; remotely created ones are
/// adopted under the id the wire carried.
#[derive(Debug)]
pub struct SharedObjectRegistry {
    origin: u16,
    next_local: u32,
    objects: HashMap<SharedObjectId, Weak<RefCell<SharedObject>>>,
}

impl SharedObjectRegistry {
    pub fn new(origin: u16) -> Self {
        Self {
            origin,
            next_local: 1,
            objects: HashMap::new(),
        }
    }

    pub fn origin(&self) -> u16 {
        self.origin
    }

    /// Returns the object's id, minting one if it has never been registered.
    pub fn resolve_or_register(&mut self, object: &SharedRef) -> SharedObjectId {
        if let Some(id) = object.id() {
            self.objects.entry(id).or_insert_with(|| object.downgrade());
            return id;
        }
        let id = SharedObjectId {
            origin: self.origin,
            local: self.next_local,
        };
        self.next_local += 1;
        object.set_id(id);
        self.objects.insert(id, object.downgrade());
        id
    }

    /// Adopts a remotely created object under the id it arrived with.
    pub fn adopt(&mut self, id: SharedObjectId, object: &SharedRef) {
        object.set_id(id);
        self.objects.insert(id, object.downgrade());
    }

    pub fn lookup(&self, id: SharedObjectId) -> Option<SharedRef> {
        self.objects
            .get(&id)
            .and_then(Weak::upgrade)
            .map(SharedRef)
    }
}

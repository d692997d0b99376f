use crate::error::{Result, ShareError};
use crate::observer::Observer;
use crate::protocol::{FieldIndex, Identity};
use crate::registry::{Definition, SchemaRegistry};
use crate::schema::{Accessor, AccessorTable, FieldKind, PrimitiveType};
use crate::share;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// A field value. `Shared` appears only in composite fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i64),
    String(String),
    Shared(SharedInstance),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_shared(&self) -> Option<&SharedInstance> {
        match self {
            Value::Shared(instance) => Some(instance),
            _ => None,
        }
    }

    fn matches_primitive(&self, ty: PrimitiveType) -> bool {
        matches!(
            (self, ty),
            (Value::Null, _)
                | (Value::Bool(_), PrimitiveType::Bool)
                | (Value::Number(_), PrimitiveType::Number)
                | (Value::BigInt(_), PrimitiveType::BigInt)
                | (Value::String(_), PrimitiveType::String)
        )
    }

    fn from_json_primitive(field: &str, ty: PrimitiveType, json: &serde_json::Value) -> Result<Self> {
        let value = match (ty, json) {
            (_, serde_json::Value::Null) => Some(Value::Null),
            (PrimitiveType::Bool, serde_json::Value::Bool(b)) => Some(Value::Bool(*b)),
            (PrimitiveType::Number, serde_json::Value::Number(n)) => n.as_f64().map(Value::Number),
            (PrimitiveType::BigInt, serde_json::Value::Number(n)) => n.as_i64().map(Value::BigInt),
            (PrimitiveType::String, serde_json::Value::String(s)) => Some(Value::String(s.clone())),
            _ => None,
        };

        value.ok_or_else(|| ShareError::TypeMismatch {
            field: field.to_string(),
            expected: ty.name().to_string(),
        })
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::BigInt(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<SharedInstance> for Value {
    fn from(value: SharedInstance) -> Self {
        Value::Shared(value)
    }
}

impl From<&SharedInstance> for Value {
    fn from(value: &SharedInstance) -> Self {
        Value::Shared(value.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

struct Slot {
    value: Value,
    listeners: Vec<Observer>,
}

struct InstanceInner {
    definition: Arc<Definition>,
    accessors: Arc<AccessorTable>,
    identity: Cell<Option<Identity>>,
    slots: RefCell<Vec<Slot>>,
}

/// Handle to an object built from an instrumented schema. Clones share the
/// same object; equality is object identity.
#[derive(Clone)]
pub struct SharedInstance(Rc<InstanceInner>);

impl SharedInstance {
    pub fn new(definition: &Arc<Definition>) -> Result<Self> {
        let accessors = definition
            .accessors()
            .cloned()
            .ok_or_else(|| ShareError::UnknownSchema(definition.name().to_string()))?;

        let slots = (0..accessors.len())
            .map(|_| Slot {
                value: Value::Null,
                listeners: Vec::new(),
            })
            .collect();

        Ok(Self(Rc::new(InstanceInner {
            definition: Arc::clone(definition),
            accessors,
            identity: Cell::new(None),
            slots: RefCell::new(slots),
        })))
    }

    pub fn definition(&self) -> &Arc<Definition> {
        &self.0.definition
    }

    pub fn type_uid(&self) -> &str {
        self.0.definition.uid()
    }

    pub fn type_identity(&self) -> Option<Identity> {
        self.0.definition.identity()
    }

    /// Assigned the first time the instance is shared, then kept for good.
    pub fn identity(&self) -> Option<Identity> {
        self.0.identity.get()
    }

    pub(crate) fn ensure_identity(&self, registry: &SchemaRegistry) -> Identity {
        match self.0.identity.get() {
            Some(identity) => identity,
            None => {
                let identity = registry.next_identity();
                self.0.identity.set(Some(identity));
                identity
            }
        }
    }

    pub fn ptr_eq(&self, other: &SharedInstance) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn downgrade(&self) -> WeakInstance {
        WeakInstance(Rc::downgrade(&self.0))
    }

    pub fn accessors(&self) -> &AccessorTable {
        &self.0.accessors
    }

    pub fn field_count(&self) -> usize {
        self.0.slots.borrow().len()
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        let index = self.accessors().resolve(name)?.slot();
        Ok(self.0.slots.borrow()[index].value.clone())
    }

    pub fn get_index(&self, index: usize) -> Option<Value> {
        self.0.slots.borrow().get(index).map(|slot| slot.value.clone())
    }

    pub fn fields(&self) -> Vec<(String, Value)> {
        let slots = self.0.slots.borrow();
        self.accessors()
            .iter()
            .map(|a| (a.name.clone(), slots[a.slot()].value.clone()))
            .collect()
    }

    pub fn set(&self, registry: &SchemaRegistry, name: &str, value: impl Into<Value>) -> Result<()> {
        let accessor = self.accessors().resolve(name)?.clone();
        self.set_with(registry, &accessor, value.into())
    }

    pub fn set_index(&self, registry: &SchemaRegistry, index: usize, value: impl Into<Value>) -> Result<()> {
        let accessor = self.accessors().get(index)?.clone();
        self.set_with(registry, &accessor, value.into())
    }

    /// Assigns a JSON value, materializing objects and arrays through the
    /// composite field's declared schema.
    pub fn set_plain(&self, registry: &SchemaRegistry, name: &str, json: &serde_json::Value) -> Result<()> {
        let accessor = self.accessors().resolve(name)?.clone();
        let value = coerce(registry, &accessor, json)?;
        self.set_with(registry, &accessor, value)
    }

    fn set_with(&self, registry: &SchemaRegistry, accessor: &Accessor, value: Value) -> Result<()> {
        match &accessor.kind {
            FieldKind::Primitive(ty) => {
                if !value.matches_primitive(*ty) {
                    return Err(ShareError::TypeMismatch {
                        field: accessor.name.clone(),
                        expected: ty.name().to_string(),
                    });
                }
                self.write(accessor.index, value);
                Ok(())
            }
            FieldKind::Composite(schema) => self.set_composite(registry, accessor, schema, value),
        }
    }

    fn set_composite(&self, registry: &SchemaRegistry, accessor: &Accessor, schema: &str, value: Value) -> Result<()> {
        match &value {
            Value::Null => {}
            Value::Shared(next) if next.type_uid() == schema => {}
            _ => {
                return Err(ShareError::TypeMismatch {
                    field: accessor.name.clone(),
                    expected: schema.to_string(),
                })
            }
        }

        let (previous, observed) = {
            let slots = self.0.slots.borrow();
            let slot = &slots[accessor.slot()];
            (slot.value.clone(), !slot.listeners.is_empty())
        };

        // Nothing is touched until the whole incoming graph is shareable.
        if let (true, Value::Shared(next)) = (observed, &value) {
            share::validate(registry, next)?;
        }

        let listeners = self.write(accessor.index, value.clone());

        for observer in &listeners {
            if let Value::Shared(next) = &value {
                share::attach(registry, next, observer);
            }
            if let Value::Shared(previous) = &previous {
                share::release(previous, observer);
            }
        }
        Ok(())
    }

    /// Stores the value and records it with every attached observer.
    /// Returns the observers that were recorded.
    fn write(&self, index: FieldIndex, value: Value) -> Vec<Observer> {
        let listeners = {
            let mut slots = self.0.slots.borrow_mut();
            let slot = &mut slots[index as usize];
            slot.value = value.clone();
            slot.listeners.clone()
        };

        for observer in &listeners {
            observer.record(self, index, value.clone());
        }
        listeners
    }

    pub(crate) fn composite_children(&self) -> Vec<SharedInstance> {
        self.0
            .slots
            .borrow()
            .iter()
            .filter_map(|slot| slot.value.as_shared().cloned())
            .collect()
    }

    /// Adds the observer to every field's listener set. Returns false when
    /// it was already attached everywhere.
    pub(crate) fn attach(&self, observer: &Observer) -> bool {
        let mut added = false;
        for slot in self.0.slots.borrow_mut().iter_mut() {
            if !slot.listeners.iter().any(|l| l.ptr_eq(observer)) {
                slot.listeners.push(observer.clone());
                added = true;
            }
        }
        added
    }

    pub(crate) fn detach(&self, observer: &Observer) -> bool {
        let mut removed = false;
        for slot in self.0.slots.borrow_mut().iter_mut() {
            let before = slot.listeners.len();
            slot.listeners.retain(|l| !l.ptr_eq(observer));
            removed |= slot.listeners.len() != before;
        }
        removed
    }

    pub fn is_observed_by(&self, observer: &Observer) -> bool {
        self.0
            .slots
            .borrow()
            .iter()
            .any(|slot| slot.listeners.iter().any(|l| l.ptr_eq(observer)))
    }

    pub fn observer_count(&self) -> usize {
        let slots = self.0.slots.borrow();
        let mut seen: Vec<&Observer> = Vec::new();
        for observer in slots.iter().flat_map(|slot| slot.listeners.iter()) {
            if !seen.iter().any(|s| s.ptr_eq(observer)) {
                seen.push(observer);
            }
        }
        seen.len()
    }
}

/// Non-owning handle used for observer roots.
#[derive(Clone)]
pub(crate) struct WeakInstance(Weak<InstanceInner>);

impl WeakInstance {
    pub(crate) fn upgrade(&self) -> Option<SharedInstance> {
        self.0.upgrade().map(SharedInstance)
    }

    pub(crate) fn is(&self, instance: &SharedInstance) -> bool {
        Weak::as_ptr(&self.0) == Rc::as_ptr(&instance.0)
    }
}

impl PartialEq for SharedInstance {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for SharedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedInstance")
            .field("type", &self.type_uid())
            .field("identity", &self.identity())
            .finish()
    }
}

fn coerce(registry: &SchemaRegistry, accessor: &Accessor, json: &serde_json::Value) -> Result<Value> {
    match &accessor.kind {
        FieldKind::Primitive(ty) => Value::from_json_primitive(&accessor.name, *ty, json),
        FieldKind::Composite(schema) => match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                Ok(Value::Shared(plain(registry, schema, json)?))
            }
            _ => Err(ShareError::TypeMismatch {
                field: accessor.name.clone(),
                expected: schema.clone(),
            }),
        },
    }
}

/// Materializes an object literal into a reactive instance of `schema`.
/// Arrays map positionally onto the schema's fields.
pub fn plain(registry: &SchemaRegistry, schema: &str, source: &serde_json::Value) -> Result<SharedInstance> {
    let definition = registry.get(schema)?;
    let instance = SharedInstance::new(&definition)?;

    match source {
        serde_json::Value::Object(map) => {
            for (name, json) in map {
                let accessor = instance.accessors().resolve(name)?.clone();
                let value = coerce(registry, &accessor, json)?;
                instance.set_with(registry, &accessor, value)?;
            }
        }
        serde_json::Value::Array(items) => {
            for (index, json) in items.iter().enumerate() {
                let accessor = instance.accessors().get(index)?.clone();
                let value = coerce(registry, &accessor, json)?;
                instance.set_with(registry, &accessor, value)?;
            }
        }
        other => {
            return Err(ShareError::InvalidSchema(format!(
                "cannot build '{}' from {}",
                schema, other
            )))
        }
    }

    Ok(instance)
}

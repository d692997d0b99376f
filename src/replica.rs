use crate::error::{Result, ShareError};
use crate::protocol::*;
use crate::registry::SchemaRegistry;
use ahash::AHashMap;
use tracing::trace;

/// Receiver-side copy of one shared instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaObject {
    pub class_identity: Identity,
    pub fields: Vec<WireValue>,
}

/// Applies compact updates to a store of plain values keyed by instance
/// identity. Instances must arrive through CREATE before SET touches them.
#[derive(Debug, Default)]
pub struct Replica {
    objects: AHashMap<Identity, ReplicaObject>,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every op in order. Returns the results of CALL ops.
    pub fn apply(&mut self, registry: &SchemaRegistry, update: &[Op]) -> Result<Vec<WireValue>> {
        let mut results = Vec::new();

        for op in update {
            match op {
                Op::Create(entries) => {
                    for entry in entries {
                        let definition = registry.by_identity(entry.class_identity())?;
                        let expected = definition.schema().map(|s| s.len()).unwrap_or(0);
                        if entry.fields().len() != expected {
                            return Err(ShareError::InvalidMessage(format!(
                                "CREATE of {} carries {} fields, schema has {}",
                                definition.uid(),
                                entry.fields().len(),
                                expected
                            )));
                        }
                        self.objects.insert(
                            entry.instance_identity(),
                            ReplicaObject {
                                class_identity: entry.class_identity(),
                                fields: entry.fields().to_vec(),
                            },
                        );
                    }
                }
                Op::Destroy(identities) => {
                    for identity in identities {
                        self.objects.remove(identity);
                    }
                }
                Op::Set(entries) => {
                    for entry in entries {
                        let object = self
                            .objects
                            .get_mut(&entry.instance_identity())
                            .ok_or_else(ShareError::unknown_object)?;
                        for (index, value) in entry.fields() {
                            let slot = object.fields.get_mut(*index as usize).ok_or_else(|| {
                                ShareError::InvalidMessage(format!(
                                    "field #{} out of range for instance {}",
                                    index,
                                    entry.instance_identity()
                                ))
                            })?;
                            *slot = value.clone();
                        }
                    }
                }
                Op::Call(call) => {
                    results.push(registry.invoke(call.target, call.this_arg, &call.args)?);
                }
            }
        }

        trace!(objects = self.objects.len(), ops = update.len(), "applied update");
        Ok(results)
    }

    pub fn get(&self, identity: Identity) -> Option<&ReplicaObject> {
        self.objects.get(&identity)
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.objects.contains_key(&identity)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn type_uid(&self, registry: &SchemaRegistry, identity: Identity) -> Result<String> {
        let object = self.get(identity).ok_or_else(ShareError::unknown_object)?;
        Ok(registry.by_identity(object.class_identity)?.uid().to_string())
    }

    pub fn field_name(&self, registry: &SchemaRegistry, identity: Identity, index: FieldIndex) -> Result<String> {
        let object = self.get(identity).ok_or_else(ShareError::unknown_object)?;
        let definition = registry.by_identity(object.class_identity)?;
        definition
            .accessors()
            .and_then(|a| a.name_of(index as usize))
            .map(str::to_string)
            .ok_or_else(|| ShareError::UnknownField(format!("#{}", index)))
    }

    pub fn field(&self, registry: &SchemaRegistry, identity: Identity, name: &str) -> Result<&WireValue> {
        let object = self.get(identity).ok_or_else(ShareError::unknown_object)?;
        let definition = registry.by_identity(object.class_identity)?;
        let index = definition
            .accessors()
            .ok_or_else(|| ShareError::UnknownSchema(definition.uid().to_string()))?
            .resolve(name)?
            .slot();
        object
            .fields
            .get(index)
            .ok_or_else(|| ShareError::UnknownField(name.to_string()))
    }
}

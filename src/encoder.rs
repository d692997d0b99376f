//! Compact and debug encodings of shared-object changes.
//!
//! Every function returns both representations built side by side from
//! the same walk, so they always describe the same triples.

use crate::error::{Result, ShareError};
use crate::instance::{SharedInstance, Value};
use crate::observer::PendingChangeSet;
use crate::protocol::*;
use crate::registry::{DefinitionKind, SchemaRegistry};
use ahash::AHashSet;

/// Encodes one field value. Composite values become the referenced
/// instance's identity, which must already be assigned.
pub fn encode_value(value: &Value) -> Result<WireValue> {
    Ok(match value {
        Value::Null => WireValue::Null,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Number(n) => WireValue::Number(*n),
        Value::BigInt(i) => WireValue::Integer(*i),
        Value::String(s) => WireValue::String(s.clone()),
        Value::Shared(instance) => {
            let identity = instance.identity().ok_or_else(ShareError::unknown_object)?;
            WireValue::reference(identity)
        }
    })
}

fn identity_of(instance: &SharedInstance) -> Result<Identity> {
    instance.identity().ok_or_else(ShareError::unknown_object)
}

/// Accumulates ops in both encodings. `finish` orders them
/// CREATE, DESTROY, SET, CALL and drops empty groups.
#[derive(Debug, Default)]
pub struct UpdateBuilder {
    creates: Vec<CreateEntry>,
    destroys: Vec<Identity>,
    sets: Vec<SetEntry>,
    calls: Vec<CallOp>,
    debug: DebugUpdate,
}

impl UpdateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_set<'a, I>(&mut self, instance: &SharedInstance, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (usize, &'a Value)>,
    {
        let identity = identity_of(instance)?;
        let accessors = instance.accessors();

        let mut compact = Vec::new();
        let mut named = Vec::new();
        for (index, value) in fields {
            let encoded = encode_value(value)?;
            let name = accessors
                .name_of(index)
                .ok_or_else(|| ShareError::UnknownField(format!("#{}", index)))?;
            named.push((name.to_string(), encoded.clone()));
            compact.push((index as FieldIndex, encoded));
        }

        if compact.is_empty() {
            return Ok(());
        }

        self.sets.push(SetEntry(identity, compact));
        self.debug
            .set
            .push(DebugEntry(instance.type_uid().to_string(), identity, DebugFields(named)));
        Ok(())
    }

    pub fn push_create(&mut self, instance: &SharedInstance) -> Result<()> {
        let identity = identity_of(instance)?;
        let class_identity = instance
            .type_identity()
            .ok_or_else(|| ShareError::UnknownSchema(instance.type_uid().to_string()))?;

        let mut values = Vec::new();
        let mut named = Vec::new();
        for (name, value) in instance.fields() {
            let encoded = encode_value(&value)?;
            named.push((name, encoded.clone()));
            values.push(encoded);
        }

        self.creates.push(CreateEntry(class_identity, identity, values));
        self.debug
            .create
            .push(DebugEntry(instance.type_uid().to_string(), identity, DebugFields(named)));
        Ok(())
    }

    pub fn push_destroy(&mut self, instance: &SharedInstance) -> Result<()> {
        let identity = identity_of(instance)?;
        self.destroys.push(identity);
        self.debug.destroy.push(identity);
        Ok(())
    }

    pub fn push_call(
        &mut self,
        registry: &SchemaRegistry,
        function: &str,
        this: Option<&SharedInstance>,
        args: &[Value],
    ) -> Result<()> {
        let definition = registry
            .get(function)
            .map_err(|_| ShareError::unknown_function())?;
        if definition.kind() != DefinitionKind::Func {
            return Err(ShareError::unknown_function());
        }
        let target = definition.identity().ok_or_else(ShareError::unknown_function)?;
        let this_arg = this.map(identity_of).transpose()?;
        let args = args.iter().map(encode_value).collect::<Result<Vec<_>>>()?;

        self.debug
            .call
            .push(DebugCall(definition.uid().to_string(), this_arg, args.clone()));
        self.calls.push(CallOp { target, this_arg, args });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.destroys.is_empty() && self.sets.is_empty() && self.calls.is_empty()
    }

    pub fn finish(self) -> (UpdateOfShared, DebugUpdate) {
        let mut ops = Vec::new();
        if !self.creates.is_empty() {
            ops.push(Op::Create(self.creates));
        }
        if !self.destroys.is_empty() {
            ops.push(Op::Destroy(self.destroys));
        }
        if !self.sets.is_empty() {
            ops.push(Op::Set(self.sets));
        }
        ops.extend(self.calls.into_iter().map(Op::Call));
        (ops, self.debug)
    }
}

/// Encodes an observer's accumulated writes as a single SET op.
pub fn encode_changes(changes: &PendingChangeSet) -> Result<(UpdateOfShared, DebugUpdate)> {
    let mut builder = UpdateBuilder::new();
    for pending in changes.iter() {
        builder.push_set(&pending.instance, pending.dirty_fields())?;
    }
    Ok(builder.finish())
}

/// Full-state CREATE ops for `root` and everything reachable from it,
/// referenced instances before the instances that point at them.
pub fn encode_create(root: &SharedInstance) -> Result<(UpdateOfShared, DebugUpdate)> {
    let mut builder = UpdateBuilder::new();
    let mut visited = AHashSet::new();
    create_walk(root, &mut builder, &mut visited)?;
    Ok(builder.finish())
}

fn create_walk(
    instance: &SharedInstance,
    builder: &mut UpdateBuilder,
    visited: &mut AHashSet<usize>,
) -> Result<()> {
    if !visited.insert(instance.key()) {
        return Ok(());
    }
    for child in instance.composite_children() {
        create_walk(&child, builder, visited)?;
    }
    builder.push_create(instance)
}

pub fn encode_destroy(instances: &[SharedInstance]) -> Result<(UpdateOfShared, DebugUpdate)> {
    let mut builder = UpdateBuilder::new();
    for instance in instances {
        builder.push_destroy(instance)?;
    }
    Ok(builder.finish())
}

pub fn encode_call(
    registry: &SchemaRegistry,
    function: &str,
    this: Option<&SharedInstance>,
    args: &[Value],
) -> Result<(UpdateOfShared, DebugUpdate)> {
    let mut builder = UpdateBuilder::new();
    builder.push_call(registry, function, this, args)?;
    Ok(builder.finish())
}

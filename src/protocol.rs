use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Numeric identity of a definition or a shared instance.
pub type Identity = u32;

/// Position of a field in its schema's declaration order.
pub type FieldIndex = u32;

/// A full update: the ops one observer receives in one flush.
pub type UpdateOfShared = Vec<Op>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Create = 1,
    Destroy = 2,
    Set = 3,
    Call = 4,
}

impl OpCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(OpCode::Create),
            2 => Some(OpCode::Destroy),
            3 => Some(OpCode::Set),
            4 => Some(OpCode::Call),
            _ => None,
        }
    }
}

/// A primitive as it travels on the wire. References to shared instances
/// are carried as their identity in `Integer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl WireValue {
    pub fn reference(identity: Identity) -> Self {
        WireValue::Integer(identity as i64)
    }

    pub fn as_identity(&self) -> Option<Identity> {
        match self {
            WireValue::Integer(v) => Identity::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Number(v) => Some(*v),
            WireValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }
}

impl From<bool> for WireValue {
    fn from(value: bool) -> Self {
        WireValue::Bool(value)
    }
}

impl From<f64> for WireValue {
    fn from(value: f64) -> Self {
        WireValue::Number(value)
    }
}

impl From<i64> for WireValue {
    fn from(value: i64) -> Self {
        WireValue::Integer(value)
    }
}

impl From<&str> for WireValue {
    fn from(value: &str) -> Self {
        WireValue::String(value.to_string())
    }
}

/// `[classIdentity, instanceIdentity, fields]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEntry(pub Identity, pub Identity, pub Vec<WireValue>);

impl CreateEntry {
    pub fn class_identity(&self) -> Identity {
        self.0
    }

    pub fn instance_identity(&self) -> Identity {
        self.1
    }

    pub fn fields(&self) -> &[WireValue] {
        &self.2
    }
}

/// `[instanceIdentity, [[fieldIndex, value], ...]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetEntry(pub Identity, pub Vec<(FieldIndex, WireValue)>);

impl SetEntry {
    pub fn instance_identity(&self) -> Identity {
        self.0
    }

    pub fn fields(&self) -> &[(FieldIndex, WireValue)] {
        &self.1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallOp {
    pub target: Identity,
    pub this_arg: Option<Identity>,
    pub args: Vec<WireValue>,
}

/// One compact op. Serializes as a tagged array:
/// `[1, creates]`, `[2, identities]`, `[3, sets]` or `[4, target, this, args]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Create(Vec<CreateEntry>),
    Destroy(Vec<Identity>),
    Set(Vec<SetEntry>),
    Call(CallOp),
}

impl Op {
    pub fn code(&self) -> OpCode {
        match self {
            Op::Create(_) => OpCode::Create,
            Op::Destroy(_) => OpCode::Destroy,
            Op::Set(_) => OpCode::Set,
            Op::Call(_) => OpCode::Call,
        }
    }
}

impl Serialize for Op {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = if matches!(self, Op::Call(_)) { 4 } else { 2 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&(self.code() as u8))?;
        match self {
            Op::Create(entries) => seq.serialize_element(entries)?,
            Op::Destroy(identities) => seq.serialize_element(identities)?,
            Op::Set(entries) => seq.serialize_element(entries)?,
            Op::Call(call) => {
                seq.serialize_element(&call.target)?;
                seq.serialize_element(&call.this_arg)?;
                seq.serialize_element(&call.args)?;
            }
        }
        seq.end()
    }
}

struct OpVisitor;

fn next_part<'de, A, T>(seq: &mut A, index: usize, expected: &dyn de::Expected) -> std::result::Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: Deserialize<'de>,
{
    seq.next_element()?
        .ok_or_else(|| de::Error::invalid_length(index, expected))
}

impl<'de> Visitor<'de> for OpVisitor {
    type Value = Op;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array tagged with an op code")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Op, A::Error> {
        let code: u8 = next_part(&mut seq, 0, &self)?;
        let op = match OpCode::from_u8(code) {
            Some(OpCode::Create) => Op::Create(next_part(&mut seq, 1, &self)?),
            Some(OpCode::Destroy) => Op::Destroy(next_part(&mut seq, 1, &self)?),
            Some(OpCode::Set) => Op::Set(next_part(&mut seq, 1, &self)?),
            Some(OpCode::Call) => Op::Call(CallOp {
                target: next_part(&mut seq, 1, &self)?,
                this_arg: next_part(&mut seq, 2, &self)?,
                args: next_part(&mut seq, 3, &self)?,
            }),
            None => return Err(de::Error::custom(format!("unknown op code {}", code))),
        };
        Ok(op)
    }
}

impl<'de> Deserialize<'de> for Op {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_seq(OpVisitor)
    }
}

/// Field name to value pairs kept in schema declaration order.
/// Serializes as a map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugFields(pub Vec<(String, WireValue)>);

impl DebugFields {
    pub fn get(&self, name: &str) -> Option<&WireValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WireValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl Serialize for DebugFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct DebugFieldsVisitor;

impl<'de> Visitor<'de> for DebugFieldsVisitor {
    type Value = DebugFields;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of field names to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<DebugFields, A::Error> {
        let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((name, value)) = map.next_entry::<String, WireValue>()? {
            fields.push((name, value));
        }
        Ok(DebugFields(fields))
    }
}

impl<'de> Deserialize<'de> for DebugFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(DebugFieldsVisitor)
    }
}

/// `[typeUid, instanceIdentity, { fieldName: value }]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugEntry(pub String, pub Identity, pub DebugFields);

impl DebugEntry {
    pub fn type_uid(&self) -> &str {
        &self.0
    }

    pub fn instance_identity(&self) -> Identity {
        self.1
    }

    pub fn fields(&self) -> &DebugFields {
        &self.2
    }
}

/// `[functionUid, thisIdentity, args]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugCall(pub String, pub Option<Identity>, pub Vec<WireValue>);

/// Human-readable mirror of an [`UpdateOfShared`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugUpdate {
    #[serde(default)]
    pub create: Vec<DebugEntry>,
    #[serde(default)]
    pub destroy: Vec<Identity>,
    #[serde(default)]
    pub set: Vec<DebugEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub call: Vec<DebugCall>,
}

impl DebugUpdate {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.destroy.is_empty() && self.set.is_empty() && self.call.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub created: u32,
    pub destroyed: u32,
    pub instances_set: u32,
    pub fields_set: u32,
    pub calls: u32,
}

impl UpdateStats {
    pub fn of(update: &[Op]) -> Self {
        let mut stats = UpdateStats::default();
        for op in update {
            match op {
                Op::Create(entries) => stats.created += entries.len() as u32,
                Op::Destroy(identities) => stats.destroyed += identities.len() as u32,
                Op::Set(entries) => {
                    stats.instances_set += entries.len() as u32;
                    stats.fields_set += entries.iter().map(|e| e.1.len() as u32).sum::<u32>();
                }
                Op::Call(_) => stats.calls += 1,
            }
        }
        stats
    }
}

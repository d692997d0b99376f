use crate::error::{Result, ShareError};
use crate::instance::SharedInstance;
use crate::protocol::{Identity, WireValue};
use crate::schema::{instrument, AccessorTable, Schema};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    Class,
    Object,
    Func,
    Schema,
}

/// Native function callable through a CALL op: `(this, args) -> result`.
pub type NativeFn = Arc<dyn Fn(Option<Identity>, &[WireValue]) -> Result<WireValue> + Send + Sync>;

pub enum DefineValue {
    Class(Schema),
    Object(serde_json::Value),
    Func(NativeFn),
}

impl DefineValue {
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(Option<Identity>, &[WireValue]) -> Result<WireValue> + Send + Sync + 'static,
    {
        DefineValue::Func(Arc::new(f))
    }
}

/// A Rust type that declares a shared class.
pub trait SharedClass {
    const NAME: &'static str;

    fn schema() -> Schema;
}

enum DefinitionBody {
    Shape { schema: Schema, accessors: Arc<AccessorTable> },
    Object(serde_json::Value),
    Func(NativeFn),
}

pub struct Definition {
    name: String,
    short_name: String,
    kind: DefinitionKind,
    body: DefinitionBody,
    identity: OnceLock<Identity>,
}

impl Definition {
    fn new(name: &str, kind: DefinitionKind, body: DefinitionBody) -> Self {
        let short_name = name.rsplit('.').next().unwrap_or(name).to_string();
        Self {
            name: name.to_string(),
            short_name,
            kind,
            body,
            identity: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified dotted name; the debug encoding's type uid.
    pub fn uid(&self) -> &str {
        &self.name
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn kind(&self) -> DefinitionKind {
        self.kind
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.get().copied()
    }

    pub fn schema(&self) -> Option<&Schema> {
        match &self.body {
            DefinitionBody::Shape { schema, .. } => Some(schema),
            _ => None,
        }
    }

    pub fn accessors(&self) -> Option<&Arc<AccessorTable>> {
        match &self.body {
            DefinitionBody::Shape { accessors, .. } => Some(accessors),
            _ => None,
        }
    }

    pub fn object(&self) -> Option<&serde_json::Value> {
        match &self.body {
            DefinitionBody::Object(value) => Some(value),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<&NativeFn> {
        match &self.body {
            DefinitionBody::Func(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("identity", &self.identity())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// First identity handed to instances when no manifest raises it.
    pub identity_seed: Identity,
    /// First identity used by [`Manifest::generate`].
    pub manifest_base: Identity,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            identity_seed: 1000,
            manifest_base: 1,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity_seed(mut self, seed: Identity) -> Self {
        self.identity_seed = seed;
        self
    }

    pub fn with_manifest_base(mut self, base: Identity) -> Self {
        self.manifest_base = base;
        self
    }
}

/// Name to identity table agreed on by every process sharing objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, Identity>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, name: impl Into<String>, identity: Identity) -> Self {
        self.insert(name, identity);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, identity: Identity) {
        self.entries.insert(name.into(), identity);
    }

    pub fn get(&self, name: &str) -> Option<Identity> {
        self.entries.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Identity)> {
        self.entries.iter().map(|(n, i)| (n.as_str(), *i))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_identity(&self) -> Option<Identity> {
        self.entries.values().copied().max()
    }

    /// Numbers every registered name in sorted order starting at the
    /// registry's `manifest_base`.
    pub fn generate(registry: &SchemaRegistry) -> Result<Self> {
        let base = registry.config().manifest_base;
        let mut manifest = Manifest::new();
        for (offset, name) in registry.names()?.into_iter().enumerate() {
            manifest.insert(name, base + offset as Identity);
        }
        Ok(manifest)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Defining,
    Running,
}

struct RegistryState {
    definitions: AHashMap<String, Arc<Definition>>,
    by_identity: AHashMap<Identity, Arc<Definition>>,
    phase: Phase,
}

/// Process-wide table of named definitions. Cloning yields another handle
/// to the same table.
pub struct SchemaRegistry {
    state: Arc<RwLock<RegistryState>>,
    next_identity: Arc<AtomicU32>,
    config: RegistryConfig,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                definitions: AHashMap::new(),
                by_identity: AHashMap::new(),
                phase: Phase::Defining,
            })),
            next_identity: Arc::new(AtomicU32::new(config.identity_seed)),
            config,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|e| ShareError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|e| ShareError::LockPoisoned(e.to_string()))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn define(&self, name: &str, value: DefineValue) -> Result<Arc<Definition>> {
        match value {
            DefineValue::Class(schema) => self.register_shape(name, DefinitionKind::Class, schema),
            DefineValue::Object(object) => {
                self.register(Definition::new(name, DefinitionKind::Object, DefinitionBody::Object(object)))
            }
            DefineValue::Func(f) => {
                self.register(Definition::new(name, DefinitionKind::Func, DefinitionBody::Func(f)))
            }
        }
    }

    pub fn define_class<T: SharedClass>(&self) -> Result<Arc<Definition>> {
        self.register_shape(T::NAME, DefinitionKind::Class, T::schema())
    }

    pub fn define_schema(&self, name: &str, schema: Schema) -> Result<Arc<Definition>> {
        self.register_shape(name, DefinitionKind::Schema, schema)
    }

    pub fn define_schema_json(&self, name: &str, schema: &serde_json::Value) -> Result<Arc<Definition>> {
        self.define_schema(name, Schema::from_json(schema)?)
    }

    fn register_shape(&self, name: &str, kind: DefinitionKind, schema: Schema) -> Result<Arc<Definition>> {
        schema.validate()?;
        let accessors = Arc::new(instrument(&schema));
        self.register(Definition::new(name, kind, DefinitionBody::Shape { schema, accessors }))
    }

    fn register(&self, definition: Definition) -> Result<Arc<Definition>> {
        if definition.name.is_empty() {
            return Err(ShareError::InvalidSchema("definition name must not be empty".to_string()));
        }

        let mut state = self.write()?;
        if state.phase == Phase::Running {
            return Err(ShareError::RuntimeRegistration(definition.name));
        }
        if state.definitions.contains_key(&definition.name) {
            return Err(ShareError::DuplicateDefinition(definition.name));
        }

        debug!(name = %definition.name, kind = ?definition.kind, "registered definition");

        let definition = Arc::new(definition);
        state
            .definitions
            .insert(definition.name.clone(), Arc::clone(&definition));
        Ok(definition)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Definition>> {
        self.read()?
            .definitions
            .get(name)
            .cloned()
            .ok_or_else(|| ShareError::UnknownSchema(name.to_string()))
    }

    pub fn by_identity(&self, identity: Identity) -> Result<Arc<Definition>> {
        self.read()?
            .by_identity
            .get(&identity)
            .cloned()
            .ok_or_else(|| ShareError::UnknownSchema(format!("#{}", identity)))
    }

    pub fn has(&self, name: &str) -> bool {
        self.read()
            .map(|state| state.definitions.contains_key(name))
            .unwrap_or(false)
    }

    /// Whether `definition` is the one registered here under its name.
    pub fn owns(&self, definition: &Arc<Definition>) -> bool {
        self.read()
            .ok()
            .and_then(|state| state.definitions.get(definition.name()).cloned())
            .map(|registered| Arc::ptr_eq(&registered, definition))
            .unwrap_or(false)
    }

    pub fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read()?.definitions.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn len(&self) -> usize {
        self.read().map(|state| state.definitions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.read()
            .map(|state| state.phase == Phase::Running)
            .unwrap_or(false)
    }

    fn check_references(state: &RegistryState) -> Result<()> {
        for definition in state.definitions.values() {
            let Some(schema) = definition.schema() else { continue };
            for target in schema.composite_targets() {
                let resolved = state.definitions.get(target).and_then(|d| d.schema());
                if resolved.is_none() {
                    return Err(ShareError::InvalidSchema(format!(
                        "'{}' references unknown schema '{}'",
                        definition.name, target
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reconciles a build manifest with the registered definitions and
    /// leaves the definition phase. Every name must appear on both sides.
    pub fn load_defines(&self, manifest: &Manifest) -> Result<()> {
        let mut state = self.write()?;
        if state.phase == Phase::Running {
            return Err(ShareError::RuntimeRegistration("load_defines".to_string()));
        }
        Self::check_references(&state)?;

        let mut unresolved: Vec<String> = state
            .definitions
            .keys()
            .filter(|name| manifest.get(name).is_none())
            .cloned()
            .collect();
        unresolved.extend(
            manifest
                .iter()
                .filter(|(name, _)| !state.definitions.contains_key(*name))
                .map(|(name, _)| name.to_string()),
        );

        let mut claimed: AHashMap<Identity, &str> = AHashMap::new();
        for (name, identity) in manifest.iter() {
            if let Some(other) = claimed.insert(identity, name) {
                unresolved.push(other.to_string());
                unresolved.push(name.to_string());
            }
        }

        if !unresolved.is_empty() {
            unresolved.sort();
            unresolved.dedup();
            return Err(ShareError::UnresolvedDefinition { names: unresolved });
        }

        let mut by_identity = AHashMap::with_capacity(manifest.len());
        for (name, identity) in manifest.iter() {
            if let Some(definition) = state.definitions.get(name) {
                let _ = definition.identity.set(identity);
                by_identity.insert(identity, Arc::clone(definition));
            }
        }
        state.by_identity = by_identity;
        state.phase = Phase::Running;

        if let Some(max) = manifest.max_identity() {
            self.next_identity.fetch_max(max.saturating_add(1), Ordering::Relaxed);
        }

        debug!(
            definitions = manifest.len(),
            next_identity = self.next_identity.load(Ordering::Relaxed),
            "loaded defines"
        );
        Ok(())
    }

    pub fn load_defines_from_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let manifest = Manifest::from_path(path)?;
        self.load_defines(&manifest)
    }

    pub fn assign_identities(&self) -> Result<Manifest> {
        let manifest = Manifest::generate(self)?;
        self.load_defines(&manifest)?;
        Ok(manifest)
    }

    /// Leaves the definition phase without assigning any identities.
    pub fn finish_definitions(&self) -> Result<()> {
        let mut state = self.write()?;
        Self::check_references(&state)?;
        state.phase = Phase::Running;
        Ok(())
    }

    pub fn next_identity(&self) -> Identity {
        self.next_identity.fetch_add(1, Ordering::Relaxed)
    }

    pub fn peek_identity(&self) -> Identity {
        self.next_identity.load(Ordering::Relaxed)
    }

    pub fn invoke(&self, identity: Identity, this: Option<Identity>, args: &[WireValue]) -> Result<WireValue> {
        let definition = self
            .by_identity(identity)
            .map_err(|_| ShareError::unknown_function())?;
        let function = definition.function().ok_or_else(ShareError::unknown_function)?;
        function.as_ref()(this, args)
    }

    /// Materializes an object literal as an instance of the named schema.
    pub fn plain(&self, schema: &str, source: &serde_json::Value) -> Result<SharedInstance> {
        crate::instance::plain(self, schema, source)
    }

    pub fn instantiate(&self, schema: &str) -> Result<SharedInstance> {
        SharedInstance::new(&self.get(schema)?)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SchemaRegistry {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            next_identity: Arc::clone(&self.next_identity),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSchema, PrimitiveType};
    use serde_json::json;

    struct Position;

    impl SharedClass for Position {
        const NAME: &'static str = "game.Position";

        fn schema() -> Schema {
            Schema::new()
                .with_field(FieldSchema::primitive("x", PrimitiveType::Number))
                .with_field(FieldSchema::primitive("y", PrimitiveType::Number))
        }
    }

    #[test]
    fn test_define_tags_metadata() {
        let registry = SchemaRegistry::new();
        let definition = registry.define_class::<Position>().unwrap();

        assert_eq!(definition.uid(), "game.Position");
        assert_eq!(definition.short_name(), "Position");
        assert_eq!(definition.kind(), DefinitionKind::Class);
        assert_eq!(definition.accessors().unwrap().len(), 2);
        assert_eq!(definition.identity(), None);
    }

    #[test]
    fn test_duplicate_definition() {
        let registry = SchemaRegistry::new();
        registry.define("A", DefineValue::Object(json!({}))).unwrap();

        let err = registry.define("A", DefineValue::Object(json!({}))).unwrap_err();
        assert!(matches!(err, ShareError::DuplicateDefinition(name) if name == "A"));
    }

    #[test]
    fn test_define_after_startup_rejected() {
        let registry = SchemaRegistry::new();
        registry.define_schema_json("Position", &json!({ "x": "number" })).unwrap();
        registry.assign_identities().unwrap();

        let err = registry.define_schema_json("Velocity", &json!({ "dx": "number" })).unwrap_err();
        assert!(matches!(err, ShareError::RuntimeRegistration(name) if name == "Velocity"));
    }

    #[test]
    fn test_define_schema_rejects_array() {
        let registry = SchemaRegistry::new();
        let err = registry.define_schema_json("Bad", &json!(["x"])).unwrap_err();
        assert!(matches!(err, ShareError::InvalidSchema(_)));
        assert!(!registry.has("Bad"));
    }

    #[test]
    fn test_load_defines_assigns_identities() {
        let registry = SchemaRegistry::new();
        registry.define_schema_json("game.Position", &json!({ "x": "number" })).unwrap();
        registry.define("game.spawn", DefineValue::func(|_, _| Ok(WireValue::Null))).unwrap();

        let manifest = Manifest::new()
            .with_entry("game.Position", 12)
            .with_entry("game.spawn", 4000);
        registry.load_defines(&manifest).unwrap();

        assert_eq!(registry.get("game.Position").unwrap().identity(), Some(12));
        assert_eq!(registry.by_identity(4000).unwrap().name(), "game.spawn");
        assert!(registry.is_running());
        assert_eq!(registry.next_identity(), 4001);
    }

    #[test]
    fn test_identity_counter_keeps_seed() {
        let registry = SchemaRegistry::new();
        registry.define_schema_json("Position", &json!({ "x": "number" })).unwrap();
        registry.assign_identities().unwrap();

        assert_eq!(registry.get("Position").unwrap().identity(), Some(1));
        assert_eq!(registry.next_identity(), 1000);
        assert_eq!(registry.next_identity(), 1001);
    }

    #[test]
    fn test_load_defines_reports_every_mismatch() {
        let registry = SchemaRegistry::new();
        registry.define_schema_json("game.Player", &json!({ "hp": "number" })).unwrap();
        registry.define_schema_json("game.Enemy", &json!({ "hp": "number" })).unwrap();
        registry.define_schema_json("game.Item", &json!({ "id": "string" })).unwrap();

        let manifest = Manifest::new()
            .with_entry("game.Item", 3)
            .with_entry("game.Boss", 4);

        let err = registry.load_defines(&manifest).unwrap_err();
        match err {
            ShareError::UnresolvedDefinition { names } => {
                assert_eq!(names, vec!["game.Boss", "game.Enemy", "game.Player"]);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!registry.is_running());
    }

    #[test]
    fn test_load_defines_rejects_shared_identity() {
        let registry = SchemaRegistry::new();
        registry.define_schema_json("A", &json!({})).unwrap();
        registry.define_schema_json("B", &json!({})).unwrap();

        let manifest = Manifest::new().with_entry("A", 1).with_entry("B", 1);
        assert!(matches!(
            registry.load_defines(&manifest),
            Err(ShareError::UnresolvedDefinition { .. })
        ));
    }

    #[test]
    fn test_unknown_composite_target() {
        let registry = SchemaRegistry::new();
        registry.define_schema_json("Node", &json!({ "next": "Missing" })).unwrap();

        assert!(matches!(registry.assign_identities(), Err(ShareError::InvalidSchema(_))));
    }

    #[test]
    fn test_manifest_json_roundtrip() {
        let registry = SchemaRegistry::with_config(RegistryConfig::new().with_manifest_base(10));
        registry.define_schema_json("b.Second", &json!({})).unwrap();
        registry.define_schema_json("a.First", &json!({})).unwrap();

        let manifest = Manifest::generate(&registry).unwrap();
        assert_eq!(manifest.get("a.First"), Some(10));
        assert_eq!(manifest.get("b.Second"), Some(11));

        let text = manifest.to_json_string().unwrap();
        assert_eq!(Manifest::from_json_str(&text).unwrap(), manifest);
    }

    #[test]
    fn test_load_defines_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defines.json");
        std::fs::write(&path, r#"{ "game.Position": 7, "game.spawn": 2500 }"#).unwrap();

        let manifest = Manifest::from_path(&path).unwrap();
        assert_eq!(manifest.get("game.Position"), Some(7));
        assert_eq!(manifest.len(), 2);

        let registry = SchemaRegistry::new();
        registry.define_schema_json("game.Position", &json!({ "x": "number" })).unwrap();
        registry.define("game.spawn", DefineValue::func(|_, _| Ok(WireValue::Null))).unwrap();
        registry.load_defines_from_path(&path).unwrap();

        assert_eq!(registry.get("game.Position").unwrap().identity(), Some(7));
        assert_eq!(registry.by_identity(2500).unwrap().name(), "game.spawn");
        assert_eq!(registry.next_identity(), 2501);

        let missing = dir.path().join("missing.json");
        assert!(matches!(Manifest::from_path(&missing), Err(ShareError::Io(_))));
        assert!(matches!(
            SchemaRegistry::new().load_defines_from_path(&missing),
            Err(ShareError::Io(_))
        ));
    }

    #[test]
    fn test_manifest_file_must_be_name_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defines.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(Manifest::from_path(&path).is_err());
    }

    #[test]
    fn test_invoke_function() {
        let registry = SchemaRegistry::new();
        registry
            .define(
                "math.add",
                DefineValue::func(|_, args| {
                    let sum = args.iter().filter_map(|a| a.as_f64()).sum::<f64>();
                    Ok(WireValue::Number(sum))
                }),
            )
            .unwrap();
        registry.define("config", DefineValue::Object(json!({ "debug": true }))).unwrap();
        let manifest = registry.assign_identities().unwrap();

        let add = manifest.get("math.add").unwrap();
        let result = registry
            .invoke(add, None, &[WireValue::Number(1.5), WireValue::Integer(2)])
            .unwrap();
        assert_eq!(result, WireValue::Number(3.5));

        let config = manifest.get("config").unwrap();
        assert!(matches!(
            registry.invoke(config, None, &[]),
            Err(ShareError::UnknownReference(_))
        ));
        assert_eq!(registry.get("config").unwrap().object(), Some(&json!({ "debug": true })));
    }
}

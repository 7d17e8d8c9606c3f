use super::extension::Extension;
use super::registry::{ExtensionRegistry, NativeClassDef};
use super::resource_manager::ResourceRegistry;
use crate::compiler::chunk::{CodeChunk, TypeHint, UserFunc};
use crate::core::interner::Interner;
use crate::core::value::{Reference, Symbol, Val, Visibility};
use crate::vm::engine::{VM, VmError};
use indexmap::IndexMap;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

pub type NativeHandler = fn(&mut VM, args: &[Val]) -> Result<Val, VmError>;

#[derive(Clone)]
pub enum MethodBody {
    User(Rc<UserFunc>),
    Native(NativeHandler),
    /// Interface or abstract method: a contract only.
    Abstract,
}

pub struct MethodEntry {
    /// As declared.
    pub name: Symbol,
    pub body: MethodBody,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    /// Lowercase name of the class that declared the method.
    pub declaring_class: Symbol,
}

impl MethodEntry {
    pub fn is_abstract(&self) -> bool {
        matches!(self.body, MethodBody::Abstract)
    }
}

#[derive(Clone)]
pub struct PropertyEntry {
    pub name: Symbol,
    /// `None` for a typed property with no default (uninitialized).
    pub default: Option<Val>,
    pub visibility: Visibility,
    pub declaring_class: Symbol,
    pub ty: Option<TypeHint>,
    pub is_readonly: bool,
}

/// Static property slot; subclasses share the cell unless they redeclare it.
#[derive(Clone)]
pub struct StaticPropEntry {
    pub cell: Reference,
    pub visibility: Visibility,
    pub declaring_class: Symbol,
}

pub enum ConstState {
    Pending(Rc<CodeChunk>),
    Evaluating,
    Ready(Val),
}

pub struct ClassConstEntry {
    pub state: RefCell<ConstState>,
    pub visibility: Visibility,
    pub declaring_class: Symbol,
}

pub struct ClassDef {
    pub name: Symbol,
    pub lc_name: Symbol,
    pub parent: Option<Rc<ClassDef>>,
    /// Lowercase names of every interface implemented, inherited ones included.
    pub interfaces: Vec<Symbol>,
    pub is_interface: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_native: bool,
    /// Keyed by lowercase name, inherited methods included.
    pub methods: HashMap<Symbol, Rc<MethodEntry>>,
    pub properties: IndexMap<Symbol, PropertyEntry>,
    pub static_props: HashMap<Symbol, StaticPropEntry>,
    pub constants: HashMap<Symbol, Rc<ClassConstEntry>>,
}

impl ClassDef {
    pub fn empty(name: Symbol) -> Self {
        Self {
            name,
            lc_name: name,
            parent: None,
            interfaces: Vec::new(),
            is_interface: false,
            is_abstract: false,
            is_final: false,
            is_native: false,
            methods: HashMap::new(),
            properties: IndexMap::new(),
            static_props: HashMap::new(),
            constants: HashMap::new(),
        }
    }

    /// Start a class that inherits everything from `parent`.
    pub fn derive(name: Symbol, lc_name: Symbol, parent: Option<Rc<ClassDef>>) -> Self {
        let mut def = Self::empty(name);
        def.lc_name = lc_name;
        if let Some(parent) = &parent {
            def.interfaces = parent.interfaces.clone();
            def.methods = parent.methods.clone();
            def.properties = parent.properties.clone();
            def.static_props = parent.static_props.clone();
            def.constants = parent.constants.clone();
        }
        def.parent = parent;
        def
    }

    /// `instanceof` test by lowercase class or interface name.
    pub fn is_subclass_of(&self, lc_name: Symbol) -> bool {
        if self.interfaces.contains(&lc_name) {
            return true;
        }
        let mut class = Some(self);
        while let Some(def) = class {
            if def.lc_name == lc_name {
                return true;
            }
            class = def.parent.as_deref();
        }
        false
    }

    pub fn find_method(&self, lc_name: Symbol) -> Option<&Rc<MethodEntry>> {
        self.methods.get(&lc_name)
    }

    /// Whether `ancestor` is this class or one of its parents.
    pub fn extends_class(&self, ancestor: Symbol) -> bool {
        let mut class = Some(self);
        while let Some(def) = class {
            if def.lc_name == ancestor {
                return true;
            }
            class = def.parent.as_deref();
        }
        false
    }

    pub fn add_interface(&mut self, lc_name: Symbol) {
        if !self.interfaces.contains(&lc_name) {
            self.interfaces.push(lc_name);
        }
    }
}

/// Engine-wide state shared across requests: the immutable native registry.
pub struct EngineContext {
    pub registry: ExtensionRegistry,
}

/// Per-request settings behind `ini_get`, `ini_set` and `set_time_limit`.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Seconds; 0 disables the limit.
    pub max_execution_time: i64,
    pub precision: i64,
    pub serialize_precision: i64,
    pub error_reporting: i64,
    pub display_errors: bool,
    pub enable_gc: bool,
    /// Allocations between automatic cycle collections.
    pub gc_threshold: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_execution_time: 0,
            precision: 14,
            serialize_precision: -1,
            error_reporting: E_ALL,
            display_errors: true,
            enable_gc: true,
            gc_threshold: 10_000,
        }
    }
}

pub const E_ALL: i64 = 32767;

fn parse_ini_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "on" | "yes" | "true" | "stdout" | "stderr"
    )
}

fn ini_bool(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

impl RequestConfig {
    /// Names this config understands.
    pub const KEYS: &'static [&'static str] = &[
        "max_execution_time",
        "precision",
        "serialize_precision",
        "error_reporting",
        "display_errors",
        "zend.enable_gc",
        "gc_threshold",
    ];

    pub fn get(&self, name: &str) -> Option<String> {
        let value = match name {
            "max_execution_time" => self.max_execution_time.to_string(),
            "precision" => self.precision.to_string(),
            "serialize_precision" => self.serialize_precision.to_string(),
            "error_reporting" => self.error_reporting.to_string(),
            "display_errors" => ini_bool(self.display_errors),
            "zend.enable_gc" => ini_bool(self.enable_gc),
            "gc_threshold" => self.gc_threshold.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Set a value, returning the old one. Unknown names are rejected with `None`.
    pub fn set(&mut self, name: &str, value: &str) -> Option<String> {
        let old = self.get(name)?;
        let int = || value.trim().parse::<i64>().unwrap_or(0);
        match name {
            "max_execution_time" => self.max_execution_time = int().max(0),
            "precision" => self.precision = int(),
            "serialize_precision" => self.serialize_precision = int(),
            "error_reporting" => self.error_reporting = int(),
            "display_errors" => self.display_errors = parse_ini_bool(value),
            "zend.enable_gc" => self.enable_gc = parse_ini_bool(value),
            "gc_threshold" => self.gc_threshold = int().max(1) as usize,
            _ => return None,
        }
        Some(old)
    }
}

pub struct RequestContext {
    pub engine: Arc<EngineContext>,
    pub interner: Interner,
    /// Keyed by lowercase name.
    pub classes: HashMap<Symbol, Rc<ClassDef>>,
    /// User functions, keyed by lowercase name.
    pub functions: HashMap<Symbol, Rc<UserFunc>>,
    /// Case-sensitive.
    pub constants: HashMap<Symbol, Val>,
    pub globals: IndexMap<Symbol, Val>,
    pub resources: ResourceRegistry,
    pub config: RequestConfig,
    /// Generic extension data storage keyed by TypeId
    pub extension_data: HashMap<TypeId, Box<dyn Any>>,
}

impl RequestContext {
    pub fn new(engine: Arc<EngineContext>) -> Self {
        Self::with_interner(engine, Interner::new())
    }

    /// Continue an existing symbol table, such as the one a script was compiled with.
    pub fn with_interner(engine: Arc<EngineContext>, interner: Interner) -> Self {
        let mut ctx = Self {
            engine: Arc::clone(&engine),
            interner,
            classes: HashMap::new(),
            functions: HashMap::new(),
            constants: HashMap::new(),
            globals: IndexMap::new(),
            resources: ResourceRegistry::new(),
            config: RequestConfig::default(),
            extension_data: HashMap::new(),
        };

        for (name, value) in engine.registry.constants() {
            let sym = ctx.interner.intern(name);
            ctx.constants.insert(sym, value.clone());
        }
        for class in engine.registry.classes() {
            ctx.declare_native_class(class);
        }

        engine.registry.request_init_all(&mut ctx);
        ctx
    }

    fn declare_native_class(&mut self, native: &NativeClassDef) {
        let name = self.interner.intern(&native.name);
        let lc_name = self.interner.intern_lower(&native.name);
        let parent = native
            .parent
            .as_ref()
            .and_then(|p| self.interner.find_lower(p))
            .and_then(|p| self.classes.get(&p).cloned());

        let mut def = ClassDef::derive(name, lc_name, parent);
        def.is_interface = native.is_interface;
        def.is_abstract = native.is_abstract;
        def.is_final = native.is_final;
        def.is_native = true;

        for iface in &native.interfaces {
            let iface_lc = self.interner.intern_lower(iface);
            def.add_interface(iface_lc);
            if let Some(iface_def) = self.classes.get(&iface_lc) {
                for inherited in iface_def.interfaces.clone() {
                    def.add_interface(inherited);
                }
            }
        }

        for (method_name, entry) in &native.methods {
            let declared = self.interner.intern(method_name);
            let key = self.interner.intern_lower(method_name);
            def.methods.insert(
                key,
                Rc::new(MethodEntry {
                    name: declared,
                    body: MethodBody::Native(entry.handler),
                    visibility: entry.visibility,
                    is_static: entry.is_static,
                    is_final: false,
                    declaring_class: lc_name,
                }),
            );
        }
        for method_name in &native.abstract_methods {
            let declared = self.interner.intern(method_name);
            let key = self.interner.intern_lower(method_name);
            def.methods.entry(key).or_insert_with(|| {
                Rc::new(MethodEntry {
                    name: declared,
                    body: MethodBody::Abstract,
                    visibility: Visibility::Public,
                    is_static: false,
                    is_final: false,
                    declaring_class: lc_name,
                })
            });
        }
        for (prop_name, default, visibility) in &native.properties {
            let sym = self.interner.intern(prop_name);
            def.properties.insert(
                sym,
                PropertyEntry {
                    name: sym,
                    default: Some(default.clone()),
                    visibility: *visibility,
                    declaring_class: lc_name,
                    ty: None,
                    is_readonly: false,
                },
            );
        }
        for (const_name, value) in &native.constants {
            let sym = self.interner.intern(const_name);
            def.constants.insert(
                sym,
                Rc::new(ClassConstEntry {
                    state: RefCell::new(ConstState::Ready(value.clone())),
                    visibility: Visibility::Public,
                    declaring_class: lc_name,
                }),
            );
        }
        self.classes.insert(lc_name, Rc::new(def));
    }

    pub fn get_extension_data<T: 'static>(&self) -> Option<&T> {
        self.extension_data
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    pub fn get_extension_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.extension_data
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut::<T>())
    }

    /// Store extension-specific data. Each extension should use its own
    /// type to avoid collisions in the TypeId-keyed map.
    pub fn set_extension_data<T: 'static>(&mut self, data: T) {
        self.extension_data
            .insert(TypeId::of::<T>(), Box::new(data));
    }

    pub fn insert_constant(&mut self, name: &[u8], value: Val) {
        let sym = self.interner.intern(name);
        self.constants.insert(sym, value);
    }

    pub fn lookup_class(&self, name: &[u8]) -> Option<Rc<ClassDef>> {
        let sym = self.interner.find_lower(name)?;
        self.classes.get(&sym).cloned()
    }
}

/// Builder for constructing EngineContext with extensions
///
/// # Example
/// ```ignore
/// let engine = EngineBuilder::new()
///     .with_core_extensions()
///     .build()?;
/// ```
pub struct EngineBuilder {
    extensions: Vec<Box<dyn Extension>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            extensions: Vec::new(),
        }
    }

    pub fn with_extension<E: Extension + 'static>(mut self, ext: E) -> Self {
        self.extensions.push(Box::new(ext));
        self
    }

    /// Add the standard library extensions.
    pub fn with_core_extensions(mut self) -> Self {
        self.extensions
            .push(Box::new(super::core_extension::CoreExtension));
        self.extensions
            .push(Box::new(super::stream_extension::StreamExtension));
        self.extensions
            .push(Box::new(super::mb_extension::MbStringExtension));
        self
    }

    /// Register every extension, calling `module_init` for each in order.
    pub fn build(self) -> Result<Arc<EngineContext>, String> {
        let mut registry = ExtensionRegistry::new();
        for ext in self.extensions {
            registry.register_extension(ext)?;
        }
        Ok(Arc::new(EngineContext { registry }))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        let engine = Arc::clone(&self.engine);
        engine.registry.request_shutdown_all(self);
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        self.registry.module_shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_known_keys() {
        let mut config = RequestConfig::default();
        assert_eq!(config.set("precision", "17"), Some("14".to_string()));
        assert_eq!(config.get("precision"), Some("17".to_string()));
        assert_eq!(config.set("zend.enable_gc", "off"), Some("1".to_string()));
        assert!(!config.enable_gc);
        assert_eq!(config.set("no.such.key", "1"), None);
    }

    #[test]
    fn native_classes_inherit_from_registered_parents() {
        let engine = EngineBuilder::new().with_core_extensions().build().unwrap();
        let ctx = RequestContext::new(engine);
        let type_error = ctx.lookup_class(b"TypeError").unwrap();
        let error = ctx.interner.find_lower(b"Error").unwrap();
        let throwable = ctx.interner.find_lower(b"Throwable").unwrap();
        assert!(type_error.is_subclass_of(error));
        assert!(type_error.is_subclass_of(throwable));
        assert!(ctx.lookup_class(b"typeerror").is_some());
    }
}

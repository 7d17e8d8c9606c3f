use super::context::{NativeHandler, RequestContext};
use super::extension::{Extension, ExtensionResult};
use crate::core::value::{Val, Visibility};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Native class definition for extension-provided classes
#[derive(Debug, Clone)]
pub struct NativeClassDef {
    pub name: Vec<u8>,
    pub parent: Option<Vec<u8>>,
    pub is_interface: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub interfaces: Vec<Vec<u8>>,
    pub methods: Vec<(Vec<u8>, NativeMethodEntry)>,
    /// Method names an interface requires of its implementors.
    pub abstract_methods: Vec<Vec<u8>>,
    pub properties: Vec<(Vec<u8>, Val, Visibility)>,
    pub constants: Vec<(Vec<u8>, Val)>,
}

impl NativeClassDef {
    pub fn new(name: &[u8]) -> Self {
        Self {
            name: name.to_vec(),
            parent: None,
            is_interface: false,
            is_abstract: false,
            is_final: false,
            interfaces: Vec::new(),
            methods: Vec::new(),
            abstract_methods: Vec::new(),
            properties: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn interface(name: &[u8], requires: &[&[u8]]) -> Self {
        let mut def = Self::new(name);
        def.is_interface = true;
        def.abstract_methods = requires.iter().map(|m| m.to_vec()).collect();
        def
    }

    pub fn extends(mut self, parent: &[u8]) -> Self {
        self.parent = Some(parent.to_vec());
        self
    }

    pub fn implements(mut self, interface: &[u8]) -> Self {
        self.interfaces.push(interface.to_vec());
        self
    }

    pub fn method(mut self, name: &[u8], handler: NativeHandler) -> Self {
        self.methods.push((
            name.to_vec(),
            NativeMethodEntry {
                handler,
                visibility: Visibility::Public,
                is_static: false,
            },
        ));
        self
    }

    pub fn static_method(mut self, name: &[u8], handler: NativeHandler) -> Self {
        self.methods.push((
            name.to_vec(),
            NativeMethodEntry {
                handler,
                visibility: Visibility::Public,
                is_static: true,
            },
        ));
        self
    }

    pub fn property(mut self, name: &[u8], default: Val, visibility: Visibility) -> Self {
        self.properties.push((name.to_vec(), default, visibility));
        self
    }

    pub fn constant(mut self, name: &[u8], value: Val) -> Self {
        self.constants.push((name.to_vec(), value));
        self
    }

    pub fn final_class(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// Native method entry for extension-provided class methods
#[derive(Debug, Clone, Copy)]
pub struct NativeMethodEntry {
    pub handler: NativeHandler,
    pub visibility: Visibility,
    pub is_static: bool,
}

/// Native function with the argument positions it takes by reference.
#[derive(Debug, Clone)]
pub struct NativeFunction {
    pub name: Vec<u8>,
    pub handler: NativeHandler,
    pub by_ref: Vec<usize>,
}

/// Extension registry - manages all loaded extensions and their registered components
///
/// This is stored in `EngineContext` and is immutable once the engine is built.
pub struct ExtensionRegistry {
    /// Keyed by lowercase name
    functions: HashMap<Vec<u8>, NativeFunction>,
    /// Keyed by lowercase name, in registration order so parents precede children
    classes: IndexMap<Vec<u8>, NativeClassDef>,
    extensions: Vec<Box<dyn Extension>>,
    extension_map: HashMap<String, usize>,
    constants: IndexMap<Vec<u8>, Val>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            classes: IndexMap::new(),
            extensions: Vec::new(),
            extension_map: HashMap::new(),
            constants: IndexMap::new(),
        }
    }

    pub fn register_function(&mut self, name: &[u8], handler: NativeHandler) {
        self.register_function_with_by_ref(name, handler, Vec::new());
    }

    /// Register a native function handler with by-ref argument positions.
    pub fn register_function_with_by_ref(
        &mut self,
        name: &[u8],
        handler: NativeHandler,
        by_ref: Vec<usize>,
    ) {
        self.functions.insert(
            name.to_ascii_lowercase(),
            NativeFunction {
                name: name.to_vec(),
                handler,
                by_ref,
            },
        );
    }

    pub fn register_class(&mut self, class: NativeClassDef) {
        self.classes.insert(class.name.to_ascii_lowercase(), class);
    }

    /// Constant names are case-sensitive.
    pub fn register_constant(&mut self, name: &[u8], value: Val) {
        self.constants.insert(name.to_vec(), value);
    }

    /// Case-insensitive lookup.
    pub fn get_function(&self, name: &[u8]) -> Option<&NativeFunction> {
        match self.functions.get(name) {
            Some(func) => Some(func),
            None => self.functions.get(&name.to_ascii_lowercase()),
        }
    }

    pub fn get_class(&self, name: &[u8]) -> Option<&NativeClassDef> {
        self.classes.get(&name.to_ascii_lowercase())
    }

    pub fn get_constant(&self, name: &[u8]) -> Option<&Val> {
        self.constants.get(name)
    }

    pub fn extension_loaded(&self, name: &str) -> bool {
        self.extension_map.contains_key(name)
    }

    pub fn get_extensions(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.info().name).collect()
    }

    /// Register an extension and call its `module_init` hook
    ///
    /// Returns an error if:
    /// - Extension with same name already registered
    /// - Dependencies are not satisfied
    /// - `module_init` fails
    pub fn register_extension(&mut self, extension: Box<dyn Extension>) -> Result<(), String> {
        let info = extension.info();

        if self.extension_map.contains_key(info.name) {
            return Err(format!("Extension '{}' is already registered", info.name));
        }

        for &dep in info.dependencies {
            if !self.extension_map.contains_key(dep) {
                return Err(format!(
                    "Extension '{}' depends on '{}' which is not loaded",
                    info.name, dep
                ));
            }
        }

        match extension.module_init(self) {
            ExtensionResult::Success => {
                tracing::debug!(
                    extension = info.name,
                    version = info.version,
                    functions = self.functions.len(),
                    "extension registered"
                );
                let index = self.extensions.len();
                self.extension_map.insert(info.name.to_string(), index);
                self.extensions.push(extension);
                Ok(())
            }
            ExtensionResult::Failure(msg) => Err(format!(
                "Extension '{}' module_init failed: {}",
                info.name, msg
            )),
        }
    }

    pub fn request_init_all(&self, context: &mut RequestContext) {
        for ext in &self.extensions {
            if let ExtensionResult::Failure(msg) = ext.request_init(context) {
                tracing::warn!(extension = ext.info().name, %msg, "request_init failed");
            }
        }
    }

    /// Reverse registration order.
    pub fn request_shutdown_all(&self, context: &mut RequestContext) {
        for ext in self.extensions.iter().rev() {
            if let ExtensionResult::Failure(msg) = ext.request_shutdown(context) {
                tracing::warn!(extension = ext.info().name, %msg, "request_shutdown failed");
            }
        }
    }

    pub fn module_shutdown_all(&mut self) {
        for ext in self.extensions.iter().rev() {
            if let ExtensionResult::Failure(msg) = ext.module_shutdown() {
                tracing::warn!(extension = ext.info().name, %msg, "module_shutdown failed");
            }
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &NativeFunction> {
        self.functions.values()
    }

    pub fn constants(&self) -> impl Iterator<Item = (&Vec<u8>, &Val)> {
        self.constants.iter()
    }

    pub fn classes(&self) -> impl Iterator<Item = &NativeClassDef> {
        self.classes.values()
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::extension::ExtensionInfo;
    use crate::vm::engine::{VM, VmError};

    fn answer(_vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
        Ok(Val::Int(42))
    }

    struct Answer;

    impl Extension for Answer {
        fn info(&self) -> ExtensionInfo {
            ExtensionInfo {
                name: "answer",
                version: "1.0",
                dependencies: &[],
            }
        }

        fn module_init(&self, registry: &mut ExtensionRegistry) -> ExtensionResult {
            registry.register_function(b"Deep_Thought", answer);
            registry.register_constant(b"ANSWER", Val::Int(42));
            ExtensionResult::Success
        }
    }

    struct NeedsMissing;

    impl Extension for NeedsMissing {
        fn info(&self) -> ExtensionInfo {
            ExtensionInfo {
                name: "needs_missing",
                version: "1.0",
                dependencies: &["missing"],
            }
        }
    }

    #[test]
    fn function_lookup_ignores_case() {
        let mut registry = ExtensionRegistry::new();
        registry.register_extension(Box::new(Answer)).unwrap();
        assert!(registry.get_function(b"deep_thought").is_some());
        assert!(registry.get_function(b"DEEP_THOUGHT").is_some());
        assert!(registry.get_constant(b"ANSWER").is_some());
        assert!(registry.get_constant(b"answer").is_none());
    }

    #[test]
    fn duplicate_and_missing_dependency_are_rejected() {
        let mut registry = ExtensionRegistry::new();
        registry.register_extension(Box::new(Answer)).unwrap();
        assert!(registry.register_extension(Box::new(Answer)).is_err());
        let err = registry
            .register_extension(Box::new(NeedsMissing))
            .unwrap_err();
        assert!(err.contains("depends on 'missing'"));
    }
}

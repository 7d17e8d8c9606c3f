use super::context::RequestContext;
use super::registry::ExtensionRegistry;

/// Name, version and the extensions that must be registered first.
#[derive(Debug, Clone)]
pub struct ExtensionInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub dependencies: &'static [&'static str],
}

/// Outcome of one lifecycle hook. A failed `module_init` aborts the engine
/// build; failures in the other hooks are logged and skipped.
#[derive(Debug)]
pub enum ExtensionResult {
    Success,
    Failure(String),
}

/// A bundle of native functions, classes and constants plugged into the engine.
///
/// `module_init` runs once while the engine is built and is where everything
/// gets registered. `request_init` runs for each new request context, and the
/// two shutdown hooks run in reverse registration order. Hooks are called on
/// the request's own thread.
pub trait Extension {
    fn info(&self) -> ExtensionInfo;

    fn module_init(&self, _registry: &mut ExtensionRegistry) -> ExtensionResult {
        ExtensionResult::Success
    }

    fn module_shutdown(&self) -> ExtensionResult {
        ExtensionResult::Success
    }

    fn request_init(&self, _context: &mut RequestContext) -> ExtensionResult {
        ExtensionResult::Success
    }

    fn request_shutdown(&self, _context: &mut RequestContext) -> ExtensionResult {
        ExtensionResult::Success
    }
}

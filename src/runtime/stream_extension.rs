use crate::builtins::filesystem;
use crate::core::value::Val;
use crate::runtime::context::RequestContext;
use crate::runtime::extension::{Extension, ExtensionInfo, ExtensionResult};
use crate::runtime::registry::ExtensionRegistry;

/// Stream functions plus the `STDIN`, `STDOUT` and `STDERR` handles.
///
/// The standard handles are opened per request, so each request's
/// registry owns its own ids for them.
pub struct StreamExtension;

impl Extension for StreamExtension {
    fn info(&self) -> ExtensionInfo {
        ExtensionInfo {
            name: "standard-streams",
            version: super::core_extension::PHP_VERSION,
            dependencies: &["Core"],
        }
    }

    fn module_init(&self, registry: &mut ExtensionRegistry) -> ExtensionResult {
        registry.register_function(b"fopen", filesystem::php_fopen);
        registry.register_function(b"fclose", filesystem::php_fclose);
        registry.register_function(b"fread", filesystem::php_fread);
        registry.register_function(b"fgets", filesystem::php_fgets);
        registry.register_function(b"fwrite", filesystem::php_fwrite);
        registry.register_function(b"fputs", filesystem::php_fputs);
        registry.register_function(b"feof", filesystem::php_feof);
        registry.register_function(b"ftell", filesystem::php_ftell);
        registry.register_function(b"fseek", filesystem::php_fseek);
        registry.register_function(b"rewind", filesystem::php_rewind);
        registry.register_function(b"get_resource_type", filesystem::php_get_resource_type);
        registry.register_function(b"get_resource_id", filesystem::php_get_resource_id);
        registry.register_function(b"file_get_contents", filesystem::php_file_get_contents);
        registry.register_function(b"file_put_contents", filesystem::php_file_put_contents);
        registry.register_function(b"file_exists", filesystem::php_file_exists);
        registry.register_function(b"unlink", filesystem::php_unlink);

        registry.register_constant(b"SEEK_SET", Val::Int(0));
        registry.register_constant(b"SEEK_CUR", Val::Int(1));
        registry.register_constant(b"SEEK_END", Val::Int(2));
        registry.register_constant(b"FILE_APPEND", Val::Int(filesystem::FILE_APPEND));

        ExtensionResult::Success
    }

    fn request_init(&self, context: &mut RequestContext) -> ExtensionResult {
        for (name, path, mode) in [
            ("STDIN", "php://stdin", "r"),
            ("STDOUT", "php://stdout", "w"),
            ("STDERR", "php://stderr", "w"),
        ] {
            match context.resources.open(path, mode) {
                Ok(id) => context.insert_constant(name.as_bytes(), Val::Resource(id)),
                Err(err) => return ExtensionResult::Failure(format!("{name}: {err}")),
            }
        }
        ExtensionResult::Success
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    #[test]
    fn standard_handles_are_stream_resources() {
        let (_, out) = run_code_capture_output(
            "<?php echo get_resource_type(STDOUT), ' ', get_resource_type(STDERR), ' ';
             var_dump(is_resource(STDIN));",
        )
        .unwrap();
        assert_eq!(out, "stream stream bool(true)\n");
    }
}

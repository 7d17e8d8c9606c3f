//! The mbstring subset: character-aware length, slicing, splitting and
//! case mapping over UTF-8.

use crate::builtins::mbstring;
use crate::core::value::Val;
use crate::runtime::extension::{Extension, ExtensionInfo, ExtensionResult};
use crate::runtime::registry::ExtensionRegistry;

pub struct MbStringExtension;

const FUNCTIONS: &[(&[u8], crate::runtime::context::NativeHandler)] = &[
    (b"mb_check_encoding", mbstring::php_mb_check_encoding),
    (b"mb_strlen", mbstring::php_mb_strlen),
    (b"mb_substr", mbstring::php_mb_substr),
    (b"mb_str_split", mbstring::php_mb_str_split),
    (b"mb_strtolower", mbstring::php_mb_strtolower),
    (b"mb_strtoupper", mbstring::php_mb_strtoupper),
    (b"mb_convert_case", mbstring::php_mb_convert_case),
];

impl Extension for MbStringExtension {
    fn info(&self) -> ExtensionInfo {
        ExtensionInfo {
            name: "mbstring",
            version: super::core_extension::PHP_VERSION,
            dependencies: &["Core"],
        }
    }

    fn module_init(&self, registry: &mut ExtensionRegistry) -> ExtensionResult {
        for &(name, handler) in FUNCTIONS {
            registry.register_function(name, handler);
        }
        for (name, mode) in [
            (&b"MB_CASE_UPPER"[..], mbstring::MB_CASE_UPPER),
            (b"MB_CASE_LOWER", mbstring::MB_CASE_LOWER),
            (b"MB_CASE_TITLE", mbstring::MB_CASE_TITLE),
        ] {
            registry.register_constant(name, Val::Int(mode));
        }
        ExtensionResult::Success
    }
}

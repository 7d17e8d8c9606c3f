use crate::builtins::{
    array, class, exception, function, info, math, serialize, spl, string, variable,
};
use crate::core::value::{Val, Visibility};
use crate::runtime::context::E_ALL;
use crate::runtime::extension::{Extension, ExtensionInfo, ExtensionResult};
use crate::runtime::registry::{ExtensionRegistry, NativeClassDef};

pub const PHP_VERSION: &str = "8.3.0";

/// The language core: builtin classes, the exception hierarchy, the
/// standard function library and its constants.
pub struct CoreExtension;

impl Extension for CoreExtension {
    fn info(&self) -> ExtensionInfo {
        ExtensionInfo {
            name: "Core",
            version: PHP_VERSION,
            dependencies: &[],
        }
    }

    fn module_init(&self, registry: &mut ExtensionRegistry) -> ExtensionResult {
        register_classes(registry);
        register_string_functions(registry);
        register_array_functions(registry);
        register_math_functions(registry);
        register_variable_functions(registry);
        register_function_and_class_functions(registry);
        register_runtime_functions(registry);
        register_constants(registry);
        tracing::debug!("core extension registered");
        ExtensionResult::Success
    }
}

/// Parents are registered before children: a class resolves its parent
/// and interfaces when it is declared.
fn register_classes(registry: &mut ExtensionRegistry) {
    // Interfaces
    registry.register_class(NativeClassDef::interface(b"Stringable", &[b"__toString"]));
    registry.register_class(NativeClassDef::interface(b"Throwable", &[]).implements(b"Stringable"));
    registry.register_class(NativeClassDef::interface(b"Traversable", &[]));
    registry.register_class(
        NativeClassDef::interface(
            b"Iterator",
            &[b"current", b"key", b"next", b"rewind", b"valid"],
        )
        .implements(b"Traversable"),
    );
    registry.register_class(
        NativeClassDef::interface(b"IteratorAggregate", &[b"getIterator"]).implements(b"Traversable"),
    );
    registry.register_class(NativeClassDef::interface(
        b"ArrayAccess",
        &[b"offsetExists", b"offsetGet", b"offsetSet", b"offsetUnset"],
    ));
    registry.register_class(NativeClassDef::interface(b"Countable", &[b"count"]));

    registry.register_class(NativeClassDef::new(b"stdClass"));

    registry.register_class(
        NativeClassDef::new(b"Closure")
            .final_class()
            .static_method(b"bind", class::closure_bind)
            .method(b"bindTo", class::closure_bind_to)
            .method(b"call", class::closure_call),
    );

    registry.register_class(
        NativeClassDef::new(b"Generator")
            .final_class()
            .implements(b"Iterator")
            .method(b"current", class::generator_current)
            .method(b"key", class::generator_key)
            .method(b"next", class::generator_next)
            .method(b"valid", class::generator_valid)
            .method(b"rewind", class::generator_rewind)
            .method(b"send", class::generator_send)
            .method(b"throw", class::generator_throw)
            .method(b"getReturn", class::generator_get_return),
    );

    registry.register_class(throwable_base(b"Exception"));
    registry.register_class(throwable_base(b"Error"));

    registry.register_class(
        NativeClassDef::new(b"ErrorException")
            .extends(b"Exception")
            .property(b"severity", Val::Int(1), Visibility::Protected)
            .method(b"__construct", exception::error_exception_construct)
            .method(b"getSeverity", exception::error_exception_get_severity),
    );

    for &(name, parent) in THROWABLE_TREE {
        registry.register_class(NativeClassDef::new(name).extends(parent));
    }
}

/// Builtin throwables below `Exception` and `Error`, parents first.
const THROWABLE_TREE: &[(&[u8], &[u8])] = &[
    (b"TypeError", b"Error"),
    (b"ArgumentCountError", b"TypeError"),
    (b"ValueError", b"Error"),
    (b"ArithmeticError", b"Error"),
    (b"DivisionByZeroError", b"ArithmeticError"),
    (b"UnhandledMatchError", b"Error"),
    (b"ReflectionException", b"Exception"),
    // SPL logic exceptions
    (b"LogicException", b"Exception"),
    (b"BadFunctionCallException", b"LogicException"),
    (b"BadMethodCallException", b"BadFunctionCallException"),
    (b"DomainException", b"LogicException"),
    (b"InvalidArgumentException", b"LogicException"),
    (b"LengthException", b"LogicException"),
    (b"OutOfRangeException", b"LogicException"),
    // SPL runtime exceptions
    (b"RuntimeException", b"Exception"),
    (b"OutOfBoundsException", b"RuntimeException"),
    (b"OverflowException", b"RuntimeException"),
    (b"RangeException", b"RuntimeException"),
    (b"UnderflowException", b"RuntimeException"),
    (b"UnexpectedValueException", b"RuntimeException"),
];

/// `Exception` and `Error` share their layout and methods.
fn throwable_base(name: &[u8]) -> NativeClassDef {
    NativeClassDef::new(name)
        .implements(b"Throwable")
        .property(b"message", Val::from(""), Visibility::Protected)
        .property(b"code", Val::Int(0), Visibility::Protected)
        .property(b"file", Val::from(""), Visibility::Protected)
        .property(b"line", Val::Int(0), Visibility::Protected)
        .property(b"previous", Val::Null, Visibility::Private)
        .method(b"__construct", exception::exception_construct)
        .method(b"getMessage", exception::exception_get_message)
        .method(b"getCode", exception::exception_get_code)
        .method(b"getPrevious", exception::exception_get_previous)
        .method(b"getFile", exception::exception_get_file)
        .method(b"getLine", exception::exception_get_line)
        .method(b"getTrace", exception::exception_get_trace)
        .method(b"getTraceAsString", exception::exception_get_trace_as_string)
        .method(b"__toString", exception::exception_to_string)
}

fn register_string_functions(registry: &mut ExtensionRegistry) {
    registry.register_function(b"strlen", string::php_strlen);
    registry.register_function(b"substr", string::php_substr);
    registry.register_function(b"strpos", string::php_strpos);
    registry.register_function(b"stripos", string::php_stripos);
    registry.register_function(b"strrpos", string::php_strrpos);
    registry.register_function(b"str_contains", string::php_str_contains);
    registry.register_function(b"str_starts_with", string::php_str_starts_with);
    registry.register_function(b"str_ends_with", string::php_str_ends_with);
    registry.register_function_with_by_ref(b"str_replace", string::php_str_replace, vec![3]);
    registry.register_function_with_by_ref(b"str_ireplace", string::php_str_ireplace, vec![3]);
    registry.register_function(b"strtolower", string::php_strtolower);
    registry.register_function(b"strtoupper", string::php_strtoupper);
    registry.register_function(b"ucfirst", string::php_ucfirst);
    registry.register_function(b"lcfirst", string::php_lcfirst);
    registry.register_function(b"ucwords", string::php_ucwords);
    registry.register_function(b"trim", string::php_trim);
    registry.register_function(b"ltrim", string::php_ltrim);
    registry.register_function(b"rtrim", string::php_rtrim);
    registry.register_function(b"chop", string::php_rtrim);
    registry.register_function(b"implode", string::php_implode);
    registry.register_function(b"join", string::php_implode);
    registry.register_function(b"explode", string::php_explode);
    registry.register_function(b"str_repeat", string::php_str_repeat);
    registry.register_function(b"str_pad", string::php_str_pad);
    registry.register_function(b"strrev", string::php_strrev);
    registry.register_function(b"strcmp", string::php_strcmp);
    registry.register_function(b"strcasecmp", string::php_strcasecmp);
    registry.register_function(b"str_split", string::php_str_split);
    registry.register_function(b"nl2br", string::php_nl2br);
    registry.register_function(b"ord", string::php_ord);
    registry.register_function(b"chr", string::php_chr);
    registry.register_function(b"bin2hex", string::php_bin2hex);
    registry.register_function(b"hex2bin", string::php_hex2bin);
    registry.register_function(b"number_format", string::php_number_format);
    registry.register_function(b"sprintf", string::php_sprintf);
    registry.register_function(b"vsprintf", string::php_vsprintf);
    registry.register_function(b"printf", string::php_printf);
    registry.register_function(b"str_word_count", string::php_str_word_count);
    registry.register_function(b"substr_count", string::php_substr_count);
}

fn register_array_functions(registry: &mut ExtensionRegistry) {
    registry.register_function(b"count", array::php_count);
    registry.register_function(b"sizeof", array::php_count);
    registry.register_function(b"array_keys", array::php_array_keys);
    registry.register_function(b"array_values", array::php_array_values);
    registry.register_function(b"array_merge", array::php_array_merge);
    registry.register_function(b"array_pad", array::php_array_pad);
    registry.register_function_with_by_ref(b"array_push", array::php_array_push, vec![0]);
    registry.register_function_with_by_ref(b"array_pop", array::php_array_pop, vec![0]);
    registry.register_function_with_by_ref(b"array_shift", array::php_array_shift, vec![0]);
    registry.register_function_with_by_ref(b"array_unshift", array::php_array_unshift, vec![0]);
    registry.register_function(b"array_slice", array::php_array_slice);
    registry.register_function(b"array_reverse", array::php_array_reverse);
    registry.register_function(b"in_array", array::php_in_array);
    registry.register_function(b"array_search", array::php_array_search);
    registry.register_function(b"array_key_exists", array::php_array_key_exists);
    registry.register_function(b"key_exists", array::php_array_key_exists);
    registry.register_function(b"array_key_first", array::php_array_key_first);
    registry.register_function(b"array_key_last", array::php_array_key_last);
    registry.register_function(b"array_map", array::php_array_map);
    registry.register_function(b"array_filter", array::php_array_filter);
    registry.register_function(b"array_reduce", array::php_array_reduce);
    registry.register_function(b"array_sum", array::php_array_sum);
    registry.register_function(b"array_product", array::php_array_product);
    registry.register_function(b"array_flip", array::php_array_flip);
    registry.register_function(b"array_unique", array::php_array_unique);
    registry.register_function(b"array_combine", array::php_array_combine);
    registry.register_function(b"array_fill", array::php_array_fill);
    registry.register_function(b"array_fill_keys", array::php_array_fill_keys);
    registry.register_function(b"array_is_list", array::php_array_is_list);
    registry.register_function(b"array_column", array::php_array_column);
    registry.register_function(b"range", array::php_range);
    registry.register_function_with_by_ref(b"sort", array::php_sort, vec![0]);
    registry.register_function_with_by_ref(b"rsort", array::php_rsort, vec![0]);
    registry.register_function_with_by_ref(b"asort", array::php_asort, vec![0]);
    registry.register_function_with_by_ref(b"arsort", array::php_arsort, vec![0]);
    registry.register_function_with_by_ref(b"ksort", array::php_ksort, vec![0]);
    registry.register_function_with_by_ref(b"krsort", array::php_krsort, vec![0]);
    registry.register_function_with_by_ref(b"usort", array::php_usort, vec![0]);
    registry.register_function_with_by_ref(b"uasort", array::php_uasort, vec![0]);
    registry.register_function_with_by_ref(b"uksort", array::php_uksort, vec![0]);
    registry.register_function(b"iterator_to_array", spl::php_iterator_to_array);
}

fn register_math_functions(registry: &mut ExtensionRegistry) {
    registry.register_function(b"abs", math::php_abs);
    registry.register_function(b"floor", math::php_floor);
    registry.register_function(b"ceil", math::php_ceil);
    registry.register_function(b"round", math::php_round);
    registry.register_function(b"sqrt", math::php_sqrt);
    registry.register_function(b"pow", math::php_pow);
    registry.register_function(b"fmod", math::php_fmod);
    registry.register_function(b"intdiv", math::php_intdiv);
    registry.register_function(b"min", math::php_min);
    registry.register_function(b"max", math::php_max);
    registry.register_function(b"pi", math::php_pi);
    registry.register_function(b"is_nan", math::php_is_nan);
    registry.register_function(b"is_finite", math::php_is_finite);
    registry.register_function(b"is_infinite", math::php_is_infinite);
    registry.register_function(b"mt_srand", math::php_mt_srand);
    registry.register_function(b"srand", math::php_mt_srand);
    registry.register_function(b"mt_rand", math::php_mt_rand);
    registry.register_function(b"rand", math::php_rand);
    registry.register_function(b"mt_getrandmax", math::php_mt_getrandmax);
    registry.register_function(b"getrandmax", math::php_mt_getrandmax);
    registry.register_function(b"random_int", math::php_random_int);
    registry.register_function(b"decbin", math::php_decbin);
    registry.register_function(b"bindec", math::php_bindec);
    registry.register_function(b"dechex", math::php_dechex);
    registry.register_function(b"hexdec", math::php_hexdec);
    registry.register_function(b"decoct", math::php_decoct);
    registry.register_function(b"octdec", math::php_octdec);
}

fn register_variable_functions(registry: &mut ExtensionRegistry) {
    registry.register_function(b"var_dump", variable::php_var_dump);
    registry.register_function(b"print_r", variable::php_print_r);
    registry.register_function(b"var_export", variable::php_var_export);
    registry.register_function(b"serialize", serialize::php_serialize);
    registry.register_function(b"unserialize", serialize::php_unserialize);
    registry.register_function(b"gettype", variable::php_gettype);
    registry.register_function(b"get_debug_type", variable::php_get_debug_type);
    registry.register_function(b"is_null", variable::php_is_null);
    registry.register_function(b"is_bool", variable::php_is_bool);
    registry.register_function(b"is_int", variable::php_is_int);
    registry.register_function(b"is_integer", variable::php_is_int);
    registry.register_function(b"is_long", variable::php_is_int);
    registry.register_function(b"is_float", variable::php_is_float);
    registry.register_function(b"is_double", variable::php_is_float);
    registry.register_function(b"is_string", variable::php_is_string);
    registry.register_function(b"is_array", variable::php_is_array);
    registry.register_function(b"is_object", variable::php_is_object);
    registry.register_function(b"is_scalar", variable::php_is_scalar);
    registry.register_function(b"is_numeric", variable::php_is_numeric);
    registry.register_function(b"is_iterable", variable::php_is_iterable);
    registry.register_function(b"is_countable", variable::php_is_countable);
    registry.register_function(b"is_resource", variable::php_is_resource);
    registry.register_function(b"intval", variable::php_intval);
    registry.register_function(b"floatval", variable::php_floatval);
    registry.register_function(b"doubleval", variable::php_floatval);
    registry.register_function(b"boolval", variable::php_boolval);
    registry.register_function(b"strval", variable::php_strval);
    registry.register_function_with_by_ref(b"settype", variable::php_settype, vec![0]);
    registry.register_function(b"define", variable::php_define);
    registry.register_function(b"defined", variable::php_defined);
    registry.register_function(b"constant", variable::php_constant);
}

fn register_function_and_class_functions(registry: &mut ExtensionRegistry) {
    registry.register_function(b"call_user_func", function::php_call_user_func);
    registry.register_function(b"call_user_func_array", function::php_call_user_func_array);
    registry.register_function(b"func_get_args", function::php_func_get_args);
    registry.register_function(b"func_num_args", function::php_func_num_args);
    registry.register_function(b"func_get_arg", function::php_func_get_arg);
    registry.register_function(b"function_exists", function::php_function_exists);
    registry.register_function_with_by_ref(b"is_callable", function::php_is_callable, vec![2]);

    registry.register_function(b"get_class", class::php_get_class);
    registry.register_function(b"get_parent_class", class::php_get_parent_class);
    registry.register_function(b"get_object_vars", class::php_get_object_vars);
    registry.register_function(b"get_class_methods", class::php_get_class_methods);
    registry.register_function(b"method_exists", class::php_method_exists);
    registry.register_function(b"property_exists", class::php_property_exists);
    registry.register_function(b"class_exists", class::php_class_exists);
    registry.register_function(b"interface_exists", class::php_interface_exists);
    registry.register_function(b"is_a", class::php_is_a);
    registry.register_function(b"is_subclass_of", class::php_is_subclass_of);
    registry.register_function(b"spl_object_id", spl::php_spl_object_id);
    registry.register_function(b"spl_object_hash", spl::php_spl_object_hash);
}

fn register_runtime_functions(registry: &mut ExtensionRegistry) {
    registry.register_function(b"gc_collect_cycles", info::php_gc_collect_cycles);
    registry.register_function(b"gc_enable", info::php_gc_enable);
    registry.register_function(b"gc_disable", info::php_gc_disable);
    registry.register_function(b"gc_enabled", info::php_gc_enabled);
    registry.register_function(b"set_time_limit", info::php_set_time_limit);
    registry.register_function(b"ini_get", info::php_ini_get);
    registry.register_function(b"ini_set", info::php_ini_set);
    registry.register_function(b"error_reporting", info::php_error_reporting);
    registry.register_function(b"trigger_error", info::php_trigger_error);
    registry.register_function(b"user_error", info::php_trigger_error);
    registry.register_function(b"error_log", info::php_error_log);
}

fn register_constants(registry: &mut ExtensionRegistry) {
    registry.register_constant(b"PHP_VERSION", Val::from(PHP_VERSION));
    registry.register_constant(b"PHP_MAJOR_VERSION", Val::Int(8));
    registry.register_constant(b"PHP_MINOR_VERSION", Val::Int(3));
    registry.register_constant(b"PHP_RELEASE_VERSION", Val::Int(0));
    registry.register_constant(b"PHP_VERSION_ID", Val::Int(80300));
    registry.register_constant(b"PHP_EOL", Val::from("\n"));
    registry.register_constant(b"PHP_OS", Val::from(php_os()));
    registry.register_constant(b"PHP_OS_FAMILY", Val::from(php_os_family()));
    registry.register_constant(b"PHP_INT_MAX", Val::Int(i64::MAX));
    registry.register_constant(b"PHP_INT_MIN", Val::Int(i64::MIN));
    registry.register_constant(b"PHP_INT_SIZE", Val::Int(8));
    registry.register_constant(b"PHP_FLOAT_EPSILON", Val::Float(f64::EPSILON));
    registry.register_constant(b"PHP_FLOAT_MAX", Val::Float(f64::MAX));
    registry.register_constant(b"PHP_FLOAT_MIN", Val::Float(f64::MIN_POSITIVE));
    registry.register_constant(b"PHP_FLOAT_DIG", Val::Int(15));
    registry.register_constant(b"NAN", Val::Float(f64::NAN));
    registry.register_constant(b"INF", Val::Float(f64::INFINITY));

    for &(name, value) in ERROR_LEVELS {
        registry.register_constant(name, Val::Int(value));
    }

    registry.register_constant(b"M_PI", Val::Float(std::f64::consts::PI));
    registry.register_constant(b"M_E", Val::Float(std::f64::consts::E));
    registry.register_constant(b"M_SQRT2", Val::Float(std::f64::consts::SQRT_2));
    registry.register_constant(b"MT_RAND_MT19937", Val::Int(0));

    registry.register_constant(b"SORT_REGULAR", Val::Int(array::SORT_REGULAR));
    registry.register_constant(b"SORT_NUMERIC", Val::Int(array::SORT_NUMERIC));
    registry.register_constant(b"SORT_STRING", Val::Int(array::SORT_STRING));
    registry.register_constant(b"SORT_FLAG_CASE", Val::Int(array::SORT_FLAG_CASE));
    registry.register_constant(b"COUNT_NORMAL", Val::Int(array::COUNT_NORMAL));
    registry.register_constant(b"COUNT_RECURSIVE", Val::Int(array::COUNT_RECURSIVE));
    registry.register_constant(b"ARRAY_FILTER_USE_BOTH", Val::Int(array::ARRAY_FILTER_USE_BOTH));
    registry.register_constant(b"ARRAY_FILTER_USE_KEY", Val::Int(array::ARRAY_FILTER_USE_KEY));
    registry.register_constant(b"STR_PAD_LEFT", Val::Int(string::STR_PAD_LEFT));
    registry.register_constant(b"STR_PAD_RIGHT", Val::Int(string::STR_PAD_RIGHT));
    registry.register_constant(b"STR_PAD_BOTH", Val::Int(string::STR_PAD_BOTH));
}

const ERROR_LEVELS: &[(&[u8], i64)] = &[
    (b"E_ERROR", 1),
    (b"E_WARNING", 2),
    (b"E_PARSE", 4),
    (b"E_NOTICE", 8),
    (b"E_CORE_ERROR", 16),
    (b"E_CORE_WARNING", 32),
    (b"E_COMPILE_ERROR", 64),
    (b"E_COMPILE_WARNING", 128),
    (b"E_USER_ERROR", 256),
    (b"E_USER_WARNING", 512),
    (b"E_USER_NOTICE", 1024),
    (b"E_STRICT", 2048),
    (b"E_RECOVERABLE_ERROR", 4096),
    (b"E_DEPRECATED", 8192),
    (b"E_USER_DEPRECATED", 16384),
    (b"E_ALL", E_ALL),
];

fn php_os() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "WINNT",
        "freebsd" => "FreeBSD",
        other => other,
    }
}

fn php_os_family() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "Windows",
        "freebsd" | "openbsd" | "netbsd" | "dragonfly" => "BSD",
        "solaris" | "illumos" => "Solaris",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::{EngineBuilder, RequestContext};

    fn context() -> RequestContext {
        let engine = EngineBuilder::new().with_core_extensions().build().unwrap();
        RequestContext::new(engine)
    }

    #[test]
    fn by_ref_positions_are_recorded() {
        let engine = EngineBuilder::new().with_core_extensions().build().unwrap();
        let registry = &engine.registry;
        assert_eq!(registry.get_function(b"sort").unwrap().by_ref, vec![0]);
        assert_eq!(registry.get_function(b"str_replace").unwrap().by_ref, vec![3]);
        assert!(registry.get_function(b"strlen").unwrap().by_ref.is_empty());
    }

    #[test]
    fn exception_hierarchy_is_linked() {
        let ctx = context();
        let lc = |name: &[u8]| ctx.interner.find_lower(name).unwrap();
        let by_zero = ctx.lookup_class(b"DivisionByZeroError").unwrap();
        assert!(by_zero.is_subclass_of(lc(b"ArithmeticError")));
        assert!(by_zero.is_subclass_of(lc(b"Throwable")));
        assert!(by_zero.is_subclass_of(lc(b"Stringable")));
        let bad_method = ctx.lookup_class(b"BadMethodCallException").unwrap();
        assert!(bad_method.is_subclass_of(lc(b"LogicException")));
        assert!(!bad_method.is_subclass_of(lc(b"Error")));
    }

    #[test]
    fn generator_is_a_final_iterator() {
        let ctx = context();
        let generator = ctx.lookup_class(b"Generator").unwrap();
        assert!(generator.is_final);
        assert!(generator.is_subclass_of(ctx.interner.find_lower(b"Traversable").unwrap()));
        assert!(generator
            .find_method(ctx.interner.find_lower(b"getreturn").unwrap())
            .is_some());
    }

    #[test]
    fn constants_are_defined() {
        let ctx = context();
        let value = |name: &[u8]| {
            let sym = ctx.interner.find(name).unwrap();
            ctx.constants.get(&sym).cloned().unwrap()
        };
        assert_eq!(value(b"PHP_INT_MAX"), Val::Int(i64::MAX));
        assert_eq!(value(b"E_ALL"), Val::Int(32767));
        assert_eq!(value(b"SORT_STRING"), Val::Int(2));
        assert_eq!(value(b"PHP_EOL"), Val::from("\n"));
    }
}

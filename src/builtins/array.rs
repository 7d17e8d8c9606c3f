use super::string::memory_exhausted;
use super::{array_arg, check_arity, int_arg, opt_bool_arg, opt_int_arg, write_ref};
use crate::core::value::{ArrayData, ArrayKey, Number, PhpStr, Val};
use crate::vm::engine::{VM, VmError};
use crate::vm::opcodes::arithmetic;
use crate::vm::opcodes::comparison::identical;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::rc::Rc;

pub const COUNT_NORMAL: i64 = 0;
pub const COUNT_RECURSIVE: i64 = 1;

pub const SORT_REGULAR: i64 = 0;
pub const SORT_NUMERIC: i64 = 1;
pub const SORT_STRING: i64 = 2;
pub const SORT_FLAG_CASE: i64 = 8;

pub const ARRAY_FILTER_USE_BOTH: i64 = 1;
pub const ARRAY_FILTER_USE_KEY: i64 = 2;

/// Largest array a single call may build.
const MAX_ARRAY_ELEMENTS: usize = 1 << 22;

/// Hash table size limit behind "maximum allowed array size".
const HT_MAX_SIZE: i64 = 0x4000_0000;

fn guard_size(vm: &mut VM, elements: usize) -> Result<(), VmError> {
    if elements > MAX_ARRAY_ELEMENTS {
        return Err(memory_exhausted(vm, elements.saturating_mul(32)));
    }
    Ok(())
}

/// Copy of the array behind a by-reference argument.
fn ref_array(vm: &mut VM, func: &str, args: &[Val]) -> Result<ArrayData, VmError> {
    let arr = array_arg(vm, func, args, 0, "array")?;
    Ok(Rc::unwrap_or_clone(arr))
}

fn count_recursive(arr: &ArrayData, depth: usize) -> i64 {
    let mut total = arr.len() as i64;
    if depth > 256 {
        return total;
    }
    for value in arr.values() {
        if let Val::Array(inner) = value.deref_val() {
            total += count_recursive(&inner, depth + 1);
        }
    }
    total
}

pub fn php_count(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "count", args, 1, 2)?;
    let mode = opt_int_arg(vm, "count", args, 1, "mode", COUNT_NORMAL)?;
    if mode != COUNT_NORMAL && mode != COUNT_RECURSIVE {
        return Err(vm.value_error(
            "count(): Argument #2 ($mode) must be either COUNT_NORMAL or COUNT_RECURSIVE",
        ));
    }
    match args[0].deref_val() {
        Val::Array(arr) if mode == COUNT_RECURSIVE => Ok(Val::Int(count_recursive(&arr, 0))),
        Val::Array(arr) => Ok(Val::Int(arr.len() as i64)),
        Val::Object(obj) => {
            let countable = vm.context.interner.find_lower(b"countable");
            if countable.is_some_and(|c| vm.instance_of(&obj, c)) {
                let method = vm.context.interner.intern_lower(b"count");
                let result = vm.call_method_named(&obj, method, Vec::new())?;
                return Ok(Val::Int(result.to_int()));
            }
            let given = vm.debug_type(&Val::Object(obj));
            Err(vm.type_error(&format!(
                "count(): Argument #1 ($value) must be of type Countable|array, {} given",
                given
            )))
        }
        other => {
            let given = vm.debug_type(&other);
            Err(vm.type_error(&format!(
                "count(): Argument #1 ($value) must be of type Countable|array, {} given",
                given
            )))
        }
    }
}

pub fn php_array_keys(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_keys", args, 1, 3)?;
    let arr = array_arg(vm, "array_keys", args, 0, "array")?;
    let filter = args.get(1).map(Val::deref_val);
    let strict = opt_bool_arg(vm, "array_keys", args, 2, "strict", false)?;
    let mut out = ArrayData::with_capacity(arr.len());
    for (key, value) in arr.iter() {
        if let Some(needle) = &filter {
            let value = value.deref_val();
            let hit = if strict {
                identical(&value, needle)
            } else {
                vm.loose_equals_values(&value, needle)?
            };
            if !hit {
                continue;
            }
        }
        out.push(key.to_val());
    }
    Ok(Val::from(out))
}

pub fn php_array_values(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_values", args, 1, 1)?;
    let arr = array_arg(vm, "array_values", args, 0, "array")?;
    if arr.is_list() {
        return Ok(Val::Array(arr));
    }
    Ok(Val::from(ArrayData::from_list(arr.values().cloned())))
}

pub fn php_array_merge(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let mut out = ArrayData::new();
    for idx in 0..args.len() {
        let arr = match args[idx].deref_val() {
            Val::Array(arr) => arr,
            other => {
                let given = vm.debug_type(&other);
                return Err(vm.type_error(&format!(
                    "array_merge(): Argument #{} must be of type array, {} given",
                    idx + 1,
                    given
                )));
            }
        };
        guard_size(vm, out.len() + arr.len())?;
        for (key, value) in arr.iter() {
            match key {
                ArrayKey::Int(_) => {
                    out.push(value.clone());
                }
                ArrayKey::Str(_) => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Ok(Val::from(out))
}

pub fn php_array_pad(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_pad", args, 3, 3)?;
    let arr = array_arg(vm, "array_pad", args, 0, "array")?;
    let length = int_arg(vm, "array_pad", args, 1, "length")?;
    let value = args[2].deref_val();
    let wanted = length.unsigned_abs();
    if wanted <= arr.len() as u64 {
        return Ok(Val::Array(arr));
    }
    if wanted > HT_MAX_SIZE as u64 {
        return Err(vm.value_error(
            "array_pad(): Argument #2 ($length) must not exceed the maximum allowed array size",
        ));
    }
    let wanted = wanted as usize;
    guard_size(vm, wanted)?;
    let padding = wanted - arr.len();
    let mut out = ArrayData::with_capacity(wanted);
    let copy_existing = |out: &mut ArrayData| {
        for (key, item) in arr.iter() {
            match key {
                ArrayKey::Int(_) => {
                    out.push(item.clone());
                }
                ArrayKey::Str(_) => {
                    out.insert(key.clone(), item.clone());
                }
            }
        }
    };
    if length > 0 {
        copy_existing(&mut out);
        for _ in 0..padding {
            out.push(value.clone());
        }
    } else {
        for _ in 0..padding {
            out.push(value.clone());
        }
        copy_existing(&mut out);
    }
    Ok(Val::from(out))
}

pub fn php_array_push(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_push", args, 1, usize::MAX)?;
    let mut arr = ref_array(vm, "array_push", args)?;
    for value in &args[1..] {
        if !arr.push(value.deref_val()) {
            return Err(vm.error(
                "Cannot add element to the array as the next element is already occupied",
            ));
        }
    }
    let count = arr.len() as i64;
    write_ref(args.first(), Val::from(arr));
    Ok(Val::Int(count))
}

pub fn php_array_pop(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_pop", args, 1, 1)?;
    let mut arr = ref_array(vm, "array_pop", args)?;
    let Some((key, value)) = arr.map.pop() else {
        return Ok(Val::Null);
    };
    if let ArrayKey::Int(i) = key {
        if i.checked_add(1) == Some(arr.next_free) {
            arr.next_free = i;
        }
    }
    write_ref(args.first(), Val::from(arr));
    Ok(value.deref_val())
}

pub fn php_array_shift(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_shift", args, 1, 1)?;
    let arr = ref_array(vm, "array_shift", args)?;
    let Some((_, first)) = arr.map.first() else {
        return Ok(Val::Null);
    };
    let first = first.deref_val();
    let mut rest = ArrayData::with_capacity(arr.len());
    for (key, value) in arr.iter().skip(1) {
        match key {
            ArrayKey::Int(_) => {
                rest.push(value.clone());
            }
            ArrayKey::Str(_) => {
                rest.insert(key.clone(), value.clone());
            }
        }
    }
    write_ref(args.first(), Val::from(rest));
    Ok(first)
}

pub fn php_array_unshift(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_unshift", args, 1, usize::MAX)?;
    let arr = ref_array(vm, "array_unshift", args)?;
    let mut out = ArrayData::with_capacity(arr.len() + args.len() - 1);
    for value in &args[1..] {
        out.push(value.deref_val());
    }
    for (key, value) in arr.iter() {
        match key {
            ArrayKey::Int(_) => {
                out.push(value.clone());
            }
            ArrayKey::Str(_) => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    let count = out.len() as i64;
    write_ref(args.first(), Val::from(out));
    Ok(Val::Int(count))
}

pub fn php_array_slice(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_slice", args, 2, 4)?;
    let arr = array_arg(vm, "array_slice", args, 0, "array")?;
    let offset = int_arg(vm, "array_slice", args, 1, "offset")?;
    let length = super::nullable_int_arg(vm, "array_slice", args, 2, "length")?;
    let preserve = opt_bool_arg(vm, "array_slice", args, 3, "preserve_keys", false)?;
    let len = arr.len() as i64;
    let start = if offset < 0 { (len + offset).max(0) } else { offset.min(len) };
    let end = match length {
        None => len,
        Some(l) if l < 0 => (len + l).max(start),
        Some(l) => start.saturating_add(l).min(len),
    };
    let mut out = ArrayData::new();
    for (key, value) in arr
        .iter()
        .skip(start as usize)
        .take((end - start).max(0) as usize)
    {
        match key {
            ArrayKey::Int(_) if !preserve => {
                out.push(value.clone());
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(Val::from(out))
}

pub fn php_array_reverse(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_reverse", args, 1, 2)?;
    let arr = array_arg(vm, "array_reverse", args, 0, "array")?;
    let preserve = opt_bool_arg(vm, "array_reverse", args, 1, "preserve_keys", false)?;
    let mut out = ArrayData::with_capacity(arr.len());
    for (key, value) in arr.iter().rev() {
        match key {
            ArrayKey::Int(_) if !preserve => {
                out.push(value.clone());
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(Val::from(out))
}

/// Key of the first element equal to `needle`.
fn search(
    vm: &mut VM,
    haystack: &ArrayData,
    needle: &Val,
    strict: bool,
) -> Result<Option<ArrayKey>, VmError> {
    for (key, value) in haystack.iter() {
        let value = value.deref_val();
        let hit = if strict {
            identical(&value, needle)
        } else {
            vm.loose_equals_values(&value, needle)?
        };
        if hit {
            return Ok(Some(key.clone()));
        }
    }
    Ok(None)
}

pub fn php_in_array(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "in_array", args, 2, 3)?;
    let needle = args[0].deref_val();
    let haystack = array_arg(vm, "in_array", args, 1, "haystack")?;
    let strict = opt_bool_arg(vm, "in_array", args, 2, "strict", false)?;
    Ok(Val::Bool(search(vm, &haystack, &needle, strict)?.is_some()))
}

pub fn php_array_search(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_search", args, 2, 3)?;
    let needle = args[0].deref_val();
    let haystack = array_arg(vm, "array_search", args, 1, "haystack")?;
    let strict = opt_bool_arg(vm, "array_search", args, 2, "strict", false)?;
    match search(vm, &haystack, &needle, strict)? {
        Some(key) => Ok(key.to_val()),
        None => Ok(Val::Bool(false)),
    }
}

pub fn php_array_key_exists(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_key_exists", args, 2, 2)?;
    let arr = array_arg(vm, "array_key_exists", args, 1, "array")?;
    let key = match args[0].deref_val() {
        Val::Null => ArrayKey::Str(PhpStr::empty()),
        Val::Array(_) | Val::Object(_) => {
            let given = args[0].deref_val();
            let ty = vm.debug_type(&given);
            return Err(vm.type_error(&format!("Illegal offset type: {}", ty)));
        }
        other => vm.to_array_key(&other)?,
    };
    Ok(Val::Bool(arr.contains_key(&key)))
}

pub fn php_array_key_first(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_key_first", args, 1, 1)?;
    let arr = array_arg(vm, "array_key_first", args, 0, "array")?;
    Ok(arr.keys().next().map(ArrayKey::to_val).unwrap_or_default())
}

pub fn php_array_key_last(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_key_last", args, 1, 1)?;
    let arr = array_arg(vm, "array_key_last", args, 0, "array")?;
    Ok(arr.keys().next_back().map(ArrayKey::to_val).unwrap_or_default())
}

pub fn php_array_map(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_map", args, 2, usize::MAX)?;
    let callback = args[0].deref_val();
    let callable = match &callback {
        Val::Null => None,
        other => match vm.resolve_callable(other) {
            Ok(callable) => Some(callable),
            Err(VmError::Exception(_)) => {
                let given = vm.debug_type(other);
                let message = if matches!(other, Val::String(_) | Val::Array(_)) {
                    "array_map(): Argument #1 ($callback) must be a valid callback or null, function not found or invalid function name".to_string()
                } else {
                    format!(
                        "array_map(): Argument #1 ($callback) must be a valid callback or null, {} given",
                        given
                    )
                };
                return Err(vm.type_error(&message));
            }
            Err(other) => return Err(other),
        },
    };
    let mut arrays = Vec::with_capacity(args.len() - 1);
    for idx in 1..args.len() {
        let param = if idx == 1 { "array" } else { "arrays" };
        arrays.push(array_arg(vm, "array_map", args, idx, param)?);
    }

    if arrays.len() == 1 {
        let arr = &arrays[0];
        let Some(callable) = callable else {
            return Ok(Val::Array(arr.clone()));
        };
        let mut out = ArrayData::with_capacity(arr.len());
        for (key, value) in arr.iter() {
            let mapped = vm.call_callable(&callable, vec![value.deref_val()])?;
            out.insert(key.clone(), mapped);
        }
        return Ok(Val::from(out));
    }

    let longest = arrays.iter().map(|a| a.len()).max().unwrap_or(0);
    let columns: Vec<Vec<Val>> = arrays
        .iter()
        .map(|a| a.values().map(Val::deref_val).collect())
        .collect();
    let mut out = ArrayData::with_capacity(longest);
    for row in 0..longest {
        let items: Vec<Val> = columns
            .iter()
            .map(|col| col.get(row).cloned().unwrap_or_default())
            .collect();
        let value = match &callable {
            Some(callable) => vm.call_callable(callable, items)?,
            None => Val::from(ArrayData::from_list(items)),
        };
        out.push(value);
    }
    Ok(Val::from(out))
}

pub fn php_array_filter(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_filter", args, 1, 3)?;
    let arr = array_arg(vm, "array_filter", args, 0, "array")?;
    let callback = args.get(1).map(Val::deref_val).unwrap_or_default();
    let mode = opt_int_arg(vm, "array_filter", args, 2, "mode", 0)?;
    let callable = match &callback {
        Val::Null => None,
        other => Some(vm.resolve_callable(other)?),
    };
    let mut out = ArrayData::new();
    for (key, value) in arr.iter() {
        let keep = match &callable {
            None => value.to_bool(),
            Some(callable) => {
                let call_args = match mode {
                    ARRAY_FILTER_USE_KEY => vec![key.to_val()],
                    ARRAY_FILTER_USE_BOTH => vec![value.deref_val(), key.to_val()],
                    _ => vec![value.deref_val()],
                };
                vm.call_callable(callable, call_args)?.to_bool()
            }
        };
        if keep {
            out.insert(key.clone(), value.clone());
        }
    }
    Ok(Val::from(out))
}

pub fn php_array_reduce(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_reduce", args, 2, 3)?;
    let arr = array_arg(vm, "array_reduce", args, 0, "array")?;
    let callable = vm.resolve_callable(&args[1])?;
    let mut carry = args.get(2).map(Val::deref_val).unwrap_or_default();
    for value in arr.values() {
        carry = vm.call_callable(&callable, vec![carry, value.deref_val()])?;
    }
    Ok(carry)
}

pub fn php_array_sum(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_sum", args, 1, 1)?;
    let arr = array_arg(vm, "array_sum", args, 0, "array")?;
    let mut total = Val::Int(0);
    for value in arr.values() {
        let value = value.deref_val();
        if matches!(value, Val::Array(_) | Val::Object(_)) {
            let ty = vm.debug_type(&value);
            vm.warn(&format!("array_sum(): Addition is not supported on type {}", ty));
            continue;
        }
        let mut warnings = Vec::new();
        total = match arithmetic::add(&total, &value, &mut warnings) {
            Ok(sum) => sum,
            Err(err) => return Err(vm.operand_error(err, "+", &total, Some(&value))),
        };
        vm.flush_warnings(&warnings)?;
    }
    Ok(total)
}

pub fn php_array_product(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_product", args, 1, 1)?;
    let arr = array_arg(vm, "array_product", args, 0, "array")?;
    let mut total = Val::Int(1);
    for value in arr.values() {
        let value = value.deref_val();
        if matches!(value, Val::Array(_) | Val::Object(_)) {
            let ty = vm.debug_type(&value);
            vm.warn(&format!(
                "array_product(): Multiplication is not supported on type {}",
                ty
            ));
            continue;
        }
        let mut warnings = Vec::new();
        total = match arithmetic::mul(&total, &value, &mut warnings) {
            Ok(product) => product,
            Err(err) => return Err(vm.operand_error(err, "*", &total, Some(&value))),
        };
        vm.flush_warnings(&warnings)?;
    }
    Ok(total)
}

pub fn php_array_flip(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_flip", args, 1, 1)?;
    let arr = array_arg(vm, "array_flip", args, 0, "array")?;
    let mut out = ArrayData::with_capacity(arr.len());
    for (key, value) in arr.iter() {
        let flipped = match value.deref_val() {
            Val::Int(i) => ArrayKey::Int(i),
            Val::String(s) => ArrayKey::from_str_val(&s),
            _ => {
                vm.warn("array_flip(): Can only flip string and integer values, entry skipped");
                continue;
            }
        };
        out.insert(flipped, key.to_val());
    }
    Ok(Val::from(out))
}

pub fn php_array_unique(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_unique", args, 1, 2)?;
    let arr = array_arg(vm, "array_unique", args, 0, "array")?;
    let flags = opt_int_arg(vm, "array_unique", args, 1, "flags", SORT_STRING)?;
    let mut out = ArrayData::new();
    if flags == SORT_STRING {
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        for (key, value) in arr.iter() {
            let text = vm.to_php_string(&value.deref_val())?;
            if seen.insert(text) {
                out.insert(key.clone(), value.clone());
            }
        }
        return Ok(Val::from(out));
    }
    let mut kept: Vec<Val> = Vec::new();
    for (key, value) in arr.iter() {
        let value_d = value.deref_val();
        let mut duplicate = false;
        for existing in &kept {
            let same = match flags {
                SORT_NUMERIC => value_d.to_float() == existing.to_float(),
                _ => vm.compare_values(&value_d, existing)? == 0,
            };
            if same {
                duplicate = true;
                break;
            }
        }
        if !duplicate {
            kept.push(value_d);
            out.insert(key.clone(), value.clone());
        }
    }
    Ok(Val::from(out))
}

pub fn php_array_combine(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_combine", args, 2, 2)?;
    let keys = array_arg(vm, "array_combine", args, 0, "keys")?;
    let values = array_arg(vm, "array_combine", args, 1, "values")?;
    if keys.len() != values.len() {
        return Err(vm.value_error(
            "array_combine(): Argument #1 ($keys) and argument #2 ($values) must have the same number of elements",
        ));
    }
    let mut out = ArrayData::with_capacity(keys.len());
    for (key, value) in keys.values().zip(values.values()) {
        let key = match key.deref_val() {
            Val::Int(i) => ArrayKey::Int(i),
            other => {
                let text = vm.to_php_string(&other)?;
                ArrayKey::from_bytes(&text)
            }
        };
        out.insert(key, value.clone());
    }
    Ok(Val::from(out))
}

pub fn php_array_fill(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_fill", args, 3, 3)?;
    let start = int_arg(vm, "array_fill", args, 0, "start_index")?;
    let count = int_arg(vm, "array_fill", args, 1, "count")?;
    let value = args[2].deref_val();
    if count < 0 {
        return Err(vm.value_error(
            "array_fill(): Argument #2 ($count) must be greater than or equal to 0",
        ));
    }
    if count > HT_MAX_SIZE {
        return Err(vm.value_error("array_fill(): Argument #2 ($count) is too large"));
    }
    guard_size(vm, count as usize)?;
    let mut out = ArrayData::with_capacity(count as usize);
    for i in 0..count {
        out.insert(ArrayKey::Int(start.wrapping_add(i)), value.clone());
    }
    Ok(Val::from(out))
}

pub fn php_array_fill_keys(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_fill_keys", args, 2, 2)?;
    let keys = array_arg(vm, "array_fill_keys", args, 0, "keys")?;
    let value = args[1].deref_val();
    let mut out = ArrayData::with_capacity(keys.len());
    for key in keys.values() {
        let key = match key.deref_val() {
            Val::Int(i) => ArrayKey::Int(i),
            other => {
                let text = vm.to_php_string(&other)?;
                ArrayKey::from_bytes(&text)
            }
        };
        out.insert(key, value.clone());
    }
    Ok(Val::from(out))
}

fn range_error(vm: &mut VM, what: &str) -> VmError {
    vm.value_error(&format!("range(): Argument #3 ($step) {}", what))
}

pub fn php_range(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "range", args, 2, 3)?;
    let start = args[0].deref_val();
    let end = args[1].deref_val();
    let step = match args.get(2).map(Val::deref_val) {
        None => Number::Int(1),
        Some(v) => super::number_arg(vm, "range", &[v], 0, "step")?,
    };

    let single_char = |v: &Val| match v {
        Val::String(s) if s.len() == 1 && !s.as_bytes()[0].is_ascii_digit() => Some(s.as_bytes()[0]),
        _ => None,
    };
    if let (Some(a), Some(b)) = (single_char(&start), single_char(&end)) {
        let step = step.to_float().abs() as i64;
        if step == 0 {
            return Err(range_error(vm, "cannot be 0"));
        }
        let (lo, hi) = (a as i64, b as i64);
        let mut out = ArrayData::new();
        let mut c = lo;
        if lo <= hi {
            while c <= hi {
                out.push(Val::from(vec![c as u8]));
                c += step;
            }
        } else {
            while c >= hi {
                out.push(Val::from(vec![c as u8]));
                c -= step;
            }
        }
        return Ok(Val::from(out));
    }

    let to_number = |v: &Val| match v {
        Val::String(s) if s.is_empty() => Number::Int(0),
        other => other.to_number().map(|(n, _)| n).unwrap_or(Number::Int(0)),
    };
    let a = to_number(&start);
    let b = to_number(&end);
    let floats = matches!(a, Number::Float(_))
        || matches!(b, Number::Float(_))
        || matches!(step, Number::Float(f) if f.fract() != 0.0);

    if floats {
        let (a, b) = (a.to_float(), b.to_float());
        let step = step.to_float().abs();
        if step == 0.0 || !step.is_finite() {
            return Err(range_error(vm, "cannot be 0"));
        }
        if !a.is_finite() || !b.is_finite() {
            return Err(vm.value_error("range(): Argument #1 ($start) must be a finite number, INF provided"));
        }
        if (b - a).abs() < step && a != b {
            return Err(range_error(vm, "must not exceed the specified range"));
        }
        let count = ((b - a).abs() / step).floor() as usize + 1;
        guard_size(vm, count)?;
        let sign = if a <= b { 1.0 } else { -1.0 };
        let out = ArrayData::from_list((0..count).map(|i| Val::Float(a + sign * i as f64 * step)));
        return Ok(Val::from(out));
    }

    let (Number::Int(a), Number::Int(b)) = (a, b) else {
        return Ok(Val::empty_array());
    };
    let step = match step {
        Number::Int(s) => s.unsigned_abs(),
        Number::Float(f) => f.abs() as u64,
    };
    if step == 0 {
        return Err(range_error(vm, "cannot be 0"));
    }
    let span = a.abs_diff(b);
    if span != 0 && span < step {
        return Err(range_error(vm, "must not exceed the specified range"));
    }
    let count = (span / step) as usize + 1;
    guard_size(vm, count)?;
    let out = ArrayData::from_list((0..count as u64).map(|i| {
        let offset = (i * step) as i64;
        Val::Int(if a <= b { a + offset } else { a - offset })
    }));
    Ok(Val::from(out))
}

/// Stable merge sort over positions with a comparator that may fail.
/// Inconsistent comparators give some order instead of panicking.
fn sorted_order(
    vm: &mut VM,
    len: usize,
    cmp: &mut dyn FnMut(&mut VM, usize, usize) -> Result<Ordering, VmError>,
) -> Result<Vec<usize>, VmError> {
    let mut order: Vec<usize> = (0..len).collect();
    let mut buf = vec![0usize; len];
    let mut width = 1;
    while width < len {
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                if cmp(vm, order[j], order[i])? == Ordering::Less {
                    buf[k] = order[j];
                    j += 1;
                } else {
                    buf[k] = order[i];
                    i += 1;
                }
                k += 1;
            }
            buf[k..k + (mid - i)].copy_from_slice(&order[i..mid]);
            k += mid - i;
            buf[k..k + (end - j)].copy_from_slice(&order[j..end]);
            start = end;
        }
        std::mem::swap(&mut order, &mut buf);
        width *= 2;
    }
    Ok(order)
}

fn compare_with_flags(vm: &mut VM, a: &Val, b: &Val, flags: i64) -> Result<Ordering, VmError> {
    match flags & !SORT_FLAG_CASE {
        SORT_NUMERIC => Ok(a
            .to_float()
            .partial_cmp(&b.to_float())
            .unwrap_or(Ordering::Equal)),
        SORT_STRING => {
            let mut x = vm.to_php_string(a)?;
            let mut y = vm.to_php_string(b)?;
            if flags & SORT_FLAG_CASE != 0 {
                x.make_ascii_lowercase();
                y.make_ascii_lowercase();
            }
            Ok(x.cmp(&y))
        }
        _ => Ok(vm.compare_values(a, b)?.cmp(&0)),
    }
}

enum SortBy {
    Values(i64),
    Keys(i64),
    UserValues(crate::vm::callable::Callable),
    UserKeys(crate::vm::callable::Callable),
}

fn sort_array(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    by: SortBy,
    descending: bool,
    keep_keys: bool,
) -> Result<Val, VmError> {
    let mut arr = ref_array(vm, func, args)?;
    let entries: Vec<(ArrayKey, Val)> = std::mem::take(&mut arr.map).into_iter().collect();
    let values: Vec<Val> = entries.iter().map(|(_, v)| v.deref_val()).collect();
    let keys: Vec<Val> = entries.iter().map(|(k, _)| k.to_val()).collect();
    let mut cmp = |vm: &mut VM, i: usize, j: usize| -> Result<Ordering, VmError> {
        let ordering = match &by {
            SortBy::Values(flags) => compare_with_flags(vm, &values[i], &values[j], *flags)?,
            SortBy::Keys(flags) => compare_with_flags(vm, &keys[i], &keys[j], *flags)?,
            SortBy::UserValues(callable) => vm
                .call_callable(callable, vec![values[i].clone(), values[j].clone()])?
                .to_int()
                .cmp(&0),
            SortBy::UserKeys(callable) => vm
                .call_callable(callable, vec![keys[i].clone(), keys[j].clone()])?
                .to_int()
                .cmp(&0),
        };
        Ok(if descending { ordering.reverse() } else { ordering })
    };
    let order = sorted_order(vm, entries.len(), &mut cmp)?;

    let mut slots: Vec<Option<(ArrayKey, Val)>> = entries.into_iter().map(Some).collect();
    let mut out = ArrayData::with_capacity(slots.len());
    for idx in order {
        if let Some((key, value)) = slots[idx].take() {
            if keep_keys {
                out.insert(key, value);
            } else {
                out.push(value);
            }
        }
    }
    write_ref(args.first(), Val::from(out));
    Ok(Val::Bool(true))
}

fn sort_flags(vm: &mut VM, func: &str, args: &[Val]) -> Result<i64, VmError> {
    check_arity(vm, func, args, 1, 2)?;
    opt_int_arg(vm, func, args, 1, "flags", SORT_REGULAR)
}

fn sort_callback(
    vm: &mut VM,
    func: &str,
    args: &[Val],
) -> Result<crate::vm::callable::Callable, VmError> {
    check_arity(vm, func, args, 2, 2)?;
    match vm.resolve_callable(&args[1]) {
        Ok(callable) => Ok(callable),
        Err(VmError::Exception(_)) => Err(vm.type_error(&format!(
            "{}(): Argument #2 ($callback) must be a valid callback, function not found or invalid function name",
            func
        ))),
        Err(other) => Err(other),
    }
}

pub fn php_sort(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let flags = sort_flags(vm, "sort", args)?;
    sort_array(vm, "sort", args, SortBy::Values(flags), false, false)
}

pub fn php_rsort(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let flags = sort_flags(vm, "rsort", args)?;
    sort_array(vm, "rsort", args, SortBy::Values(flags), true, false)
}

pub fn php_asort(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let flags = sort_flags(vm, "asort", args)?;
    sort_array(vm, "asort", args, SortBy::Values(flags), false, true)
}

pub fn php_arsort(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let flags = sort_flags(vm, "arsort", args)?;
    sort_array(vm, "arsort", args, SortBy::Values(flags), true, true)
}

pub fn php_ksort(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let flags = sort_flags(vm, "ksort", args)?;
    sort_array(vm, "ksort", args, SortBy::Keys(flags), false, true)
}

pub fn php_krsort(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let flags = sort_flags(vm, "krsort", args)?;
    sort_array(vm, "krsort", args, SortBy::Keys(flags), true, true)
}

pub fn php_usort(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let callable = sort_callback(vm, "usort", args)?;
    sort_array(vm, "usort", args, SortBy::UserValues(callable), false, false)
}

pub fn php_uasort(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let callable = sort_callback(vm, "uasort", args)?;
    sort_array(vm, "uasort", args, SortBy::UserValues(callable), false, true)
}

pub fn php_uksort(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let callable = sort_callback(vm, "uksort", args)?;
    sort_array(vm, "uksort", args, SortBy::UserKeys(callable), false, true)
}

pub fn php_array_is_list(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_is_list", args, 1, 1)?;
    let arr = array_arg(vm, "array_is_list", args, 0, "array")?;
    Ok(Val::Bool(arr.is_list()))
}

pub fn php_array_column(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "array_column", args, 2, 3)?;
    let rows = array_arg(vm, "array_column", args, 0, "array")?;
    let column = args[1].deref_val();
    let index = args.get(2).map(Val::deref_val).unwrap_or_default();
    let mut out = ArrayData::new();
    for row in rows.values() {
        let Val::Array(row) = row.deref_val() else {
            continue;
        };
        let value = match &column {
            Val::Null => Some(Val::Array(row.clone())),
            key => {
                let key = vm.to_array_key(key)?;
                row.get(&key).map(Val::deref_val)
            }
        };
        let Some(value) = value else {
            continue;
        };
        let target = match &index {
            Val::Null => None,
            key => {
                let key = vm.to_array_key(key)?;
                match row.get(&key).map(Val::deref_val) {
                    Some(k @ (Val::Int(_) | Val::String(_))) => Some(vm.to_array_key(&k)?),
                    _ => None,
                }
            }
        };
        match target {
            Some(key) => {
                out.insert(key, value);
            }
            None => {
                out.push(value);
            }
        }
    }
    Ok(Val::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::executor::{execute_code, run_code_capture_output};

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn merge_order_is_stable() {
        let engine = crate::runtime::context::EngineBuilder::new()
            .with_core_extensions()
            .build()
            .unwrap();
        let mut vm = VM::new(engine);
        let data = [3, 1, 3, 2, 1];
        let order = sorted_order(&mut vm, data.len(), &mut |_, i, j| Ok(data[i].cmp(&data[j])))
            .unwrap();
        assert_eq!(order, vec![1, 4, 3, 0, 2]);
    }

    #[test]
    fn first_and_last_keys() {
        assert_eq!(
            run("<?php $a = [5 => 'a', 'x' => 'b', 7 => 'c'];
                 var_dump(array_key_first($a), array_key_last($a), array_key_last([]));
                 var_dump(array_key_exists(null, ['' => 1]), array_key_exists(null, [0 => 1]));"),
            "int(5)\nint(7)\nNULL\nbool(true)\nbool(false)\n"
        );
    }

    #[test]
    fn pad_sizes_are_coerced() {
        assert_eq!(
            run("<?php echo count(array_pad([1, 2], 10.0, 0)), ' ', count(array_pad([1, 2], true, 0)), ' ', implode(',', array_pad([1, 2], -4, 0));"),
            "10 2 0,0,1,2"
        );
    }

    #[test]
    fn pad_fractional_size_truncates_with_deprecation() {
        let result = execute_code("<?php echo count(array_pad([1, 2], 10.5, 0));").unwrap();
        assert_eq!(result.stdout, "10");
        assert!(result.stderr.contains("Implicit conversion from float 10.5 to int loses precision"));
    }

    #[test]
    fn pad_rejects_arrays_and_huge_sizes() {
        let out = run(
            "<?php
             try { array_pad([1], [], 0); } catch (TypeError $e) { echo $e->getMessage(), \"\\n\"; }
             try { array_pad([1], 12.3456789000e10, 0); } catch (ValueError $e) { echo $e->getMessage(); }",
        );
        assert_eq!(
            out,
            "array_pad(): Argument #2 ($length) must be of type int, array given\n\
             array_pad(): Argument #2 ($length) must not exceed the maximum allowed array size"
        );
    }

    #[test]
    fn stack_and_queue_operations() {
        let out = run(
            "<?php $a = [1, 2];
             echo array_push($a, 3, 4), array_pop($a), array_shift($a), array_unshift($a, 0), ' ', implode(',', $a);
             $a[] = 9; echo ' ', implode(',', array_keys($a));",
        );
        assert_eq!(out, "4413 0,2,3 0,1,2,3");
    }

    #[test]
    fn sorting_family() {
        let out = run(
            "<?php $a = ['b' => 2, 'a' => 3, 'c' => 1];
             asort($a); echo implode(',', array_keys($a)), ' ';
             ksort($a); echo implode(',', array_keys($a)), ' ';
             $l = [3, '10', 1]; sort($l); echo implode(',', $l), ' ';
             rsort($l, SORT_STRING); echo implode(',', $l), ' ';
             usort($l, fn($x, $y) => $y <=> $x); echo implode(',', $l);",
        );
        assert_eq!(out, "c,b,a a,b,c 1,3,10 3,10,1 10,3,1");
    }

    #[test]
    fn map_filter_reduce() {
        let out = run(
            "<?php $a = ['x' => 1, 'y' => 2, 'z' => 3];
             echo json_like(array_map(fn($v) => $v * 2, $a)), ' ';
             echo implode(',', array_keys(array_filter($a, fn($k) => $k != 'y', ARRAY_FILTER_USE_KEY))), ' ';
             echo array_reduce($a, fn($c, $v) => $c + $v, 10), ' ';
             echo implode('|', array_map(null, [1, 2], ['a'])[1] ?? []);
             function json_like($a) { $o = []; foreach ($a as $k => $v) $o[] = \"$k=$v\"; return implode(',', $o); }",
        );
        assert_eq!(out, "x=2,y=4,z=6 x,z 16 2|");
    }

    #[test]
    fn range_variants() {
        assert_eq!(
            run("<?php echo implode(',', range(1, 4)), ' ', implode(',', range(5, 1, 2)), ' ', implode(',', range('a', 'e', 2)), ' ', implode(',', range(0, 1, 0.25));"),
            "1,2,3,4 5,3,1 a,c,e 0,0.25,0.5,0.75,1"
        );
        let out = run("<?php try { range(1, 2, 0); } catch (ValueError $e) { echo $e->getMessage(); }");
        assert_eq!(out, "range(): Argument #3 ($step) cannot be 0");
    }

    #[test]
    fn search_and_membership() {
        assert_eq!(
            run("<?php var_dump(in_array('1', [1, 2]), in_array('1', [1, 2], true), array_search(2, ['a' => 1, 'b' => 2]), array_key_exists(null, ['' => 1]));"),
            "bool(true)\nbool(false)\nstring(1) \"b\"\nbool(true)\n"
        );
    }

    #[test]
    fn unique_flip_combine_fill() {
        assert_eq!(
            run("<?php echo implode(',', array_unique([1, '1', 2, 2.0, 'a'])), ' ',
                 implode(',', array_keys(array_flip(['a', 'b']))), ' ',
                 implode(',', array_keys(array_combine(['x', 'y'], [1, 2]))), ' ',
                 implode(',', array_keys(array_fill(5, 3, 0))), ' ', array_sum([1, 2.5, '3']);"),
            "1,2,a a,b x,y 5,6,7 6.5"
        );
    }

    #[test]
    fn count_recursive_and_errors() {
        assert_eq!(run("<?php echo count([1, [2, 3]], COUNT_RECURSIVE);"), "4");
        let out = run("<?php try { count('x'); } catch (TypeError $e) { echo $e->getMessage(); }");
        assert_eq!(out, "count(): Argument #1 ($value) must be of type Countable|array, string given");
    }

    #[test]
    fn slice_and_reverse_keys() {
        assert_eq!(
            run("<?php echo implode(',', array_keys(array_slice([5 => 'a', 'k' => 'b', 7 => 'c'], 1))), ' ', implode(',', array_keys(array_reverse(['x' => 1, 2], true)));"),
            "k,0 0,x"
        );
    }
}

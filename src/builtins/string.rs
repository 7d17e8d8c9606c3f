use super::{
    check_arity, float_arg, int_arg, opt_int_arg, opt_string_arg, string_arg, write_ref,
};
use crate::core::value::{ArrayData, PhpStr, Val, format_float};
use crate::vm::engine::{VM, VmError};
use memchr::memmem;
use std::rc::Rc;

/// Largest string a single builtin will build.
pub(crate) const MAX_STRING_LEN: usize = 128 * 1024 * 1024;

pub(crate) fn memory_exhausted(vm: &mut VM, wanted: usize) -> VmError {
    vm.fatal(&format!(
        "Allowed memory size of {} bytes exhausted (tried to allocate {} bytes)",
        MAX_STRING_LEN, wanted
    ))
}

pub fn php_strlen(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "strlen", args, 1, 1)?;
    let s = string_arg(vm, "strlen", args, 0, "string")?;
    Ok(Val::Int(s.len() as i64))
}

/// Resolve PHP's `(offset, length)` pair against a string of `len` bytes.
fn substr_range(len: usize, offset: i64, length: Option<i64>) -> (usize, usize) {
    let len_i = len as i64;
    let start = if offset < 0 {
        (len_i + offset).max(0)
    } else {
        offset.min(len_i)
    };
    let end = match length {
        None => len_i,
        Some(l) if l < 0 => (len_i + l).max(start),
        Some(l) => start.saturating_add(l).min(len_i),
    };
    (start as usize, end.max(start) as usize)
}

pub fn php_substr(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "substr", args, 2, 3)?;
    let s = string_arg(vm, "substr", args, 0, "string")?;
    let offset = int_arg(vm, "substr", args, 1, "offset")?;
    let length = super::nullable_int_arg(vm, "substr", args, 2, "length")?;
    let (start, end) = substr_range(s.len(), offset, length);
    Ok(Val::from(s.as_bytes()[start..end].to_vec()))
}

/// Start of the search window for `strpos`-style offsets.
fn search_offset(vm: &mut VM, func: &str, len: usize, offset: i64) -> Result<usize, VmError> {
    let len_i = len as i64;
    let start = if offset < 0 { len_i + offset } else { offset };
    if start < 0 || start > len_i {
        return Err(vm.value_error(&format!(
            "{}(): Argument #3 ($offset) must be contained in argument #1 ($haystack)",
            func
        )));
    }
    Ok(start as usize)
}

fn find_from(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    fold: bool,
) -> Result<Val, VmError> {
    check_arity(vm, func, args, 2, 3)?;
    let haystack = string_arg(vm, func, args, 0, "haystack")?;
    let needle = string_arg(vm, func, args, 1, "needle")?;
    let offset = opt_int_arg(vm, func, args, 2, "offset", 0)?;
    let start = search_offset(vm, func, haystack.len(), offset)?;
    let (hay, needle) = if fold {
        (
            haystack.as_bytes().to_ascii_lowercase(),
            needle.as_bytes().to_ascii_lowercase(),
        )
    } else {
        (haystack.as_bytes().to_vec(), needle.as_bytes().to_vec())
    };
    match memmem::find(&hay[start..], &needle) {
        Some(pos) => Ok(Val::Int((start + pos) as i64)),
        None => Ok(Val::Bool(false)),
    }
}

pub fn php_strpos(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    find_from(vm, "strpos", args, false)
}

pub fn php_stripos(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    find_from(vm, "stripos", args, true)
}

pub fn php_strrpos(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "strrpos", args, 2, 3)?;
    let haystack = string_arg(vm, "strrpos", args, 0, "haystack")?;
    let needle = string_arg(vm, "strrpos", args, 1, "needle")?;
    let offset = opt_int_arg(vm, "strrpos", args, 2, "offset", 0)?;
    let hay = haystack.as_bytes();
    search_offset(vm, "strrpos", hay.len(), offset)?;
    // A negative offset bounds where the match may start.
    let (lo, hi) = if offset >= 0 {
        (offset as usize, hay.len())
    } else {
        let limit = (hay.len() as i64 + offset) as usize + needle.len();
        (0, limit.min(hay.len()))
    };
    match memmem::rfind(&hay[lo..hi], needle.as_bytes()) {
        Some(pos) => Ok(Val::Int((lo + pos) as i64)),
        None => Ok(Val::Bool(false)),
    }
}

pub fn php_str_contains(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "str_contains", args, 2, 2)?;
    let haystack = string_arg(vm, "str_contains", args, 0, "haystack")?;
    let needle = string_arg(vm, "str_contains", args, 1, "needle")?;
    Ok(Val::Bool(
        memmem::find(haystack.as_bytes(), needle.as_bytes()).is_some(),
    ))
}

pub fn php_str_starts_with(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "str_starts_with", args, 2, 2)?;
    let haystack = string_arg(vm, "str_starts_with", args, 0, "haystack")?;
    let needle = string_arg(vm, "str_starts_with", args, 1, "needle")?;
    Ok(Val::Bool(haystack.as_bytes().starts_with(needle.as_bytes())))
}

pub fn php_str_ends_with(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "str_ends_with", args, 2, 2)?;
    let haystack = string_arg(vm, "str_ends_with", args, 0, "haystack")?;
    let needle = string_arg(vm, "str_ends_with", args, 1, "needle")?;
    Ok(Val::Bool(haystack.as_bytes().ends_with(needle.as_bytes())))
}

fn replace_bytes(
    subject: &[u8],
    search: &[u8],
    replace: &[u8],
    fold: bool,
    count: &mut i64,
) -> Vec<u8> {
    if search.is_empty() {
        return subject.to_vec();
    }
    let folded;
    let (hay, needle) = if fold {
        folded = (subject.to_ascii_lowercase(), search.to_ascii_lowercase());
        (folded.0.as_slice(), folded.1.as_slice())
    } else {
        (subject, search)
    };
    let mut out = Vec::with_capacity(subject.len());
    let mut last = 0;
    for pos in memmem::find_iter(hay, needle) {
        if pos < last {
            continue;
        }
        out.extend_from_slice(&subject[last..pos]);
        out.extend_from_slice(replace);
        last = pos + needle.len();
        *count += 1;
    }
    out.extend_from_slice(&subject[last..]);
    out
}

fn replace_in_subject(
    vm: &mut VM,
    subject: &Val,
    search: &Val,
    replace: &Val,
    fold: bool,
    count: &mut i64,
) -> Result<Vec<u8>, VmError> {
    let mut text = vm.to_php_string(subject)?;
    match search {
        Val::Array(searches) => {
            let replacements: Option<Vec<Val>> = match replace {
                Val::Array(r) => Some(r.values().map(Val::deref_val).collect()),
                _ => None,
            };
            let single = match replace {
                Val::Array(_) => Vec::new(),
                other => vm.to_php_string(other)?,
            };
            for (i, needle) in searches.values().enumerate() {
                let needle = vm.to_php_string(&needle.deref_val())?;
                let with = match &replacements {
                    Some(list) => match list.get(i) {
                        Some(v) => vm.to_php_string(v)?,
                        None => Vec::new(),
                    },
                    None => single.clone(),
                };
                text = replace_bytes(&text, &needle, &with, fold, count);
            }
        }
        other => {
            let needle = vm.to_php_string(other)?;
            let with = vm.to_php_string(replace)?;
            text = replace_bytes(&text, &needle, &with, fold, count);
        }
    }
    Ok(text)
}

fn str_replace_impl(vm: &mut VM, func: &str, args: &[Val], fold: bool) -> Result<Val, VmError> {
    check_arity(vm, func, args, 3, 4)?;
    let search = args[0].deref_val();
    let replace = args[1].deref_val();
    let subject = args[2].deref_val();
    if let (Val::String(_), Val::Array(_)) = (&search, &replace) {
        return Err(vm.type_error(&format!(
            "{}(): Argument #2 ($replace) must be of type string when argument #1 ($search) is a string",
            func
        )));
    }
    let mut count = 0;
    let result = match &subject {
        Val::Array(items) => {
            let mut out = ArrayData::with_capacity(items.len());
            for (key, value) in items.iter() {
                let value = value.deref_val();
                let replaced = match value {
                    Val::Array(_) | Val::Object(_) => value,
                    scalar => Val::from(replace_in_subject(
                        vm, &scalar, &search, &replace, fold, &mut count,
                    )?),
                };
                out.insert(key.clone(), replaced);
            }
            Val::Array(Rc::new(out))
        }
        scalar => Val::from(replace_in_subject(
            vm, scalar, &search, &replace, fold, &mut count,
        )?),
    };
    write_ref(args.get(3), Val::Int(count));
    Ok(result)
}

pub fn php_str_replace(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    str_replace_impl(vm, "str_replace", args, false)
}

pub fn php_str_ireplace(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    str_replace_impl(vm, "str_ireplace", args, true)
}

pub fn php_strtolower(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "strtolower", args, 1, 1)?;
    let s = string_arg(vm, "strtolower", args, 0, "string")?;
    Ok(Val::from(s.as_bytes().to_ascii_lowercase()))
}

pub fn php_strtoupper(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "strtoupper", args, 1, 1)?;
    let s = string_arg(vm, "strtoupper", args, 0, "string")?;
    Ok(Val::from(s.as_bytes().to_ascii_uppercase()))
}

pub fn php_ucfirst(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "ucfirst", args, 1, 1)?;
    let mut bytes = string_arg(vm, "ucfirst", args, 0, "string")?.as_bytes().to_vec();
    if let Some(first) = bytes.first_mut() {
        first.make_ascii_uppercase();
    }
    Ok(Val::from(bytes))
}

pub fn php_lcfirst(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "lcfirst", args, 1, 1)?;
    let mut bytes = string_arg(vm, "lcfirst", args, 0, "string")?.as_bytes().to_vec();
    if let Some(first) = bytes.first_mut() {
        first.make_ascii_lowercase();
    }
    Ok(Val::from(bytes))
}

pub fn php_ucwords(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "ucwords", args, 1, 2)?;
    let mut bytes = string_arg(vm, "ucwords", args, 0, "string")?.as_bytes().to_vec();
    let delimiters = opt_string_arg(vm, "ucwords", args, 1, "separators", b" \t\r\n\x0c\x0b")?;
    let mut at_word_start = true;
    for b in bytes.iter_mut() {
        if at_word_start {
            b.make_ascii_uppercase();
        }
        at_word_start = delimiters.as_bytes().contains(b);
    }
    Ok(Val::from(bytes))
}

const DEFAULT_TRIM: &[u8] = b" \n\r\t\x0b\0";

/// Expand a `trim` character list, including `a..z` ranges.
fn trim_mask(list: &[u8]) -> [bool; 256] {
    let mut mask = [false; 256];
    let mut i = 0;
    while i < list.len() {
        if list.get(i + 1..i + 3) == Some(&b".."[..]) {
            if let Some(&hi) = list.get(i + 3) {
                let lo = list[i];
                if lo <= hi {
                    for b in lo..=hi {
                        mask[b as usize] = true;
                    }
                    i += 4;
                    continue;
                }
            }
        }
        mask[list[i] as usize] = true;
        i += 1;
    }
    mask
}

fn trim_impl(vm: &mut VM, func: &str, args: &[Val], left: bool, right: bool) -> Result<Val, VmError> {
    check_arity(vm, func, args, 1, 2)?;
    let s = string_arg(vm, func, args, 0, "string")?;
    let chars = opt_string_arg(vm, func, args, 1, "characters", DEFAULT_TRIM)?;
    let mask = trim_mask(chars.as_bytes());
    let bytes = s.as_bytes();
    let mut start = 0;
    let mut end = bytes.len();
    if left {
        while start < end && mask[bytes[start] as usize] {
            start += 1;
        }
    }
    if right {
        while end > start && mask[bytes[end - 1] as usize] {
            end -= 1;
        }
    }
    Ok(Val::from(bytes[start..end].to_vec()))
}

pub fn php_trim(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    trim_impl(vm, "trim", args, true, true)
}

pub fn php_ltrim(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    trim_impl(vm, "ltrim", args, true, false)
}

pub fn php_rtrim(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    trim_impl(vm, "rtrim", args, false, true)
}

pub fn php_implode(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "implode", args, 1, 2)?;
    let first = args[0].deref_val();
    let (separator, pieces) = match (first, args.get(1).map(Val::deref_val)) {
        (Val::Array(pieces), None) => (PhpStr::empty(), pieces),
        (Val::Array(_), Some(_)) => {
            let given = args[0].deref_val();
            return Err(super::arg_type_error(
                vm,
                "implode",
                0,
                "separator",
                &crate::compiler::chunk::TypeHint::String,
                &given,
            ));
        }
        (_, Some(Val::Array(pieces))) => (string_arg(vm, "implode", args, 0, "separator")?, pieces),
        (_, None) => {
            let given = args[0].deref_val();
            let ty = vm.debug_type(&given);
            return Err(vm.type_error(&format!(
                "implode(): Argument #1 ($pieces) must be of type array, {} given",
                ty
            )));
        }
        (_, Some(other)) => {
            let ty = vm.debug_type(&other);
            return Err(vm.type_error(&format!(
                "implode(): Argument #2 ($array) must be of type ?array, {} given",
                ty
            )));
        }
    };
    let mut out = Vec::new();
    for (i, value) in pieces.values().enumerate() {
        if i > 0 {
            out.extend_from_slice(separator.as_bytes());
        }
        let piece = vm.to_php_string(&value.deref_val())?;
        out.extend_from_slice(&piece);
    }
    Ok(Val::from(out))
}

pub fn php_explode(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "explode", args, 2, 3)?;
    let separator = string_arg(vm, "explode", args, 0, "separator")?;
    let s = string_arg(vm, "explode", args, 1, "string")?;
    let limit = opt_int_arg(vm, "explode", args, 2, "limit", i64::MAX)?;
    if separator.is_empty() {
        return Err(vm.value_error("explode(): Argument #1 ($separator) cannot be empty"));
    }
    let bytes = s.as_bytes();
    let sep = separator.as_bytes();
    let mut parts: Vec<&[u8]> = Vec::new();
    let mut last = 0;
    for pos in memmem::find_iter(bytes, sep) {
        if pos < last {
            continue;
        }
        if limit > 0 && parts.len() as i64 == limit - 1 {
            break;
        }
        parts.push(&bytes[last..pos]);
        last = pos + sep.len();
    }
    parts.push(&bytes[last..]);
    if limit < 0 {
        let keep = parts.len() as i64 + limit;
        parts.truncate(keep.max(0) as usize);
    }
    if limit == 0 && parts.len() > 1 {
        return Ok(Val::from(ArrayData::from_list([Val::from(bytes.to_vec())])));
    }
    Ok(Val::from(ArrayData::from_list(
        parts.into_iter().map(|p| Val::from(p.to_vec())),
    )))
}

pub fn php_str_repeat(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "str_repeat", args, 2, 2)?;
    let s = string_arg(vm, "str_repeat", args, 0, "string")?;
    let times = int_arg(vm, "str_repeat", args, 1, "times")?;
    if times < 0 {
        return Err(vm.value_error(
            "str_repeat(): Argument #2 ($times) must be greater than or equal to 0",
        ));
    }
    let total = s.len().saturating_mul(times as usize);
    if total > MAX_STRING_LEN {
        return Err(memory_exhausted(vm, total));
    }
    Ok(Val::from(s.as_bytes().repeat(times as usize)))
}

pub const STR_PAD_LEFT: i64 = 0;
pub const STR_PAD_RIGHT: i64 = 1;
pub const STR_PAD_BOTH: i64 = 2;

pub fn php_str_pad(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "str_pad", args, 2, 4)?;
    let s = string_arg(vm, "str_pad", args, 0, "string")?;
    let length = int_arg(vm, "str_pad", args, 1, "length")?;
    let pad = opt_string_arg(vm, "str_pad", args, 2, "pad_string", b" ")?;
    let pad_type = opt_int_arg(vm, "str_pad", args, 3, "pad_type", STR_PAD_RIGHT)?;
    if pad.is_empty() {
        return Err(vm.value_error("str_pad(): Argument #3 ($pad_string) must be a non-empty string"));
    }
    if !(STR_PAD_LEFT..=STR_PAD_BOTH).contains(&pad_type) {
        return Err(vm.value_error(
            "str_pad(): Argument #4 ($pad_type) must be STR_PAD_LEFT, STR_PAD_RIGHT, or STR_PAD_BOTH",
        ));
    }
    if length <= s.len() as i64 {
        return Ok(Val::String(s));
    }
    let length = length as usize;
    if length > MAX_STRING_LEN {
        return Err(memory_exhausted(vm, length));
    }
    let missing = length - s.len();
    let (left, right) = match pad_type {
        STR_PAD_LEFT => (missing, 0),
        STR_PAD_BOTH => (missing / 2, missing - missing / 2),
        _ => (0, missing),
    };
    let filler = |n: usize| pad.as_bytes().iter().cycle().take(n).copied();
    let mut out = Vec::with_capacity(length);
    out.extend(filler(left));
    out.extend_from_slice(s.as_bytes());
    out.extend(filler(right));
    Ok(Val::from(out))
}

pub fn php_strrev(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "strrev", args, 1, 1)?;
    let mut bytes = string_arg(vm, "strrev", args, 0, "string")?.as_bytes().to_vec();
    bytes.reverse();
    Ok(Val::from(bytes))
}

fn sign_of(o: std::cmp::Ordering) -> Val {
    Val::Int(match o {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    })
}

pub fn php_strcmp(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "strcmp", args, 2, 2)?;
    let a = string_arg(vm, "strcmp", args, 0, "string1")?;
    let b = string_arg(vm, "strcmp", args, 1, "string2")?;
    Ok(sign_of(a.as_bytes().cmp(b.as_bytes())))
}

pub fn php_strcasecmp(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "strcasecmp", args, 2, 2)?;
    let a = string_arg(vm, "strcasecmp", args, 0, "string1")?;
    let b = string_arg(vm, "strcasecmp", args, 1, "string2")?;
    Ok(sign_of(
        a.as_bytes()
            .to_ascii_lowercase()
            .cmp(&b.as_bytes().to_ascii_lowercase()),
    ))
}

pub fn php_str_split(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "str_split", args, 1, 2)?;
    let s = string_arg(vm, "str_split", args, 0, "string")?;
    let length = opt_int_arg(vm, "str_split", args, 1, "length", 1)?;
    if length < 1 {
        return Err(vm.value_error("str_split(): Argument #2 ($length) must be greater than 0"));
    }
    if s.is_empty() {
        return Ok(Val::from(ArrayData::from_list([Val::from("")])));
    }
    Ok(Val::from(ArrayData::from_list(
        s.as_bytes()
            .chunks(length as usize)
            .map(|c| Val::from(c.to_vec())),
    )))
}

pub fn php_nl2br(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "nl2br", args, 1, 2)?;
    let s = string_arg(vm, "nl2br", args, 0, "string")?;
    let xhtml = super::opt_bool_arg(vm, "nl2br", args, 1, "use_xhtml", true)?;
    let tag: &[u8] = if xhtml { b"<br />" } else { b"<br>" };
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\r' || b == b'\n' {
            out.extend_from_slice(tag);
            out.push(b);
            let pair = if b == b'\r' { b'\n' } else { b'\r' };
            if bytes.get(i + 1) == Some(&pair) {
                out.push(pair);
                i += 1;
            }
        } else {
            out.push(b);
        }
        i += 1;
    }
    Ok(Val::from(out))
}

pub fn php_ord(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "ord", args, 1, 1)?;
    let s = string_arg(vm, "ord", args, 0, "character")?;
    Ok(Val::Int(s.as_bytes().first().copied().unwrap_or(0) as i64))
}

pub fn php_chr(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "chr", args, 1, 1)?;
    let code = int_arg(vm, "chr", args, 0, "codepoint")?;
    Ok(Val::from(vec![code.rem_euclid(256) as u8]))
}

pub fn php_bin2hex(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "bin2hex", args, 1, 1)?;
    let s = string_arg(vm, "bin2hex", args, 0, "string")?;
    Ok(Val::from(hex::encode(s.as_bytes())))
}

pub fn php_hex2bin(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "hex2bin", args, 1, 1)?;
    let s = string_arg(vm, "hex2bin", args, 0, "string")?;
    if s.len() % 2 != 0 {
        vm.warn("hex2bin(): Hexadecimal input string must have an even length");
        return Ok(Val::Bool(false));
    }
    match hex::decode(s.as_bytes()) {
        Ok(bytes) => Ok(Val::from(bytes)),
        Err(_) => {
            vm.warn("hex2bin(): Input string must be hexadecimal string");
            Ok(Val::Bool(false))
        }
    }
}

/// Round half away from zero after pre-rounding to 15 significant digits,
/// so `1.005` rounds to `1.01` at two places.
pub(crate) fn round_half_away(value: f64, places: i64) -> f64 {
    if !value.is_finite() || value == 0.0 {
        return value;
    }
    let places = places.clamp(-308, 308) as i32;
    let factor = 10f64.powi(places.abs());
    let scaled = if places >= 0 { value * factor } else { value / factor };
    if !scaled.is_finite() {
        return value;
    }
    let pre = format!("{:.14e}", scaled)
        .parse::<f64>()
        .unwrap_or(scaled);
    let rounded = pre.round();
    let result = if places >= 0 { rounded / factor } else { rounded * factor };
    if result.is_finite() { result } else { value }
}

fn group_thousands(digits: &[u8], sep: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(digits.len() + digits.len() / 3 * sep.len());
    for (i, d) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.extend_from_slice(sep);
        }
        out.push(*d);
    }
    out
}

pub fn php_number_format(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "number_format", args, 1, 4)?;
    let num = float_arg(vm, "number_format", args, 0, "num")?;
    let decimals = opt_int_arg(vm, "number_format", args, 1, "decimals", 0)?.clamp(0, 100);
    let point = opt_string_arg(vm, "number_format", args, 2, "decimal_separator", b".")?;
    let sep = opt_string_arg(vm, "number_format", args, 3, "thousands_separator", b",")?;
    if !num.is_finite() {
        return Ok(Val::from(format_float(num, 14)));
    }
    let rounded = round_half_away(num, decimals);
    let text = format!("{:.*}", decimals as usize, rounded.abs());
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (text.clone(), None),
    };
    let mut out = Vec::new();
    let is_zero = text.bytes().all(|b| b == b'0' || b == b'.');
    if rounded < 0.0 && !is_zero {
        out.push(b'-');
    }
    out.extend(group_thousands(int_part.as_bytes(), sep.as_bytes()));
    if let Some(frac) = frac_part {
        out.extend_from_slice(point.as_bytes());
        out.extend_from_slice(frac.as_bytes());
    }
    Ok(Val::from(out))
}

struct Spec {
    left_align: bool,
    plus: bool,
    pad: u8,
    width: usize,
    precision: Option<usize>,
    conversion: u8,
}

fn pad_field(body: Vec<u8>, spec: &Spec, numeric: bool) -> Vec<u8> {
    if body.len() >= spec.width {
        return body;
    }
    let fill = spec.width - body.len();
    if spec.left_align {
        let pad = if spec.pad == b'0' { b' ' } else { spec.pad };
        let mut out = body;
        out.extend(std::iter::repeat_n(pad, fill));
        return out;
    }
    if spec.pad == b'0' && numeric && matches!(body.first(), Some(b'-') | Some(b'+')) {
        let mut out = vec![body[0]];
        out.extend(std::iter::repeat_n(b'0', fill));
        out.extend_from_slice(&body[1..]);
        return out;
    }
    let mut out: Vec<u8> = std::iter::repeat_n(spec.pad, fill).collect();
    out.extend(body);
    out
}

/// `%e` in PHP style: `1.5e+3`, no zero-padded exponent.
fn format_exponent(value: f64, precision: usize, upper: bool) -> String {
    let text = format!("{:.*e}", precision, value);
    let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{}{}{}{}", mantissa, e, sign, exponent.abs())
}

fn format_one(vm: &mut VM, spec: &Spec, arg: &Val) -> Result<Vec<u8>, VmError> {
    let with_sign = |mut body: String, negative: bool| {
        if negative {
            body.insert(0, '-');
        } else if spec.plus {
            body.insert(0, '+');
        }
        body.into_bytes()
    };
    let body = match spec.conversion {
        b's' => {
            let mut s = vm.to_php_string(arg)?;
            if let Some(p) = spec.precision {
                s.truncate(p);
            }
            return Ok(pad_field(s, spec, false));
        }
        b'd' => {
            let i = arg.to_int();
            with_sign(i.unsigned_abs().to_string(), i < 0)
        }
        b'u' => (arg.to_int() as u64).to_string().into_bytes(),
        b'c' => return Ok(vec![arg.to_int() as u8]),
        b'x' => format!("{:x}", arg.to_int()).into_bytes(),
        b'X' => format!("{:X}", arg.to_int()).into_bytes(),
        b'o' => format!("{:o}", arg.to_int()).into_bytes(),
        b'b' => format!("{:b}", arg.to_int()).into_bytes(),
        b'f' | b'F' => {
            let f = arg.to_float();
            let precision = spec.precision.unwrap_or(6).min(53);
            if !f.is_finite() {
                format_float(f, 14).into_bytes()
            } else {
                let rounded = round_half_away(f, precision as i64);
                with_sign(format!("{:.*}", precision, rounded.abs()), f < 0.0 && rounded != 0.0)
            }
        }
        b'e' | b'E' => {
            let f = arg.to_float();
            let precision = spec.precision.unwrap_or(6).min(53);
            with_sign(
                format_exponent(f.abs(), precision, spec.conversion == b'E'),
                f < 0.0,
            )
        }
        b'g' | b'G' => {
            let f = arg.to_float();
            let precision = spec.precision.unwrap_or(6).max(1) as i64;
            let text = format_float(f.abs(), precision);
            let text = if spec.conversion == b'g' {
                text.replace('E', "e")
            } else {
                text
            };
            with_sign(text, f < 0.0)
        }
        other => {
            return Err(vm.value_error(&format!(
                "Unknown format specifier \"{}\"",
                other as char
            )));
        }
    };
    Ok(pad_field(body, spec, true))
}

/// Shared engine of `sprintf`, `printf` and `vsprintf`. `args` excludes the format.
pub(crate) fn format_printf(
    vm: &mut VM,
    func: &str,
    format: &[u8],
    args: &[Val],
) -> Result<Vec<u8>, VmError> {
    let mut out = Vec::with_capacity(format.len());
    let mut next_arg = 0usize;
    let mut i = 0;
    while i < format.len() {
        let b = format[i];
        if b != b'%' {
            out.push(b);
            i += 1;
            continue;
        }
        i += 1;
        if format.get(i) == Some(&b'%') {
            out.push(b'%');
            i += 1;
            continue;
        }
        // Optional argnum$
        let mut argnum = None;
        let digits_end = format[i..]
            .iter()
            .position(|c| !c.is_ascii_digit())
            .map(|p| i + p)
            .unwrap_or(format.len());
        if digits_end > i && format.get(digits_end) == Some(&b'$') {
            let n: usize = std::str::from_utf8(&format[i..digits_end])
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if n == 0 {
                return Err(vm.value_error("Argument number specifier must be greater than zero and less than 2147483647"));
            }
            argnum = Some(n - 1);
            i = digits_end + 1;
        }
        let mut spec = Spec {
            left_align: false,
            plus: false,
            pad: b' ',
            width: 0,
            precision: None,
            conversion: 0,
        };
        loop {
            match format.get(i) {
                Some(b'-') => spec.left_align = true,
                Some(b'+') => spec.plus = true,
                Some(b'0') => spec.pad = b'0',
                Some(b' ') => spec.pad = b' ',
                Some(b'\'') => {
                    i += 1;
                    match format.get(i) {
                        Some(c) => spec.pad = *c,
                        None => return Err(vm.value_error("Missing padding character")),
                    }
                }
                _ => break,
            }
            i += 1;
        }
        while let Some(d) = format.get(i).filter(|c| c.is_ascii_digit()) {
            spec.width = spec.width.saturating_mul(10).saturating_add((d - b'0') as usize);
            i += 1;
        }
        if format.get(i) == Some(&b'.') {
            i += 1;
            let mut precision = 0usize;
            while let Some(d) = format.get(i).filter(|c| c.is_ascii_digit()) {
                precision = precision.saturating_mul(10).saturating_add((d - b'0') as usize);
                i += 1;
            }
            spec.precision = Some(precision);
        }
        if spec.width > MAX_STRING_LEN {
            return Err(vm.value_error("Width must be greater than zero and less than 2147483647"));
        }
        let Some(&conversion) = format.get(i) else {
            return Err(vm.value_error("Missing format specifier at end of string"));
        };
        i += 1;
        spec.conversion = conversion;
        let index = match argnum {
            Some(n) => n,
            None => {
                next_arg += 1;
                next_arg - 1
            }
        };
        let Some(arg) = args.get(index) else {
            let required = index + 2;
            let given = args.len() + 1;
            let message = if argnum.is_some() {
                format!("{}(): Argument number must be less than {}", func, given)
            } else {
                format!("{} arguments are required, {} given", required, given)
            };
            return Err(vm.throw_error("ArgumentCountError", &message));
        };
        let arg = arg.deref_val();
        let field = format_one(vm, &spec, &arg)?;
        out.extend(field);
    }
    Ok(out)
}

pub fn php_sprintf(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "sprintf", args, 1, usize::MAX)?;
    let format = string_arg(vm, "sprintf", args, 0, "format")?;
    let out = format_printf(vm, "sprintf", format.as_bytes(), &args[1..])?;
    Ok(Val::from(out))
}

pub fn php_vsprintf(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "vsprintf", args, 2, 2)?;
    let format = string_arg(vm, "vsprintf", args, 0, "format")?;
    let values = super::array_arg(vm, "vsprintf", args, 1, "values")?;
    let list: Vec<Val> = values.values().map(Val::deref_val).collect();
    let out = format_printf(vm, "vsprintf", format.as_bytes(), &list)?;
    Ok(Val::from(out))
}

pub fn php_printf(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "printf", args, 1, usize::MAX)?;
    let format = string_arg(vm, "printf", args, 0, "format")?;
    let out = format_printf(vm, "printf", format.as_bytes(), &args[1..])?;
    vm.print_bytes(&out)?;
    Ok(Val::Int(out.len() as i64))
}

pub fn php_str_word_count(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "str_word_count", args, 1, 1)?;
    let s = string_arg(vm, "str_word_count", args, 0, "string")?;
    let words = s
        .as_bytes()
        .split(|b| !(b.is_ascii_alphabetic() || *b == b'\'' || *b == b'-'))
        .filter(|w| !w.is_empty())
        .count();
    Ok(Val::Int(words as i64))
}

pub fn php_substr_count(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "substr_count", args, 2, 2)?;
    let haystack = string_arg(vm, "substr_count", args, 0, "haystack")?;
    let needle = string_arg(vm, "substr_count", args, 1, "needle")?;
    if needle.is_empty() {
        return Err(vm.value_error("substr_count(): Argument #2 ($needle) cannot be empty"));
    }
    let mut count = 0;
    let mut last = 0;
    for pos in memmem::find_iter(haystack.as_bytes(), needle.as_bytes()) {
        if pos >= last {
            count += 1;
            last = pos + needle.len();
        }
    }
    Ok(Val::Int(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn substr_ranges() {
        assert_eq!(substr_range(5, 1, None), (1, 5));
        assert_eq!(substr_range(5, -2, None), (3, 5));
        assert_eq!(substr_range(5, 1, Some(-1)), (1, 4));
        assert_eq!(substr_range(5, 9, Some(2)), (5, 5));
        assert_eq!(substr_range(5, -9, Some(2)), (0, 2));
    }

    #[test]
    fn trim_mask_expands_ranges() {
        let mask = trim_mask(b"a..c");
        assert!(mask[b'b' as usize]);
        assert!(!mask[b'.' as usize]);
    }

    #[test]
    fn rounding_pre_rounds() {
        assert_eq!(round_half_away(1.005, 2), 1.01);
        assert_eq!(round_half_away(-2.5, 0), -3.0);
        assert_eq!(round_half_away(1234.0, -2), 1200.0);
    }

    #[test]
    fn printf_family() {
        assert_eq!(
            run(r#"<?php echo sprintf("%05.1f|%-4s|%'*6d|%x|%b|%e", 3.14159, "ab", -42, 255, 5, 1234.5);"#),
            "003.1|ab  |***-42|ff|101|1.234500e+3"
        );
        assert_eq!(run(r#"<?php echo sprintf('%2$s %1$s', 'a', 'b');"#), "b a");
        assert_eq!(run(r#"<?php $n = printf("%s-%d", "x", "7"); echo "|", $n;"#), "x-7|3");
    }

    #[test]
    fn printf_too_few_arguments() {
        let out = run(
            r#"<?php try { sprintf("%s %s", 1); } catch (ArgumentCountError $e) { echo $e->getMessage(); }"#,
        );
        assert_eq!(out, "3 arguments are required, 2 given");
    }

    #[test]
    fn explode_limits() {
        assert_eq!(
            run("<?php echo implode('|', explode(',', 'a,b,c', 2)), ' ', implode('|', explode(',', 'a,b,c', -1));"),
            "a|b,c a|b"
        );
    }

    #[test]
    fn replace_with_arrays_and_count() {
        let out = run(
            "<?php echo str_replace(['a', 'b'], ['1'], 'aabbc', $n), ' ', $n;",
        );
        assert_eq!(out, "11c 4");
    }

    #[test]
    fn number_format_groups() {
        assert_eq!(
            run("<?php echo number_format(1234567.891, 2), ' ', number_format(-0.4), ' ', number_format(1234.5, 1, ',', '.');"),
            "1,234,567.89 0 1.234,5"
        );
    }

    #[test]
    fn pad_and_repeat_errors() {
        assert_eq!(run("<?php echo str_pad('5', 3, '0', STR_PAD_LEFT), str_pad('x', 4, 'ab', STR_PAD_BOTH);"), "005axab");
        let out = run("<?php try { str_repeat('x', -1); } catch (ValueError $e) { echo get_class($e); }");
        assert_eq!(out, "ValueError");
    }

    #[test]
    fn hex_round_trip_and_bad_input() {
        assert_eq!(run("<?php echo bin2hex('abc'), hex2bin('616263');"), "616263abc");
        let result = crate::vm::executor::execute_code("<?php var_dump(hex2bin('abc'));").unwrap();
        assert_eq!(result.stdout, "bool(false)\n");
        assert!(result.stderr.contains("even length"));
    }

    #[test]
    fn strict_mode_rejects_int_for_string() {
        let out = run(
            "<?php declare(strict_types=1); try { strlen(5); } catch (TypeError $e) { echo $e->getMessage(); }",
        );
        assert_eq!(out, "strlen(): Argument #1 ($string) must be of type string, int given");
    }
}

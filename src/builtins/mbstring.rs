//! Multibyte string functions, UTF-8 only.
//!
//! Invalid sequences count as one character per byte, the way
//! `mb_strlen` treats them under the UTF-8 encoding.

use super::{check_arity, int_arg, nullable_int_arg, opt_int_arg, string_arg};
use crate::core::value::{ArrayData, ArrayKey, Val};
use crate::vm::engine::{VM, VmError};

fn check_encoding(vm: &mut VM, func: &str, args: &[Val], idx: usize) -> Result<(), VmError> {
    if idx >= args.len() || args[idx].is_null() {
        return Ok(());
    }
    let encoding = string_arg(vm, func, args, idx, "encoding")?;
    let name = encoding.as_bytes().to_ascii_uppercase();
    if name == b"UTF-8" || name == b"UTF8" {
        return Ok(());
    }
    Err(vm.value_error(&format!(
        "{}(): Argument #{} ($encoding) must be a valid encoding, \"{}\" given",
        func,
        idx + 1,
        encoding.to_string_lossy()
    )))
}

/// Byte ranges of each character.
fn char_bounds(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let width = match bytes[i] {
            0x00..=0x7f => 1,
            0xc2..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf4 => 4,
            _ => 1,
        };
        let end = i + width;
        let valid = end <= bytes.len()
            && std::str::from_utf8(&bytes[i..end]).is_ok();
        let end = if valid { end } else { i + 1 };
        out.push((i, end));
        i = end;
    }
    out
}

pub fn php_mb_strlen(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "mb_strlen", args, 1, 2)?;
    let s = string_arg(vm, "mb_strlen", args, 0, "string")?;
    check_encoding(vm, "mb_strlen", args, 1)?;
    Ok(Val::Int(char_bounds(s.as_bytes()).len() as i64))
}

pub fn php_mb_check_encoding(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "mb_check_encoding", args, 0, 2)?;
    check_encoding(vm, "mb_check_encoding", args, 1)?;
    let value = args.first().map(Val::deref_val).unwrap_or_default();
    Ok(Val::Bool(valid_utf8_value(&value)))
}

fn valid_utf8_value(value: &Val) -> bool {
    match value {
        Val::String(s) => s.is_utf8(),
        Val::Array(arr) => arr.iter().all(|(key, item)| {
            let key_ok = match key {
                ArrayKey::Str(s) => s.is_utf8(),
                ArrayKey::Int(_) => true,
            };
            key_ok && valid_utf8_value(&item.deref_val())
        }),
        _ => true,
    }
}

pub fn php_mb_substr(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "mb_substr", args, 2, 4)?;
    let s = string_arg(vm, "mb_substr", args, 0, "string")?;
    let start = int_arg(vm, "mb_substr", args, 1, "start")?;
    let length = nullable_int_arg(vm, "mb_substr", args, 2, "length")?;
    check_encoding(vm, "mb_substr", args, 3)?;
    let bounds = char_bounds(s.as_bytes());
    let count = bounds.len() as i64;
    let from = if start < 0 { (count + start).max(0) } else { start.min(count) };
    let to = match length {
        None => count,
        Some(l) if l < 0 => (count + l).max(from),
        Some(l) => from.saturating_add(l).min(count),
    };
    if from >= to {
        return Ok(Val::from(""));
    }
    let begin = bounds[from as usize].0;
    let end = bounds[to as usize - 1].1;
    Ok(Val::from(s.as_bytes()[begin..end].to_vec()))
}

/// `MB_CASE_*` modes accepted by `mb_convert_case`.
pub const MB_CASE_UPPER: i64 = 0;
pub const MB_CASE_LOWER: i64 = 1;
pub const MB_CASE_TITLE: i64 = 2;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CaseMode {
    Upper,
    Lower,
    Title,
}

/// Undecodable bytes become `?`.
fn convert_case(bytes: &[u8], mode: CaseMode) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_word = false;
    for (start, end) in char_bounds(bytes) {
        let Ok(text) = std::str::from_utf8(&bytes[start..end]) else {
            out.push(b'?');
            in_word = false;
            continue;
        };
        let upper = match mode {
            CaseMode::Upper => true,
            CaseMode::Lower => false,
            CaseMode::Title => !in_word,
        };
        let mapped = if upper {
            text.to_uppercase()
        } else {
            text.to_lowercase()
        };
        out.extend_from_slice(mapped.as_bytes());
        in_word = text.chars().all(|c| c.is_alphanumeric() || c == '\'');
    }
    out
}

fn map_case(vm: &mut VM, func: &str, args: &[Val], mode: CaseMode) -> Result<Val, VmError> {
    check_arity(vm, func, args, 1, 2)?;
    let s = string_arg(vm, func, args, 0, "string")?;
    check_encoding(vm, func, args, 1)?;
    Ok(Val::from(convert_case(s.as_bytes(), mode)))
}

pub fn php_mb_strtoupper(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    map_case(vm, "mb_strtoupper", args, CaseMode::Upper)
}

pub fn php_mb_strtolower(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    map_case(vm, "mb_strtolower", args, CaseMode::Lower)
}

pub fn php_mb_convert_case(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "mb_convert_case", args, 2, 3)?;
    let s = string_arg(vm, "mb_convert_case", args, 0, "string")?;
    let mode = match int_arg(vm, "mb_convert_case", args, 1, "mode")? {
        MB_CASE_UPPER => CaseMode::Upper,
        MB_CASE_LOWER => CaseMode::Lower,
        MB_CASE_TITLE => CaseMode::Title,
        _ => {
            return Err(vm.value_error(
                "mb_convert_case(): Argument #2 ($mode) must be one of the MB_CASE_* constants",
            ));
        }
    };
    check_encoding(vm, "mb_convert_case", args, 2)?;
    Ok(Val::from(convert_case(s.as_bytes(), mode)))
}

pub fn php_mb_str_split(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "mb_str_split", args, 1, 3)?;
    let s = string_arg(vm, "mb_str_split", args, 0, "string")?;
    let length = opt_int_arg(vm, "mb_str_split", args, 1, "length", 1)?;
    if length < 1 {
        return Err(vm.value_error("mb_str_split(): Argument #2 ($length) must be greater than 0"));
    }
    check_encoding(vm, "mb_str_split", args, 2)?;
    let bytes = s.as_bytes();
    let pieces = char_bounds(bytes)
        .chunks(length as usize)
        .map(|chunk| {
            let begin = chunk[0].0;
            let end = chunk[chunk.len() - 1].1;
            Val::from(bytes[begin..end].to_vec())
        })
        .collect::<Vec<_>>();
    Ok(Val::from(ArrayData::from_list(pieces)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn bounds_treat_invalid_bytes_as_single_chars() {
        assert_eq!(char_bounds("añb".as_bytes()).len(), 3);
        assert_eq!(char_bounds(b"a\xffb").len(), 3);
        assert_eq!(char_bounds(b"\xe2\x82").len(), 2);
    }

    #[test]
    fn length_substring_and_case() {
        assert_eq!(
            run("<?php echo mb_strlen('héllo'), ' ', strlen('héllo'), ' ', mb_substr('héllo', 1, 3), ' ', mb_strtoupper('héllo');"),
            "5 6 éll HÉLLO"
        );
    }

    #[test]
    fn convert_case_modes() {
        assert_eq!(
            run("<?php echo mb_convert_case(\"élan vital o'neil\", MB_CASE_TITLE), '|', mb_convert_case('ÀB', MB_CASE_LOWER);
                 try { mb_convert_case('x', 9); } catch (ValueError $e) { echo '|', $e->getMessage(); }"),
            "Élan Vital O'neil|àb|mb_convert_case(): Argument #2 ($mode) must be one of the MB_CASE_* constants"
        );
    }

    #[test]
    fn str_split_counts_characters() {
        assert_eq!(
            run("<?php echo implode(',', mb_str_split('añbçd', 2)), ' ', count(mb_str_split(''));"),
            "añ,bç,d 0"
        );
    }

    #[test]
    fn check_encoding_rejects_invalid_utf8() {
        assert_eq!(
            run("<?php var_dump(mb_check_encoding('ok'), mb_check_encoding(\"\\xff\"));"),
            "bool(true)\nbool(false)\n"
        );
    }
}

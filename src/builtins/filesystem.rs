//! Stream functions over the request's [`ResourceRegistry`].
//!
//! Handles are opened through the registry's scheme table (`php://memory`,
//! `php://output`, ...) or as plain files. A handle that has been closed
//! stays known to the registry, so `fclose` can warn on a second close and
//! reads can fail with the closed-stream error instead of "unknown".
//!
//! [`ResourceRegistry`]: crate::runtime::resource_manager::ResourceRegistry

use super::{check_arity, nullable_int_arg, opt_int_arg, string_arg};
use crate::core::value::{ResourceId, Val};
use crate::runtime::resource_manager::{ReleaseStatus, ResourceError, ResourceKind};
use crate::vm::engine::{VM, VmError};
use std::fs::OpenOptions;
use std::io::{self, SeekFrom, Write};

/// `file_put_contents` flag.
pub const FILE_APPEND: i64 = 8;

/// io errors read the way PHP prints them, without the `(os error N)` tail.
fn describe_io_error(err: &io::Error) -> String {
    let text = err.to_string();
    match text.find(" (os error") {
        Some(pos) => text[..pos].to_string(),
        None => text,
    }
}

fn resource_arg(vm: &mut VM, func: &str, args: &[Val], idx: usize) -> Result<ResourceId, VmError> {
    match args.get(idx).map(Val::deref_val) {
        Some(Val::Resource(id)) => Ok(id),
        Some(other) => {
            let given = vm.debug_type(&other);
            Err(vm.type_error(&format!(
                "{}(): Argument #{} ($stream) must be of type resource, {} given",
                func,
                idx + 1,
                given
            )))
        }
        None => Err(vm.type_error(&format!(
            "{}(): Argument #{} ($stream) must be of type resource, null given",
            func,
            idx + 1
        ))),
    }
}

fn invalid_stream(vm: &mut VM, func: &str) -> VmError {
    vm.type_error(&format!(
        "{}(): supplied resource is not a valid stream resource",
        func
    ))
}

/// Run `op` against an open stream; closed or unknown ids become the
/// script-level `TypeError`.
fn with_stream<T>(
    vm: &mut VM,
    func: &str,
    id: ResourceId,
    op: impl FnOnce(&mut dyn ResourceKind) -> T,
) -> Result<T, VmError> {
    match vm.context.resources.with_handle(id, op) {
        Ok(value) => Ok(value),
        Err(ResourceError::Closed | ResourceError::Unknown) => Err(invalid_stream(vm, func)),
    }
}

pub fn php_fopen(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "fopen", args, 2, 4)?;
    let path = string_arg(vm, "fopen", args, 0, "filename")?.to_string_lossy();
    let mode = string_arg(vm, "fopen", args, 1, "mode")?.to_string_lossy();
    if path.is_empty() {
        return Err(vm.value_error("Path cannot be empty"));
    }
    match vm.context.resources.open(&path, &mode) {
        Ok(id) => Ok(Val::Resource(id)),
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => {
            Err(vm.value_error(&format!(
                "fopen(): Argument #2 ($mode) must be a valid mode, \"{}\" given",
                mode
            )))
        }
        Err(err) => {
            vm.warn(&format!(
                "fopen({}): Failed to open stream: {}",
                path,
                describe_io_error(&err)
            ));
            Ok(Val::Bool(false))
        }
    }
}

pub fn php_fclose(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "fclose", args, 1, 1)?;
    let id = resource_arg(vm, "fclose", args, 0)?;
    match vm.context.resources.release(id) {
        ReleaseStatus::Released => Ok(Val::Bool(true)),
        ReleaseStatus::NotOpen => {
            vm.warn("fclose(): supplied resource is not a valid stream resource");
            Ok(Val::Bool(false))
        }
    }
}

pub fn php_fread(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "fread", args, 2, 2)?;
    let id = resource_arg(vm, "fread", args, 0)?;
    let length = super::int_arg(vm, "fread", args, 1, "length")?;
    if length <= 0 {
        return Err(vm.value_error("fread(): Argument #2 ($length) must be greater than 0"));
    }
    match with_stream(vm, "fread", id, |stream| stream.read(length as usize))? {
        Ok(bytes) => Ok(Val::from(bytes)),
        Err(err) => {
            vm.notice(&format!("fread(): Read of {} bytes failed: {}", length, describe_io_error(&err)));
            Ok(Val::Bool(false))
        }
    }
}

/// Reads up to `length - 1` bytes, stopping after a newline.
pub fn php_fgets(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "fgets", args, 1, 2)?;
    let id = resource_arg(vm, "fgets", args, 0)?;
    let limit = match nullable_int_arg(vm, "fgets", args, 1, "length")? {
        Some(length) if length <= 0 => {
            return Err(vm.value_error("fgets(): Argument #2 ($length) must be greater than 0"));
        }
        Some(length) => Some((length - 1) as usize),
        None => None,
    };
    let line = with_stream(vm, "fgets", id, |stream| -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        while limit.is_none_or(|max| line.len() < max) {
            let byte = stream.read(1)?;
            let Some(&b) = byte.first() else { break };
            line.push(b);
            if b == b'\n' {
                break;
            }
        }
        Ok(line)
    })?;
    match line {
        Ok(line) if !line.is_empty() => Ok(Val::from(line)),
        _ => Ok(Val::Bool(false)),
    }
}

pub fn php_fwrite(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    write_stream(vm, "fwrite", args)
}

pub fn php_fputs(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    write_stream(vm, "fputs", args)
}

fn write_stream(vm: &mut VM, func: &str, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, func, args, 2, 3)?;
    let id = resource_arg(vm, func, args, 0)?;
    let data = string_arg(vm, func, args, 1, "data")?;
    let mut bytes = data.as_bytes();
    if let Some(length) = nullable_int_arg(vm, func, args, 2, "length")? {
        bytes = &bytes[..(length.max(0) as usize).min(bytes.len())];
    }
    let to_output = with_stream(vm, func, id, |stream| stream.forwards_to_output())?;
    if to_output {
        vm.print_bytes(bytes)?;
        return Ok(Val::Int(bytes.len() as i64));
    }
    match with_stream(vm, func, id, |stream| stream.write(bytes))? {
        Ok(written) => Ok(Val::Int(written as i64)),
        Err(err) => {
            vm.notice(&format!(
                "{}(): Write of {} bytes failed with errno={}",
                func,
                bytes.len(),
                describe_io_error(&err)
            ));
            Ok(Val::Bool(false))
        }
    }
}

pub fn php_feof(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "feof", args, 1, 1)?;
    let id = resource_arg(vm, "feof", args, 0)?;
    Ok(Val::Bool(with_stream(vm, "feof", id, |stream| stream.eof())?))
}

pub fn php_ftell(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "ftell", args, 1, 1)?;
    let id = resource_arg(vm, "ftell", args, 0)?;
    match with_stream(vm, "ftell", id, |stream| stream.position())? {
        Ok(pos) => Ok(Val::Int(pos as i64)),
        Err(_) => Ok(Val::Bool(false)),
    }
}

pub fn php_rewind(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "rewind", args, 1, 1)?;
    let id = resource_arg(vm, "rewind", args, 0)?;
    match with_stream(vm, "rewind", id, |stream| stream.seek(SeekFrom::Start(0)))? {
        Ok(_) => Ok(Val::Bool(true)),
        Err(err) => {
            vm.warn(&format!("rewind(): {}", describe_io_error(&err)));
            Ok(Val::Bool(false))
        }
    }
}

pub fn php_fseek(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "fseek", args, 2, 3)?;
    let id = resource_arg(vm, "fseek", args, 0)?;
    let offset = super::int_arg(vm, "fseek", args, 1, "offset")?;
    let whence = match opt_int_arg(vm, "fseek", args, 2, "whence", 0)? {
        0 if offset < 0 => return Ok(Val::Int(-1)),
        0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return Ok(Val::Int(-1)),
    };
    match with_stream(vm, "fseek", id, |stream| stream.seek(whence))? {
        Ok(_) => Ok(Val::Int(0)),
        Err(_) => Ok(Val::Int(-1)),
    }
}

/// The kind name, or "Unknown" for a closed resource.
pub fn php_get_resource_type(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "get_resource_type", args, 1, 1)?;
    let id = resource_arg(vm, "get_resource_type", args, 0)?;
    let name = vm.context.resources.type_name(id).unwrap_or("Unknown");
    Ok(Val::from(name))
}

pub fn php_get_resource_id(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "get_resource_id", args, 1, 1)?;
    let id = resource_arg(vm, "get_resource_id", args, 0)?;
    Ok(Val::Int(id.0 as i64))
}

pub fn php_file_get_contents(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "file_get_contents", args, 1, 5)?;
    let path = string_arg(vm, "file_get_contents", args, 0, "filename")?.to_string_lossy();
    match std::fs::read(&path) {
        Ok(bytes) => Ok(Val::from(bytes)),
        Err(err) => {
            vm.warn(&format!(
                "file_get_contents({}): Failed to open stream: {}",
                path,
                describe_io_error(&err)
            ));
            Ok(Val::Bool(false))
        }
    }
}

/// Strings are written as-is; arrays are joined without a separator.
pub fn php_file_put_contents(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "file_put_contents", args, 2, 4)?;
    let path = string_arg(vm, "file_put_contents", args, 0, "filename")?.to_string_lossy();
    let data = match args[1].deref_val() {
        Val::Array(items) => {
            let mut joined = Vec::new();
            for value in items.values() {
                joined.extend(vm.to_php_string(&value.deref_val())?);
            }
            joined
        }
        other => vm.to_php_string(&other)?,
    };
    let flags = opt_int_arg(vm, "file_put_contents", args, 2, "flags", 0)?;
    let append = flags & FILE_APPEND != 0;
    let written = OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(&path)
        .and_then(|mut file| file.write_all(&data));
    match written {
        Ok(()) => Ok(Val::Int(data.len() as i64)),
        Err(err) => {
            vm.warn(&format!(
                "file_put_contents({}): Failed to open stream: {}",
                path,
                describe_io_error(&err)
            ));
            Ok(Val::Bool(false))
        }
    }
}

pub fn php_file_exists(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "file_exists", args, 1, 1)?;
    let path = string_arg(vm, "file_exists", args, 0, "filename")?.to_string_lossy();
    Ok(Val::Bool(std::path::Path::new(&path).exists()))
}

pub fn php_unlink(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "unlink", args, 1, 2)?;
    let path = string_arg(vm, "unlink", args, 0, "filename")?.to_string_lossy();
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(Val::Bool(true)),
        Err(err) => {
            vm.warn(&format!("unlink({}): {}", path, describe_io_error(&err)));
            Ok(Val::Bool(false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::describe_io_error;
    use crate::vm::executor::run_code_capture_output;
    use std::io;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn os_error_suffix_is_dropped() {
        let err = io::Error::from_raw_os_error(2);
        assert!(!describe_io_error(&err).contains("os error"));
    }

    #[test]
    fn memory_stream_read_write() {
        let out = run(
            "<?php $h = fopen('php://memory', 'w+'); echo fwrite($h, \"one\\ntwo\"), ' ', ftell($h), ' ';
             rewind($h); echo fgets($h); echo fread($h, 10), ' '; var_dump(feof($h));
             echo get_resource_type($h), ' ', is_resource($h) ? 'open' : 'closed';",
        );
        assert_eq!(out, "7 7 one\ntwo bool(true)\nstream open");
    }

    #[test]
    fn double_close_and_read_after_close() {
        let out = run(
            "<?php $h = fopen('php://memory', 'r+'); var_dump(fclose($h)); var_dump(@fclose($h));
             var_dump(is_resource($h)); echo get_resource_type($h), ' ';
             try { fread($h, 1); } catch (TypeError $e) { echo $e->getMessage(); }",
        );
        assert_eq!(
            out,
            "bool(true)\nbool(false)\nbool(false)\nUnknown fread(): supplied resource is not a valid stream resource"
        );
    }

    #[test]
    fn output_stream_goes_to_script_output() {
        let out = run("<?php $h = fopen('php://output', 'w'); fputs($h, 'via stream'); echo '!';");
        assert_eq!(out, "via stream!");
    }

    #[test]
    fn plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt").to_string_lossy().replace('\\', "/");
        let out = run(&format!(
            "<?php echo file_put_contents('{0}', ['a', 'b']), ' ';
             file_put_contents('{0}', 'c', FILE_APPEND); echo file_get_contents('{0}'), ' ';
             $h = fopen('{0}', 'r'); fseek($h, 1); echo fread($h, 5), ' '; fclose($h);
             var_dump(file_exists('{0}'), unlink('{0}'), file_exists('{0}'));
             var_dump(@fopen('{0}', 'r'));",
            path
        ));
        assert_eq!(
            out,
            "2 abc bc bool(true)\nbool(true)\nbool(false)\nbool(false)\n"
        );
    }
}

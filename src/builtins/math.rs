use super::string::round_half_away;
use super::{check_arity, float_arg, int_arg, number_arg, opt_int_arg};
use crate::core::value::{Number, Val};
use crate::vm::engine::{VM, VmError};
use crate::vm::opcodes::arithmetic;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Per-request generator behind `mt_rand`/`rand`, reseeded by `mt_srand`.
struct MtState(StdRng);

fn with_mt<T>(vm: &mut VM, f: impl FnOnce(&mut StdRng) -> T) -> T {
    if vm.context.get_extension_data::<MtState>().is_none() {
        vm.context
            .set_extension_data(MtState(StdRng::from_entropy()));
    }
    match vm.context.get_extension_data_mut::<MtState>() {
        Some(state) => f(&mut state.0),
        None => f(&mut StdRng::from_entropy()),
    }
}

pub fn php_abs(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "abs", args, 1, 1)?;
    Ok(match number_arg(vm, "abs", args, 0, "num")? {
        Number::Int(i) => match i.checked_abs() {
            Some(v) => Val::Int(v),
            None => Val::Float(-(i as f64)),
        },
        Number::Float(f) => Val::Float(f.abs()),
    })
}

fn round_to_float(vm: &mut VM, func: &str, args: &[Val], op: fn(f64) -> f64) -> Result<Val, VmError> {
    check_arity(vm, func, args, 1, 1)?;
    Ok(match number_arg(vm, func, args, 0, "num")? {
        Number::Int(i) => Val::Float(i as f64),
        Number::Float(f) => Val::Float(op(f)),
    })
}

pub fn php_floor(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    round_to_float(vm, "floor", args, f64::floor)
}

pub fn php_ceil(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    round_to_float(vm, "ceil", args, f64::ceil)
}

pub fn php_round(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "round", args, 1, 3)?;
    let num = number_arg(vm, "round", args, 0, "num")?;
    let precision = opt_int_arg(vm, "round", args, 1, "precision", 0)?;
    Ok(match num {
        Number::Int(i) if precision >= 0 => Val::Float(i as f64),
        other => Val::Float(round_half_away(other.to_float(), precision)),
    })
}

pub fn php_sqrt(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "sqrt", args, 1, 1)?;
    Ok(Val::Float(float_arg(vm, "sqrt", args, 0, "num")?.sqrt()))
}

pub fn php_pow(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "pow", args, 2, 2)?;
    let base = args[0].deref_val();
    let exp = args[1].deref_val();
    let mut warnings = Vec::new();
    match arithmetic::pow(&base, &exp, &mut warnings) {
        Ok(result) => {
            vm.flush_warnings(&warnings)?;
            Ok(result)
        }
        Err(err) => Err(vm.operand_error(err, "**", &base, Some(&exp))),
    }
}

pub fn php_fmod(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "fmod", args, 2, 2)?;
    let x = float_arg(vm, "fmod", args, 0, "num1")?;
    let y = float_arg(vm, "fmod", args, 1, "num2")?;
    Ok(Val::Float(x % y))
}

pub fn php_intdiv(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "intdiv", args, 2, 2)?;
    let num1 = int_arg(vm, "intdiv", args, 0, "num1")?;
    let num2 = int_arg(vm, "intdiv", args, 1, "num2")?;
    if num2 == 0 {
        return Err(vm.throw_error("DivisionByZeroError", "Division by zero"));
    }
    match num1.checked_div(num2) {
        Some(q) => Ok(Val::Int(q)),
        None => Err(vm.throw_error(
            "ArithmeticError",
            "Division of PHP_INT_MIN by -1 is not an integer",
        )),
    }
}

fn extremum(vm: &mut VM, func: &str, args: &[Val], want: std::cmp::Ordering) -> Result<Val, VmError> {
    check_arity(vm, func, args, 1, usize::MAX)?;
    let candidates: Vec<Val> = if args.len() == 1 {
        match args[0].deref_val() {
            Val::Array(arr) => {
                if arr.is_empty() {
                    return Err(vm.value_error(&format!(
                        "{}(): Argument #1 ($value) must contain at least one element",
                        func
                    )));
                }
                arr.values().map(Val::deref_val).collect()
            }
            other => {
                let given = vm.debug_type(&other);
                return Err(vm.type_error(&format!(
                    "{}(): Argument #1 ($value) must be of type array, {} given",
                    func, given
                )));
            }
        }
    } else {
        args.iter().map(Val::deref_val).collect()
    };
    let mut best = candidates[0].clone();
    for value in &candidates[1..] {
        if vm.compare_values(value, &best)?.cmp(&0) == want {
            best = value.clone();
        }
    }
    Ok(best)
}

pub fn php_min(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    extremum(vm, "min", args, std::cmp::Ordering::Less)
}

pub fn php_max(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    extremum(vm, "max", args, std::cmp::Ordering::Greater)
}

pub fn php_pi(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "pi", args, 0, 0)?;
    Ok(Val::Float(std::f64::consts::PI))
}

pub fn php_is_nan(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "is_nan", args, 1, 1)?;
    Ok(Val::Bool(float_arg(vm, "is_nan", args, 0, "num")?.is_nan()))
}

pub fn php_is_finite(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "is_finite", args, 1, 1)?;
    Ok(Val::Bool(float_arg(vm, "is_finite", args, 0, "num")?.is_finite()))
}

pub fn php_is_infinite(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "is_infinite", args, 1, 1)?;
    Ok(Val::Bool(float_arg(vm, "is_infinite", args, 0, "num")?.is_infinite()))
}

pub fn php_mt_srand(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "mt_srand", args, 0, 2)?;
    let rng = match args.first() {
        Some(_) => StdRng::seed_from_u64(int_arg(vm, "mt_srand", args, 0, "seed")? as u64),
        None => StdRng::from_entropy(),
    };
    vm.context.set_extension_data(MtState(rng));
    Ok(Val::Null)
}

pub fn php_mt_rand(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    if args.len() == 1 {
        return Err(vm.throw_error(
            "ArgumentCountError",
            "mt_rand() expects exactly 2 arguments, 1 given",
        ));
    }
    check_arity(vm, "mt_rand", args, 0, 2)?;
    if args.is_empty() {
        return Ok(Val::Int(with_mt(vm, |rng| rng.gen_range(0..=i32::MAX as i64))));
    }
    let min = int_arg(vm, "mt_rand", args, 0, "min")?;
    let max = int_arg(vm, "mt_rand", args, 1, "max")?;
    if max < min {
        return Err(vm.value_error(
            "mt_rand(): Argument #2 ($max) must be greater than or equal to argument #1 ($min)",
        ));
    }
    Ok(Val::Int(with_mt(vm, |rng| rng.gen_range(min..=max))))
}

/// `rand()` tolerates swapped bounds.
pub fn php_rand(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    if args.len() == 1 {
        return Err(vm.throw_error(
            "ArgumentCountError",
            "rand() expects exactly 2 arguments, 1 given",
        ));
    }
    check_arity(vm, "rand", args, 0, 2)?;
    if args.is_empty() {
        return Ok(Val::Int(with_mt(vm, |rng| rng.gen_range(0..=i32::MAX as i64))));
    }
    let a = int_arg(vm, "rand", args, 0, "min")?;
    let b = int_arg(vm, "rand", args, 1, "max")?;
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Ok(Val::Int(with_mt(vm, |rng| rng.gen_range(lo..=hi))))
}

pub fn php_mt_getrandmax(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "mt_getrandmax", args, 0, 0)?;
    Ok(Val::Int(i32::MAX as i64))
}

pub fn php_random_int(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "random_int", args, 2, 2)?;
    let min = int_arg(vm, "random_int", args, 0, "min")?;
    let max = int_arg(vm, "random_int", args, 1, "max")?;
    if min > max {
        return Err(vm.value_error(
            "random_int(): Argument #1 ($min) must be less than or equal to argument #2 ($max)",
        ));
    }
    Ok(Val::Int(rand::thread_rng().gen_range(min..=max)))
}

fn to_base(mut n: u64, base: u32) -> Vec<u8> {
    if n == 0 {
        return b"0".to_vec();
    }
    let mut out = Vec::new();
    while n > 0 {
        let digit = (n % base as u64) as u32;
        out.push(std::char::from_digit(digit, base).map_or(b'0', |c| c as u8));
        n /= base as u64;
    }
    out.reverse();
    out
}

/// Digits outside the base are ignored with a deprecation.
fn from_base(vm: &mut VM, digits: &[u8], base: u32) -> Val {
    let mut acc: u64 = 0;
    let mut overflowed = false;
    let mut float_acc = 0.0f64;
    let mut invalid = false;
    for &b in digits {
        let Some(d) = (b as char).to_digit(base) else {
            invalid = true;
            continue;
        };
        if !overflowed {
            match acc
                .checked_mul(base as u64)
                .and_then(|v| v.checked_add(d as u64))
                .filter(|v| *v <= i64::MAX as u64)
            {
                Some(v) => acc = v,
                None => {
                    overflowed = true;
                    float_acc = acc as f64 * base as f64 + d as f64;
                }
            }
        } else {
            float_acc = float_acc * base as f64 + d as f64;
        }
    }
    if invalid {
        vm.deprecated("Invalid characters passed for attempted conversion, these have been ignored");
    }
    if overflowed {
        Val::Float(float_acc)
    } else {
        Val::Int(acc as i64)
    }
}

macro_rules! base_pair {
    ($to:ident, $to_name:literal, $from:ident, $from_name:literal, $base:expr) => {
        pub fn $to(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
            check_arity(vm, $to_name, args, 1, 1)?;
            let n = int_arg(vm, $to_name, args, 0, "num")?;
            Ok(Val::from(to_base(n as u64, $base)))
        }

        pub fn $from(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
            check_arity(vm, $from_name, args, 1, 1)?;
            let s = super::string_arg(vm, $from_name, args, 0, "string")?;
            Ok(from_base(vm, s.as_bytes(), $base))
        }
    };
}

base_pair!(php_decbin, "decbin", php_bindec, "bindec", 2);
base_pair!(php_dechex, "dechex", php_hexdec, "hexdec", 16);
base_pair!(php_decoct, "decoct", php_octdec, "octdec", 8);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::executor::{execute_code, run_code_capture_output};

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn base_conversion() {
        assert_eq!(to_base(255, 16), b"ff");
        assert_eq!(to_base(0, 2), b"0");
        assert_eq!(run("<?php echo decbin(10), ' ', hexdec('ff'), ' ', octdec('17'), ' ', dechex(-1);"), "1010 255 15 ffffffffffffffff");
    }

    #[test]
    fn intdiv_errors() {
        let out = run(
            "<?php echo intdiv(7, 2), ' ';
             try { intdiv(1, 0); } catch (DivisionByZeroError $e) { echo $e->getMessage(), ' '; }
             try { intdiv(PHP_INT_MIN, -1); } catch (ArithmeticError $e) { echo $e->getMessage(); }",
        );
        assert_eq!(out, "3 Division by zero Division of PHP_INT_MIN by -1 is not an integer");
    }

    #[test]
    fn rounding() {
        assert_eq!(
            run("<?php echo round(2.5), ' ', round(-2.5), ' ', round(1.955, 2), ' ', round(1234, -2), ' ', floor(-1.5), ' ', ceil(1.2);"),
            "3 -3 1.96 1200 -2 2"
        );
    }

    #[test]
    fn min_max_use_loose_comparison() {
        assert_eq!(run("<?php echo max(1, '5', 3), ' ', min([4, 2, 8]), ' ', max('apple', 'banana');"), "5 2 banana");
        let out = run("<?php try { max([]); } catch (ValueError $e) { echo $e->getMessage(); }");
        assert_eq!(out, "max(): Argument #1 ($value) must contain at least one element");
    }

    #[test]
    fn seeded_mt_rand_repeats() {
        let out = run("<?php mt_srand(42); $a = mt_rand(1, 100); mt_srand(42); echo $a === mt_rand(1, 100) ? 'same' : 'diff';");
        assert_eq!(out, "same");
    }

    #[test]
    fn random_int_bounds() {
        let out = run("<?php $r = random_int(5, 5); echo $r; try { random_int(2, 1); } catch (ValueError $e) { echo ' ok'; }");
        assert_eq!(out, "5 ok");
    }

    #[test]
    fn abs_of_int_min_is_float() {
        let result = execute_code("<?php var_dump(abs(PHP_INT_MIN), abs(-3), pow(2, 3), pow(2, -1));").unwrap();
        assert_eq!(result.stdout, "float(9.2233720368547758E+18)\nint(3)\nint(8)\nfloat(0.5)\n");
    }
}

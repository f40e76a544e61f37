// Math natives.

use crate::luna_value::LunaValue;
use crate::luna_vm::{LunaResult, LunaVM};

// A non-number argument yields null rather than a runtime error; the
// script decides what to do with it.
fn unary_number(value: LunaValue, f: fn(f64) -> f64) -> LunaResult<LunaValue> {
    match value.as_number() {
        Some(n) => Ok(LunaValue::number(f(n))),
        None => Ok(LunaValue::null()),
    }
}

pub(super) fn sqrt(_vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    unary_number(args[0], f64::sqrt)
}

pub(super) fn sin(_vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    unary_number(args[0], f64::sin)
}

pub(super) fn cos(_vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    unary_number(args[0], f64::cos)
}

pub(super) fn tan(_vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    unary_number(args[0], f64::tan)
}

pub(super) fn pow(_vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    match (args[0].as_number(), args[1].as_number()) {
        (Some(base), Some(exponent)) => Ok(LunaValue::number(base.powf(exponent))),
        _ => Ok(LunaValue::null()),
    }
}

/// Uniform in [0, 1).
pub(super) fn random(_vm: &mut LunaVM, _args: &[LunaValue]) -> LunaResult<LunaValue> {
    Ok(LunaValue::number(rand::random::<f64>()))
}

/// Parse a string as a number; numbers pass through; anything else is
/// null.
pub(super) fn to_number(vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    if args[0].as_number().is_some() {
        return Ok(args[0]);
    }
    match vm.value_as_str(args[0]) {
        Some(text) => match text.trim().parse::<f64>() {
            Ok(n) => Ok(LunaValue::number(n)),
            Err(_) => Ok(LunaValue::null()),
        },
        None => Ok(LunaValue::null()),
    }
}

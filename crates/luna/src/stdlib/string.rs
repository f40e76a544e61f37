// String natives. Indices are byte offsets, consistent with the
// bytes-through treatment of source text.

use crate::luna_value::LunaValue;
use crate::luna_vm::{LunaResult, LunaVM};

pub(super) fn str_length(vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    match vm.value_as_str(args[0]) {
        Some(text) => Ok(LunaValue::number(text.len() as f64)),
        None => Ok(LunaValue::null()),
    }
}

/// One-character string at the given index, or null out of range.
pub(super) fn char_at(vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    let (Some(text), Some(index)) = (vm.value_as_str(args[0]), args[1].as_number()) else {
        return Ok(LunaValue::null());
    };
    if index < 0.0 {
        return Ok(LunaValue::null());
    }
    match text.as_bytes().get(index as usize) {
        Some(&byte) => {
            let id = vm.take_string((byte as char).to_string());
            Ok(LunaValue::object(id))
        }
        None => Ok(LunaValue::null()),
    }
}

/// `substr(s, start, end)`: the bytes in `[start, end)`. An end before
/// the start or past the string is null, not a clamp.
pub(super) fn substr(vm: &mut LunaVM, args: &[LunaValue]) -> LunaResult<LunaValue> {
    let (Some(text), Some(start), Some(end)) = (
        vm.value_as_str(args[0]),
        args[1].as_number(),
        args[2].as_number(),
    ) else {
        return Ok(LunaValue::null());
    };
    if start < 0.0 || end < 0.0 {
        return Ok(LunaValue::null());
    }

    let (start, end) = (start as usize, end as usize);
    if end < start || end > text.len() {
        return Ok(LunaValue::null());
    }
    let slice = String::from_utf8_lossy(&text.as_bytes()[start..end]).into_owned();
    let id = vm.take_string(slice);
    Ok(LunaValue::object(id))
}

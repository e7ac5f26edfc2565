//! Native global functions: constructors, `Date`, `parseInt`

use crate::gc::HeapKind;
use crate::runtime::ScriptArray;
use crate::value::Value;
use crate::vm::native::{NativeCtx, NativeFn};

pub const DATE_PROPS: &[(&str, NativeFn, i64)] = &[("now", date_now, 0)];

/// `Array(n)` sizes a fresh array; `Array(a, b, ...)` builds one from the
/// arguments.
pub fn array_ctor(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let elems = match (argc, ctx.arg(0, argc)) {
        (1, Value::Int(n)) if n >= 0 => vec![Value::undefined(); n as usize],
        _ => (0..argc).map(|i| ctx.arg(i, argc)).collect(),
    };
    let proto = ctx.realm.protos.array;
    match ctx
        .realm
        .heap
        .alloc(HeapKind::Array(ScriptArray::from_values(elems, proto)))
    {
        Some(h) => {
            ctx.ret(Value::Ref(h));
            true
        }
        None => false,
    }
}

/// `String(x)` — stringify.
pub fn string_ctor(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let s = ctx.realm.stringify(ctx.arg(0, argc));
    match ctx.realm.new_string(s) {
        Some(h) => {
            ctx.ret(Value::Ref(h));
            true
        }
        None => false,
    }
}

/// `Boolean(x)` — truthiness.
pub fn boolean_ctor(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let b = ctx.realm.truthy(ctx.arg(0, argc));
    ctx.ret(Value::Bool(b));
    true
}

/// `Date.now()` — milliseconds since the Unix epoch.
fn date_now(ctx: &mut NativeCtx<'_>, _argc: usize) -> bool {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            ctx.ret(Value::Int(d.as_millis() as i64));
            true
        }
        Err(_) => false,
    }
}

/// `parseInt(s[, radix])` — radix 2..=36, default 10. Yields `undefined`
/// when no digits parse (the source language has no NaN literal).
pub fn parse_int(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let radix = match ctx.arg(1, argc) {
        Value::Undefined => 10,
        Value::Int(r) if (2..=36).contains(&r) => r as u32,
        _ => return false,
    };

    match ctx.arg(0, argc) {
        // Numbers pass through (truncating floats).
        Value::Int(n) => {
            ctx.ret(Value::Int(n));
            true
        }
        Value::Num(n) if n.is_finite() => {
            ctx.ret(Value::Int(n.trunc() as i64));
            true
        }
        v => {
            let Some(s) = v.as_handle().and_then(|h| ctx.realm.heap.as_str(h)) else {
                return false;
            };
            let trimmed = s.trim_start();
            let (negative, rest) = match trimmed.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
            };

            let digits: String = rest.chars().take_while(|c| c.is_digit(radix)).collect();
            let parsed = i64::from_str_radix(&digits, radix).ok();
            let result = match parsed {
                Some(n) => Value::Int(if negative { -n } else { n }),
                None => Value::undefined(),
            };
            ctx.ret(result);
            true
        }
    }
}

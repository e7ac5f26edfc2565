//! `String.prototype` natives
//!
//! The receiver is the primitive string itself; the VM routes member
//! lookups on strings through `String.prototype`, so these natives read
//! their string out of `ctx.this_val`. Indices are in characters, not
//! bytes.

use crate::value::Value;
use crate::vm::native::{NativeCtx, NativeFn};

pub const PROTO_PROPS: &[(&str, NativeFn, i64)] = &[
    ("charAt", string_char_at, 1),
    ("indexOf", string_index_of, 1),
    ("slice", string_slice, 2),
    ("toUpperCase", string_to_upper, 0),
    ("toLowerCase", string_to_lower, 0),
];

fn receiver(ctx: &NativeCtx<'_>) -> Option<String> {
    ctx.this_val
        .as_handle()
        .and_then(|h| ctx.realm.heap.as_str(h))
        .map(str::to_string)
}

fn ret_string(ctx: &mut NativeCtx<'_>, s: String) -> bool {
    match ctx.realm.new_string(s) {
        Some(h) => {
            ctx.ret(Value::Ref(h));
            true
        }
        None => false,
    }
}

/// `s.charAt(i)` — one-character string, empty when out of range.
fn string_char_at(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let Some(s) = receiver(ctx) else {
        return false;
    };
    let Value::Int(i) = ctx.arg(0, argc) else {
        return false;
    };
    let picked = if i >= 0 {
        s.chars().nth(i as usize)
    } else {
        None
    };
    ret_string(ctx, picked.map(String::from).unwrap_or_default())
}

/// `s.indexOf(needle)` — character index or -1.
fn string_index_of(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let Some(s) = receiver(ctx) else {
        return false;
    };
    let needle = match ctx
        .arg(0, argc)
        .as_handle()
        .and_then(|h| ctx.realm.heap.as_str(h))
    {
        Some(n) => n.to_string(),
        None => return false,
    };

    let result = match s.find(&needle) {
        Some(byte_off) => s[..byte_off].chars().count() as i64,
        None => -1,
    };
    ctx.ret(Value::Int(result));
    true
}

/// `s.slice(start[, end])` — character range; negatives count from the end.
fn string_slice(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let Some(s) = receiver(ctx) else {
        return false;
    };
    let len = s.chars().count() as i64;

    let clamp = |i: i64| -> usize {
        let adjusted = if i < 0 { len + i } else { i };
        adjusted.clamp(0, len) as usize
    };

    let start = match ctx.arg(0, argc) {
        Value::Undefined => 0,
        Value::Int(i) => clamp(i),
        _ => return false,
    };
    let end = match ctx.arg(1, argc) {
        Value::Undefined => len as usize,
        Value::Int(i) => clamp(i),
        _ => return false,
    };

    let out: String = if start < end {
        s.chars().skip(start).take(end - start).collect()
    } else {
        String::new()
    };
    ret_string(ctx, out)
}

fn string_to_upper(ctx: &mut NativeCtx<'_>, _argc: usize) -> bool {
    match receiver(ctx) {
        Some(s) => ret_string(ctx, s.to_uppercase()),
        None => false,
    }
}

fn string_to_lower(ctx: &mut NativeCtx<'_>, _argc: usize) -> bool {
    match receiver(ctx) {
        Some(s) => ret_string(ctx, s.to_lowercase()),
        None => false,
    }
}

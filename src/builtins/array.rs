//! `Array.prototype` natives
//!
//! Methods receive the array as the call receiver. Derived methods (map,
//! filter, forEach) are polyfilled in script.

use crate::value::Value;
use crate::vm::native::{NativeCtx, NativeFn};

pub const PROTO_PROPS: &[(&str, NativeFn, i64)] = &[
    ("push", array_push, 1),
    ("pop", array_pop, 0),
    ("join", array_join, 1),
    ("indexOf", array_index_of, 1),
];

fn array_push(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let Some(h) = ctx.this_val.as_handle() else {
        return false;
    };
    for i in 0..argc {
        let v = ctx.arg(i, argc);
        let Some(arr) = ctx.realm.heap.as_array_mut(h) else {
            return false;
        };
        if arr.frozen {
            return false;
        }
        arr.elems.push(v);
    }
    let len = match ctx.realm.heap.as_array(h) {
        Some(arr) => arr.elems.len(),
        None => return false,
    };
    ctx.ret(Value::Int(len as i64));
    true
}

fn array_pop(ctx: &mut NativeCtx<'_>, _argc: usize) -> bool {
    let Some(arr) = ctx
        .this_val
        .as_handle()
        .and_then(|h| ctx.realm.heap.as_array_mut(h))
    else {
        return false;
    };
    if arr.frozen {
        return false;
    }
    let v = arr.elems.pop().unwrap_or(Value::undefined());
    ctx.ret(v);
    true
}

fn array_join(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let sep = match ctx.arg(0, argc) {
        Value::Undefined => ",".to_string(),
        v => match v.as_handle().and_then(|h| ctx.realm.heap.as_str(h)) {
            Some(s) => s.to_string(),
            None => return false,
        },
    };

    let Some(elems) = ctx
        .this_val
        .as_handle()
        .and_then(|h| ctx.realm.heap.as_array(h))
        .map(|a| a.elems.clone())
    else {
        return false;
    };

    let parts: Vec<String> = elems.iter().map(|&v| ctx.realm.stringify(v)).collect();
    match ctx.realm.new_string(parts.join(&sep)) {
        Some(h) => {
            ctx.ret(Value::Ref(h));
            true
        }
        None => false,
    }
}

fn array_index_of(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let needle = ctx.arg(0, argc);
    let Some(arr) = ctx
        .this_val
        .as_handle()
        .and_then(|h| ctx.realm.heap.as_array(h))
    else {
        return false;
    };

    let mut found = -1i64;
    for (i, &v) in arr.elems.iter().enumerate() {
        if ctx.realm.strict_eq(v, needle) {
            found = i as i64;
            break;
        }
    }
    ctx.ret(Value::Int(found));
    true
}

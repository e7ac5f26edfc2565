//! The `Object` global

use crate::gc::HeapKind;
use crate::runtime::ScriptObject;
use crate::value::Value;
use crate::vm::native::{NativeCtx, NativeFn};

pub const GLOBAL_PROPS: &[(&str, NativeFn, i64)] = &[
    ("create", object_create, 1),
    ("freeze", object_freeze, 1),
    ("keys", object_keys, 1),
    ("getPrototypeOf", object_get_prototype_of, 1),
];

/// `Object.create(proto)` — fresh object with the given prototype.
fn object_create(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let proto = ctx.arg(0, argc);
    if !proto.is_ref() && !proto.is_null() {
        return false;
    }
    match ctx
        .realm
        .heap
        .alloc(HeapKind::Object(ScriptObject::new(proto)))
    {
        Some(h) => {
            ctx.ret(Value::Ref(h));
            true
        }
        None => false,
    }
}

/// `Object.freeze(o)` — set the frozen flag; primitives pass through.
fn object_freeze(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let target = ctx.arg(0, argc);
    if let Some(h) = target.as_handle() {
        match &mut ctx.realm.heap.get_mut(h).kind {
            HeapKind::Object(o) => o.frozen = true,
            HeapKind::Array(a) => a.frozen = true,
            _ => {}
        }
    }
    ctx.ret(target);
    true
}

/// `Object.keys(o)` — own property names, insertion order.
fn object_keys(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let Some(h) = ctx.arg(0, argc).as_handle() else {
        return false;
    };

    let syms: Vec<_> = match &ctx.realm.heap.get(h).kind {
        HeapKind::Object(o) => o.props.keys().collect(),
        HeapKind::Array(a) => a.props.keys().collect(),
        HeapKind::Function(f) => f.props.keys().collect(),
        HeapKind::Str(_) => return false,
    };

    let mut elems = Vec::with_capacity(syms.len());
    for sym in syms {
        let name = ctx.realm.names.name(sym).to_string();
        match ctx.realm.new_string(name) {
            Some(sh) => elems.push(Value::Ref(sh)),
            None => return false,
        }
    }

    let proto = ctx.realm.protos.array;
    let arr = crate::runtime::ScriptArray::from_values(elems, proto);
    match ctx.realm.heap.alloc(HeapKind::Array(arr)) {
        Some(ah) => {
            ctx.ret(Value::Ref(ah));
            true
        }
        None => false,
    }
}

/// `Object.getPrototypeOf(o)`.
fn object_get_prototype_of(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    let Some(h) = ctx.arg(0, argc).as_handle() else {
        return false;
    };
    let proto = match &ctx.realm.heap.get(h).kind {
        HeapKind::Object(o) => o.proto,
        HeapKind::Array(a) => a.proto,
        HeapKind::Function(f) => f.proto,
        HeapKind::Str(_) => ctx.realm.protos.string,
    };
    ctx.ret(proto);
    true
}

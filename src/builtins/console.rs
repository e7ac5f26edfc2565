//! The `console` native object

use crate::value::Value;
use crate::vm::native::{NativeCtx, NativeFn};
use std::io::Write;

pub const PROPS: &[(&str, NativeFn, i64)] = &[
    ("log", console_log, 0),
    ("readln", console_readln, 1),
];

/// `console.log(...)` — each argument followed by one space, then a
/// newline.
fn console_log(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    for i in 0..argc {
        let rendered = ctx.realm.stringify(ctx.arg(i, argc));
        if write!(ctx.out, "{} ", rendered).is_err() {
            return false;
        }
    }
    if writeln!(ctx.out).is_err() {
        return false;
    }
    ctx.ret(Value::undefined());
    true
}

/// `console.readln(prompt)` — print the prompt, block on stdin, return
/// the line without its terminator.
fn console_readln(ctx: &mut NativeCtx<'_>, argc: usize) -> bool {
    use std::io::BufRead;

    let prompt = ctx.realm.stringify(ctx.arg(0, argc));
    if write!(ctx.out, "{}", prompt).is_err() || ctx.out.flush().is_err() {
        return false;
    }

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }

    match ctx.realm.new_string(line) {
        Some(h) => {
            ctx.ret(Value::Ref(h));
            true
        }
        None => false,
    }
}

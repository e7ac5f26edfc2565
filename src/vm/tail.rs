//! Tail-dispatch core
//!
//! Dispatch goes handler-to-handler through a table indexed by opcode
//! byte: each handler executes one instruction and hands control straight
//! to the next handler via the trampoline, keeping the host stack flat.
//! Script `tail_call`s additionally reuse the current frame, so
//! tail-recursive scripts run in constant frame depth — the observable
//! difference from the loop-switch core.

use super::{Flow, Machine, VmError};
use crate::value::Value;
use crate::vm::opcode::Op;

type Handler = for<'rt> fn(&mut Machine<'rt>) -> Result<Flow, VmError>;

macro_rules! handler {
    ($name:ident, $method:ident) => {
        fn $name<'rt>(m: &mut Machine<'rt>) -> Result<Flow, VmError> {
            m.$method()
        }
    };
}

handler!(h_invalid, op_invalid);
handler!(h_push_undef, op_push_undef);
handler!(h_push_null, op_push_null);
handler!(h_push_bool, op_push_bool);
handler!(h_push_int, op_push_int);
handler!(h_push_const_num, op_push_const_num);
handler!(h_push_const_str, op_push_const_str);
handler!(h_push_this, op_push_this);
handler!(h_load_local, op_load_local);
handler!(h_store_local, op_store_local);
handler!(h_load_global, op_load_global);
handler!(h_store_global, op_store_global);
handler!(h_load_upvalue, op_load_upvalue);
handler!(h_store_upvalue, op_store_upvalue);
handler!(h_new_object, op_new_object);
handler!(h_new_array, op_new_array);
handler!(h_get_prop, op_get_prop);
handler!(h_set_prop, op_set_prop);
handler!(h_get_index, op_get_index);
handler!(h_set_index, op_set_index);
handler!(h_make_lambda, op_make_lambda);
handler!(h_call, op_call);
handler!(h_call_method, op_call_method);
handler!(h_construct, op_construct);
handler!(h_tail_call, op_tail_call_reuse);
handler!(h_ret, op_ret);
handler!(h_ret_undef, op_ret_undef);
handler!(h_neg, op_neg);
handler!(h_not, op_not);
handler!(h_add, op_add);
handler!(h_sub, op_sub);
handler!(h_mul, op_mul);
handler!(h_div, op_div);
handler!(h_mod, op_mod);
handler!(h_eq, op_eq);
handler!(h_neq, op_neq);
handler!(h_strict_eq, op_strict_eq);
handler!(h_strict_neq, op_strict_neq);
handler!(h_lt, op_lt);
handler!(h_le, op_le);
handler!(h_gt, op_gt);
handler!(h_ge, op_ge);
handler!(h_and, op_and);
handler!(h_or, op_or);
handler!(h_typeof, op_typeof);
handler!(h_void, op_void);
handler!(h_jump, op_jump);
handler!(h_jump_if_false, op_jump_if_false);
handler!(h_jump_if_true, op_jump_if_true);
handler!(h_pop, op_pop);
handler!(h_dup, op_dup);
handler!(h_nop, op_nop);

/// Handler table, indexed by opcode byte. Order matches `Op`.
static HANDLERS: [Handler; Op::COUNT] = [
    h_invalid,
    h_push_undef,
    h_push_null,
    h_push_bool,
    h_push_int,
    h_push_const_num,
    h_push_const_str,
    h_push_this,
    h_load_local,
    h_store_local,
    h_load_global,
    h_store_global,
    h_load_upvalue,
    h_store_upvalue,
    h_new_object,
    h_new_array,
    h_get_prop,
    h_set_prop,
    h_get_index,
    h_set_index,
    h_make_lambda,
    h_call,
    h_call_method,
    h_construct,
    h_tail_call,
    h_ret,
    h_ret_undef,
    h_neg,
    h_not,
    h_add,
    h_sub,
    h_mul,
    h_div,
    h_mod,
    h_eq,
    h_neq,
    h_strict_eq,
    h_strict_neq,
    h_lt,
    h_le,
    h_gt,
    h_ge,
    h_and,
    h_or,
    h_typeof,
    h_void,
    h_jump,
    h_jump_if_false,
    h_jump_if_true,
    h_pop,
    h_dup,
    h_nop,
];

/// Trampoline: fetch, index the handler table, transfer.
pub fn run(m: &mut Machine) -> Result<Value, VmError> {
    loop {
        let Some(byte) = m.fetch() else {
            return Err(m.rt_err("execution ran off the end of the code"));
        };
        if byte as usize >= HANDLERS.len() {
            return Err(m.rt_err(format!("undecodable opcode byte {byte:#04x}")));
        }

        match HANDLERS[byte as usize](m)? {
            Flow::Continue => {}
            Flow::Done(v) => return Ok(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_table_covers_every_opcode() {
        assert_eq!(HANDLERS.len(), Op::COUNT);
    }
}

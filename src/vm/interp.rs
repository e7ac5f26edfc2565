//! Loop-switch dispatch core
//!
//! The classic central interpreter loop: fetch, decode, execute in one
//! `match`. Easy to read and debug; script tail calls get no special
//! treatment, so deep recursion runs into the frame budget.

use super::opcode::Op;
use super::{Flow, Machine, VmError};
use crate::value::Value;

/// Run the current function to completion.
pub fn run(m: &mut Machine) -> Result<Value, VmError> {
    loop {
        let Some(byte) = m.fetch() else {
            // Functions end in ret/ret_undef; running off the end means the
            // emitter broke its own contract.
            return Err(m.rt_err("execution ran off the end of the code"));
        };
        let Some(op) = Op::from_byte(byte) else {
            return Err(m.rt_err(format!("undecodable opcode byte {byte:#04x}")));
        };

        let flow = match op {
            Op::Invalid => m.op_invalid(),
            Op::PushUndef => m.op_push_undef(),
            Op::PushNull => m.op_push_null(),
            Op::PushBool => m.op_push_bool(),
            Op::PushInt => m.op_push_int(),
            Op::PushConstNum => m.op_push_const_num(),
            Op::PushConstStr => m.op_push_const_str(),
            Op::PushThis => m.op_push_this(),
            Op::LoadLocal => m.op_load_local(),
            Op::StoreLocal => m.op_store_local(),
            Op::LoadGlobal => m.op_load_global(),
            Op::StoreGlobal => m.op_store_global(),
            Op::LoadUpvalue => m.op_load_upvalue(),
            Op::StoreUpvalue => m.op_store_upvalue(),
            Op::NewObject => m.op_new_object(),
            Op::NewArray => m.op_new_array(),
            Op::GetProp => m.op_get_prop(),
            Op::SetProp => m.op_set_prop(),
            Op::GetIndex => m.op_get_index(),
            Op::SetIndex => m.op_set_index(),
            Op::MakeLambda => m.op_make_lambda(),
            Op::Call => m.op_call(),
            Op::CallMethod => m.op_call_method(),
            Op::Construct => m.op_construct(),
            Op::TailCall => m.op_tail_call_as_call(),
            Op::Ret => m.op_ret(),
            Op::RetUndef => m.op_ret_undef(),
            Op::Neg => m.op_neg(),
            Op::Not => m.op_not(),
            Op::Add => m.op_add(),
            Op::Sub => m.op_sub(),
            Op::Mul => m.op_mul(),
            Op::Div => m.op_div(),
            Op::Mod => m.op_mod(),
            Op::Eq => m.op_eq(),
            Op::Neq => m.op_neq(),
            Op::StrictEq => m.op_strict_eq(),
            Op::StrictNeq => m.op_strict_neq(),
            Op::Lt => m.op_lt(),
            Op::Le => m.op_le(),
            Op::Gt => m.op_gt(),
            Op::Ge => m.op_ge(),
            Op::And => m.op_and(),
            Op::Or => m.op_or(),
            Op::TypeOf => m.op_typeof(),
            Op::Void => m.op_void(),
            Op::Jump => m.op_jump(),
            Op::JumpIfFalse => m.op_jump_if_false(),
            Op::JumpIfTrue => m.op_jump_if_true(),
            Op::Pop => m.op_pop(),
            Op::Dup => m.op_dup(),
            Op::Nop => m.op_nop(),
        }?;

        if let Flow::Done(v) = flow {
            return Ok(v);
        }
    }
}

//! Virtual machine
//!
//! A register-of-stack machine: one bounded value stack shared by every
//! frame, with `rsbp` marking the base of the current frame's locals.
//! Frames record what it takes to resume the caller.
//!
//! Two interchangeable dispatch cores execute the same opcode contract:
//! `interp` (central loop-switch) and `tail` (handler-table trampoline that
//! additionally honors `tail_call` by reusing the current frame). All
//! opcode semantics live here as shared `Machine` methods; the cores only
//! differ in how control moves from one instruction to the next.

pub mod interp;
pub mod native;
pub mod opcode;
pub mod tail;

use crate::compiler::program::{Program, UpvalSrc};
use crate::gc::{self, HeapKind};
use crate::runtime::function::FunctionKind;
use crate::runtime::object::ScriptObject;
use crate::runtime::property::KeySym;
use crate::runtime::{Realm, ScriptArray};
use crate::value::{Handle, Value};
use native::NativeCtx;
use std::io::Write;
use thiserror::Error;

/// Interpreter core selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Central fetch/decode/execute loop. Simpler; deep script recursion
    /// exhausts the frame budget.
    LoopSwitch,
    /// Handler-to-handler trampoline; `tail_call` reuses the frame, so
    /// tail recursion runs in constant frame depth.
    #[default]
    Tail,
}

/// VM resource limits, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    pub stack_capacity: usize,
    pub call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_capacity: 2048,
            call_depth: 208,
        }
    }
}

/// Fatal execution errors. Every one of these ends the run.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("runtime error at line {line}: {msg}")]
    Runtime { line: u32, msg: String },
    #[error("stack overflow")]
    StackOverflow,
    #[error("call depth exhausted")]
    CallDepthExhausted,
    #[error("out of heap memory")]
    OutOfMemory,
    #[error("native function `{0}` failed")]
    Host(String),
}

/// What an opcode handler tells the dispatch core to do next.
pub enum Flow {
    Continue,
    Done(Value),
}

/// Saved caller state for one in-progress call.
struct Frame {
    ret_pc: usize,
    ret_fn: u32,
    saved_rsbp: usize,
    saved_func: Value,
    saved_this: Value,
    /// Stack index the return value lands on (the callee slot, or the
    /// receiver slot for method calls).
    ret_base: usize,
    /// For `construct`: the freshly allocated receiver, which becomes the
    /// result unless the constructor returns a heap value.
    construct_this: Option<Value>,
}

enum CallKind {
    Plain,
    Method,
    Construct,
}

/// One executing VM instance. Borrows the realm and program from the
/// driver; its own stack and frames die with the run.
pub struct Machine<'rt> {
    pub realm: &'rt mut Realm,
    program: &'rt Program,
    out: &'rt mut dyn Write,
    config: VmConfig,

    stack: Vec<Value>,
    frames: Vec<Frame>,
    rsbp: usize,
    pc: usize,
    fn_id: u32,
    /// Current function object (for upvalues); undefined at the top level.
    func_val: Value,
    this_val: Value,

    sym_length: KeySym,
    sym_prototype: KeySym,
}

impl<'rt> Machine<'rt> {
    pub fn new(
        realm: &'rt mut Realm,
        program: &'rt Program,
        out: &'rt mut dyn Write,
        config: VmConfig,
    ) -> Self {
        let sym_length = realm.names.intern("length");
        let sym_prototype = realm.names.intern("prototype");
        Machine {
            realm,
            program,
            out,
            config,
            stack: Vec::new(),
            frames: Vec::new(),
            rsbp: 0,
            pc: 0,
            fn_id: 0,
            func_val: Value::undefined(),
            this_val: Value::undefined(),
            sym_length,
            sym_prototype,
        }
    }

    /// Execute `entry` (a top-level function id) under the given policy.
    pub fn run(&mut self, entry: u32, policy: DispatchPolicy) -> Result<Value, VmError> {
        self.fn_id = entry;
        self.pc = 0;
        self.rsbp = self.stack.len();
        let proto = self.program.func(entry);
        for _ in 0..proto.local_slots {
            self.push(Value::undefined())?;
        }

        match policy {
            DispatchPolicy::LoopSwitch => interp::run(self),
            DispatchPolicy::Tail => tail::run(self),
        }
    }

    // =====================================================================
    // Fetch / stack primitives
    // =====================================================================

    #[inline]
    fn code(&self) -> &'rt [u8] {
        &self.program.func(self.fn_id).code
    }

    /// Fetch the next opcode byte, or None at end of code.
    #[inline]
    fn fetch(&mut self) -> Option<u8> {
        let byte = self.code().get(self.pc).copied()?;
        self.pc += 1;
        Some(byte)
    }

    #[inline]
    fn rd_u8(&mut self) -> u8 {
        let b = self.code()[self.pc];
        self.pc += 1;
        b
    }

    #[inline]
    fn rd_u16(&mut self) -> u16 {
        let v = opcode::read_u16(self.code(), self.pc);
        self.pc += 2;
        v
    }

    #[inline]
    fn rd_i32(&mut self) -> i32 {
        let v = opcode::read_i32(self.code(), self.pc);
        self.pc += 4;
        v
    }

    #[inline]
    fn push(&mut self, v: Value) -> Result<(), VmError> {
        if self.stack.len() >= self.config.stack_capacity {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(v);
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or_else(|| self.rt_err("value stack underflow"))
    }

    #[inline]
    fn peek(&self, depth: usize) -> Value {
        self.stack[self.stack.len() - 1 - depth]
    }

    /// Replace the top `consumed` values with `result`.
    #[inline]
    fn replace_top(&mut self, consumed: usize, result: Value) {
        let new_len = self.stack.len() - consumed;
        self.stack.truncate(new_len);
        self.stack.push(result);
    }

    fn rt_err(&self, msg: impl Into<String>) -> VmError {
        VmError::Runtime {
            line: self.program.func(self.fn_id).line_for(self.pc),
            msg: msg.into(),
        }
    }

    // =====================================================================
    // Allocation and collection
    // =====================================================================

    /// Allocate from the VM (never from natives): collects first when the
    /// threshold or the pool cap is hit, and fails the run only when a
    /// collection did not help.
    fn alloc_value(&mut self, kind: HeapKind) -> Result<Handle, VmError> {
        if self.realm.heap.wants_gc() {
            self.collect();
        }
        self.realm.heap.alloc(kind).ok_or(VmError::OutOfMemory)
    }

    /// Run a collection with the full root set: value stack, frame state,
    /// current registers, globals, prototypes, and registered natives.
    pub fn collect(&mut self) {
        let mut roots: Vec<Value> =
            Vec::with_capacity(self.stack.len() + self.frames.len() * 3 + 8);
        roots.extend(self.stack.iter().copied());
        roots.push(self.func_val);
        roots.push(self.this_val);
        for f in &self.frames {
            roots.push(f.saved_func);
            roots.push(f.saved_this);
            if let Some(obj) = f.construct_this {
                roots.push(obj);
            }
        }
        roots.extend(self.realm.roots());
        gc::collect(&mut self.realm.heap, roots);
    }

    /// Intern the string constant behind a `get_prop`/`set_prop` operand.
    fn key_for(&mut self, const_idx: u16) -> KeySym {
        let name: &str = self.program.consts.str(const_idx);
        self.realm.names.intern(name)
    }

    // =====================================================================
    // Value predicates shared by the handlers
    // =====================================================================

    fn truthy(&self, v: Value) -> bool {
        self.realm.truthy(v)
    }

    fn str_content(&self, v: Value) -> Option<&str> {
        v.as_handle().and_then(|h| self.realm.heap.as_str(h))
    }

    #[inline]
    fn strict_eq(&self, a: Value, b: Value) -> bool {
        self.realm.strict_eq(a, b)
    }

    #[inline]
    fn loose_eq(&self, a: Value, b: Value) -> bool {
        self.realm.loose_eq(a, b)
    }

    // =====================================================================
    // Opcode handlers (shared by both dispatch cores)
    // =====================================================================

    pub(crate) fn op_invalid(&mut self) -> Result<Flow, VmError> {
        Err(self.rt_err("invalid opcode"))
    }

    pub(crate) fn op_push_undef(&mut self) -> Result<Flow, VmError> {
        self.push(Value::undefined())?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_push_null(&mut self) -> Result<Flow, VmError> {
        self.push(Value::null())?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_push_bool(&mut self) -> Result<Flow, VmError> {
        let b = self.rd_u8() != 0;
        self.push(Value::Bool(b))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_push_int(&mut self) -> Result<Flow, VmError> {
        let n = self.rd_i32();
        self.push(Value::Int(n as i64))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_push_const_num(&mut self) -> Result<Flow, VmError> {
        let idx = self.rd_u16();
        let n = self.program.consts.num(idx);
        self.push(Value::Num(n))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_push_const_str(&mut self) -> Result<Flow, VmError> {
        let idx = self.rd_u16();
        let s: &str = self.program.consts.str(idx);
        let h = self.alloc_value(HeapKind::Str(s.to_string()))?;
        self.push(Value::Ref(h))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_push_this(&mut self) -> Result<Flow, VmError> {
        let v = self.this_val;
        self.push(v)?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_load_local(&mut self) -> Result<Flow, VmError> {
        let slot = self.rd_u16() as usize;
        let v = self.stack[self.rsbp + slot];
        self.push(v)?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_store_local(&mut self) -> Result<Flow, VmError> {
        let slot = self.rd_u16() as usize;
        let v = self.pop()?;
        self.stack[self.rsbp + slot] = v;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_load_global(&mut self) -> Result<Flow, VmError> {
        let slot = self.rd_u16() as usize;
        let v = self.realm.globals[slot];
        self.push(v)?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_store_global(&mut self) -> Result<Flow, VmError> {
        let slot = self.rd_u16() as usize;
        let v = self.pop()?;
        self.realm.globals[slot] = v;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_load_upvalue(&mut self) -> Result<Flow, VmError> {
        let idx = self.rd_u16() as usize;
        let v = self
            .func_val
            .as_handle()
            .and_then(|h| self.realm.heap.as_function(h))
            .and_then(|f| match &f.kind {
                FunctionKind::Script { upvalues, .. } => upvalues.get(idx).copied(),
                _ => None,
            })
            .ok_or_else(|| self.rt_err("upvalue access outside a closure"))?;
        self.push(v)?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_store_upvalue(&mut self) -> Result<Flow, VmError> {
        let idx = self.rd_u16() as usize;
        let v = self.pop()?;
        let func = self.func_val.as_handle();
        let slot = func
            .and_then(|h| self.realm.heap.as_function_mut(h))
            .and_then(|f| match &mut f.kind {
                FunctionKind::Script { upvalues, .. } => upvalues.get_mut(idx),
                _ => None,
            });
        match slot {
            Some(slot) => {
                *slot = v;
                Ok(Flow::Continue)
            }
            None => Err(self.rt_err("upvalue store outside a closure")),
        }
    }

    pub(crate) fn op_new_object(&mut self) -> Result<Flow, VmError> {
        let pairs = self.rd_u16() as usize;
        let proto = self.realm.protos.object;
        // Allocate while the key/value operands are still stack roots.
        let h = self.alloc_value(HeapKind::Object(ScriptObject::new(proto)))?;

        let base = self.stack.len() - pairs * 2;
        for i in 0..pairs {
            let key = self.stack[base + i * 2];
            let value = self.stack[base + i * 2 + 1];
            let name = self
                .str_content(key)
                .ok_or_else(|| self.rt_err("object literal key is not a string"))?
                .to_string();
            let sym = self.realm.names.intern(&name);
            if let Some(obj) = self.realm.heap.as_object_mut(h) {
                obj.props.set(sym, value);
            }
        }
        self.stack.truncate(base);
        self.push(Value::Ref(h))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_new_array(&mut self) -> Result<Flow, VmError> {
        let count = self.rd_u16() as usize;
        let proto = self.realm.protos.array;
        let h = self.alloc_value(HeapKind::Array(ScriptArray::new(proto)))?;

        let base = self.stack.len() - count;
        let elems: Vec<Value> = self.stack[base..].to_vec();
        if let Some(arr) = self.realm.heap.as_array_mut(h) {
            arr.elems = elems;
        }
        self.stack.truncate(base);
        self.push(Value::Ref(h))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_get_prop(&mut self) -> Result<Flow, VmError> {
        let idx = self.rd_u16();
        let sym = self.key_for(idx);
        let base = self.peek(0);
        let result = self.get_prop_by_sym(base, sym)?;
        self.replace_top(1, result);
        Ok(Flow::Continue)
    }

    pub(crate) fn op_set_prop(&mut self) -> Result<Flow, VmError> {
        let idx = self.rd_u16();
        let sym = self.key_for(idx);
        let value = self.pop()?;
        let base = self.pop()?;
        self.set_prop_by_sym(base, sym, value)?;
        // The stored value is the expression result.
        self.push(value)?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_get_index(&mut self) -> Result<Flow, VmError> {
        let index = self.peek(0);
        let base = self.peek(1);
        let result = self.get_index_value(base, index)?;
        self.replace_top(2, result);
        Ok(Flow::Continue)
    }

    pub(crate) fn op_set_index(&mut self) -> Result<Flow, VmError> {
        let value = self.pop()?;
        let index = self.pop()?;
        let base = self.pop()?;
        self.set_index_value(base, index, value)?;
        self.push(value)?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_make_lambda(&mut self) -> Result<Flow, VmError> {
        let fn_id = self.rd_u16() as u32;
        let proto = self.program.func(fn_id);

        // Capture cells: copies of the sources at construction time. The
        // copies stay live through their originals while we allocate.
        let mut upvalues = Vec::with_capacity(proto.upvals.len());
        for src in &proto.upvals {
            let v = match *src {
                UpvalSrc::ParentLocal(slot) => self.stack[self.rsbp + slot as usize],
                UpvalSrc::ParentUpvalue(idx) => self
                    .func_val
                    .as_handle()
                    .and_then(|h| self.realm.heap.as_function(h))
                    .and_then(|f| match &f.kind {
                        FunctionKind::Script { upvalues, .. } => {
                            upvalues.get(idx as usize).copied()
                        }
                        _ => None,
                    })
                    .ok_or_else(|| self.rt_err("upvalue capture outside a closure"))?,
            };
            upvalues.push(v);
        }

        let fn_proto = self.realm.protos.function;
        let mut func = crate::runtime::FunctionObj::script(fn_id, upvalues, fn_proto);
        func.props
            .set(self.sym_length, Value::Int(proto.arity as i64));
        let h = self.alloc_value(HeapKind::Function(func))?;
        self.push(Value::Ref(h))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_call(&mut self) -> Result<Flow, VmError> {
        self.call_op(CallKind::Plain)
    }

    pub(crate) fn op_call_method(&mut self) -> Result<Flow, VmError> {
        self.call_op(CallKind::Method)
    }

    pub(crate) fn op_construct(&mut self) -> Result<Flow, VmError> {
        self.call_op(CallKind::Construct)
    }

    /// `tail_call` under loop-switch dispatch: a plain call. The emitted
    /// `ret` right after it completes the return.
    pub(crate) fn op_tail_call_as_call(&mut self) -> Result<Flow, VmError> {
        self.call_op(CallKind::Plain)
    }

    /// `tail_call` under tail dispatch: reuse the current frame.
    pub(crate) fn op_tail_call_reuse(&mut self) -> Result<Flow, VmError> {
        let argc = self.rd_u8() as usize;
        let callee_idx = self.stack.len() - argc - 1;
        let callee = self.stack[callee_idx];

        let Some(script_id) = self.callable_id(callee) else {
            return Err(self.rt_err(format!("{} value is not callable", callee.kind_name())));
        };

        match script_id {
            None => {
                // Natives have no frame to reuse; complete the call and let
                // the following `ret` return its result.
                self.call_native(callee, callee_idx, argc, CallKind::Plain)?;
                Ok(Flow::Continue)
            }
            Some(fn_id) => {
                let proto = self.program.func(fn_id);
                let arity = proto.arity as usize;

                // Move the arguments down into the current frame's slots.
                for i in 0..argc.min(arity) {
                    self.stack[self.rsbp + i] = self.stack[callee_idx + 1 + i];
                }
                for i in argc..arity {
                    self.stack[self.rsbp + i] = Value::undefined();
                }
                self.stack.truncate(self.rsbp + arity);
                for _ in arity..proto.local_slots as usize {
                    self.push(Value::undefined())?;
                }

                self.fn_id = fn_id;
                self.func_val = callee;
                self.this_val = Value::undefined();
                self.pc = 0;
                Ok(Flow::Continue)
            }
        }
    }

    pub(crate) fn op_ret(&mut self) -> Result<Flow, VmError> {
        let rv = self.pop()?;
        self.finish_return(rv)
    }

    pub(crate) fn op_ret_undef(&mut self) -> Result<Flow, VmError> {
        self.finish_return(Value::undefined())
    }

    pub(crate) fn op_neg(&mut self) -> Result<Flow, VmError> {
        let v = self.peek(0);
        let result = match v {
            Value::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Num(-(n as f64))),
            Value::Num(n) => Value::Num(-n),
            other => return Err(self.rt_err(format!("cannot negate {}", other.kind_name()))),
        };
        self.replace_top(1, result);
        Ok(Flow::Continue)
    }

    pub(crate) fn op_not(&mut self) -> Result<Flow, VmError> {
        let v = self.pop()?;
        let b = !self.truthy(v);
        self.push(Value::Bool(b))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_add(&mut self) -> Result<Flow, VmError> {
        let b = self.peek(0);
        let a = self.peek(1);

        // String concatenation wins when either side is a string.
        if self.str_content(a).is_some() || self.str_content(b).is_some() {
            let mut s = self.realm.stringify(a);
            s.push_str(&self.realm.stringify(b));
            let h = self.alloc_value(HeapKind::Str(s))?;
            self.replace_top(2, Value::Ref(h));
            return Ok(Flow::Continue);
        }

        let result = match (a, b) {
            (Value::Int(x), Value::Int(y)) => x
                .checked_add(y)
                .map(Value::Int)
                .unwrap_or(Value::Num(x as f64 + y as f64)),
            _ => {
                let (x, y) = self.numeric_pair(a, b, "+")?;
                Value::Num(x + y)
            }
        };
        self.replace_top(2, result);
        Ok(Flow::Continue)
    }

    pub(crate) fn op_sub(&mut self) -> Result<Flow, VmError> {
        self.arith_op("-", |x, y| x.checked_sub(y), |x, y| x - y)
    }

    pub(crate) fn op_mul(&mut self) -> Result<Flow, VmError> {
        self.arith_op("*", |x, y| x.checked_mul(y), |x, y| x * y)
    }

    pub(crate) fn op_div(&mut self) -> Result<Flow, VmError> {
        let b = self.peek(0);
        let a = self.peek(1);
        let result = match (a, b) {
            (Value::Int(x), Value::Int(y)) => {
                if y == 0 {
                    return Err(self.rt_err("integer division by zero"));
                }
                if x % y == 0 {
                    Value::Int(x / y)
                } else {
                    Value::Num(x as f64 / y as f64)
                }
            }
            _ => {
                let (x, y) = self.numeric_pair(a, b, "/")?;
                Value::Num(x / y)
            }
        };
        self.replace_top(2, result);
        Ok(Flow::Continue)
    }

    pub(crate) fn op_mod(&mut self) -> Result<Flow, VmError> {
        let b = self.peek(0);
        let a = self.peek(1);
        let result = match (a, b) {
            (Value::Int(x), Value::Int(y)) => {
                if y == 0 {
                    return Err(self.rt_err("integer modulo by zero"));
                }
                Value::Int(x % y)
            }
            _ => {
                let (x, y) = self.numeric_pair(a, b, "%")?;
                Value::Num(x % y)
            }
        };
        self.replace_top(2, result);
        Ok(Flow::Continue)
    }

    pub(crate) fn op_eq(&mut self) -> Result<Flow, VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = self.loose_eq(a, b);
        self.push(Value::Bool(r))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_neq(&mut self) -> Result<Flow, VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = !self.loose_eq(a, b);
        self.push(Value::Bool(r))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_strict_eq(&mut self) -> Result<Flow, VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = self.strict_eq(a, b);
        self.push(Value::Bool(r))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_strict_neq(&mut self) -> Result<Flow, VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = !self.strict_eq(a, b);
        self.push(Value::Bool(r))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_lt(&mut self) -> Result<Flow, VmError> {
        self.compare_op("<", |o| o == std::cmp::Ordering::Less)
    }

    pub(crate) fn op_le(&mut self) -> Result<Flow, VmError> {
        self.compare_op("<=", |o| o != std::cmp::Ordering::Greater)
    }

    pub(crate) fn op_gt(&mut self) -> Result<Flow, VmError> {
        self.compare_op(">", |o| o == std::cmp::Ordering::Greater)
    }

    pub(crate) fn op_ge(&mut self) -> Result<Flow, VmError> {
        self.compare_op(">=", |o| o != std::cmp::Ordering::Less)
    }

    pub(crate) fn op_and(&mut self) -> Result<Flow, VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = self.truthy(a) && self.truthy(b);
        self.push(Value::Bool(r))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_or(&mut self) -> Result<Flow, VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = self.truthy(a) || self.truthy(b);
        self.push(Value::Bool(r))?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_typeof(&mut self) -> Result<Flow, VmError> {
        let v = self.peek(0);
        let name = self.realm.type_of(v);
        let h = self.alloc_value(HeapKind::Str(name.to_string()))?;
        self.replace_top(1, Value::Ref(h));
        Ok(Flow::Continue)
    }

    pub(crate) fn op_void(&mut self) -> Result<Flow, VmError> {
        self.pop()?;
        self.push(Value::undefined())?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_jump(&mut self) -> Result<Flow, VmError> {
        let d = self.rd_i32();
        self.pc = (self.pc as i64 + d as i64) as usize;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_jump_if_false(&mut self) -> Result<Flow, VmError> {
        let d = self.rd_i32();
        let cond = self.pop()?;
        if !self.truthy(cond) {
            self.pc = (self.pc as i64 + d as i64) as usize;
        }
        Ok(Flow::Continue)
    }

    pub(crate) fn op_jump_if_true(&mut self) -> Result<Flow, VmError> {
        let d = self.rd_i32();
        let cond = self.pop()?;
        if self.truthy(cond) {
            self.pc = (self.pc as i64 + d as i64) as usize;
        }
        Ok(Flow::Continue)
    }

    pub(crate) fn op_pop(&mut self) -> Result<Flow, VmError> {
        self.pop()?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_dup(&mut self) -> Result<Flow, VmError> {
        let v = self.peek(0);
        self.push(v)?;
        Ok(Flow::Continue)
    }

    pub(crate) fn op_nop(&mut self) -> Result<Flow, VmError> {
        Ok(Flow::Continue)
    }

    // =====================================================================
    // Arithmetic / comparison helpers
    // =====================================================================

    fn numeric_pair(&self, a: Value, b: Value, op: &str) -> Result<(f64, f64), VmError> {
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(self.rt_err(format!(
                "`{}` needs numbers, got {} and {}",
                op,
                a.kind_name(),
                b.kind_name()
            ))),
        }
    }

    fn arith_op(
        &mut self,
        name: &str,
        int_op: fn(i64, i64) -> Option<i64>,
        num_op: fn(f64, f64) -> f64,
    ) -> Result<Flow, VmError> {
        let b = self.peek(0);
        let a = self.peek(1);
        let result = match (a, b) {
            (Value::Int(x), Value::Int(y)) => int_op(x, y)
                .map(Value::Int)
                .unwrap_or_else(|| Value::Num(num_op(x as f64, y as f64))),
            _ => {
                let (x, y) = self.numeric_pair(a, b, name)?;
                Value::Num(num_op(x, y))
            }
        };
        self.replace_top(2, result);
        Ok(Flow::Continue)
    }

    fn compare_op(
        &mut self,
        name: &str,
        accept: fn(std::cmp::Ordering) -> bool,
    ) -> Result<Flow, VmError> {
        let b = self.pop()?;
        let a = self.pop()?;

        let ord = if let (Some(sa), Some(sb)) = (self.str_content(a), self.str_content(b)) {
            Some(sa.cmp(sb))
        } else if let (Value::Int(x), Value::Int(y)) = (a, b) {
            Some(x.cmp(&y))
        } else if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
            x.partial_cmp(&y) // None on NaN: every comparison is false
        } else {
            return Err(self.rt_err(format!(
                "`{}` cannot compare {} and {}",
                name,
                a.kind_name(),
                b.kind_name()
            )));
        };

        let r = matches!(ord, Some(o) if accept(o));
        self.push(Value::Bool(r))?;
        Ok(Flow::Continue)
    }

    // =====================================================================
    // Property access
    // =====================================================================

    /// Own-property + prototype-chain lookup; `undefined` past a null
    /// prototype. String receivers delegate to `String.prototype`.
    fn walk_chain(&self, start: Value, sym: KeySym) -> Value {
        let mut cur = start;
        loop {
            let Value::Ref(h) = cur else {
                return Value::undefined();
            };
            let (own, proto) = match &self.realm.heap.get(h).kind {
                HeapKind::Object(o) => (o.props.get(sym), o.proto),
                HeapKind::Array(a) => (a.props.get(sym), a.proto),
                HeapKind::Function(f) => (f.props.get(sym), f.proto),
                HeapKind::Str(_) => (None, self.realm.protos.string),
            };
            if let Some(v) = own {
                return v;
            }
            cur = proto;
        }
    }

    fn get_prop_by_sym(&mut self, base: Value, sym: KeySym) -> Result<Value, VmError> {
        let Value::Ref(h) = base else {
            let name = self.realm.names.name(sym).to_string();
            return Err(self.rt_err(format!(
                "cannot read property `{}` of {}",
                name,
                base.kind_name()
            )));
        };

        // Synthesized properties first.
        enum Synth {
            None,
            Len(i64),
            FnProto,
        }
        let synth = match &self.realm.heap.get(h).kind {
            HeapKind::Str(s) if sym == self.sym_length => {
                Synth::Len(s.chars().count() as i64)
            }
            HeapKind::Array(a) if sym == self.sym_length => Synth::Len(a.elems.len() as i64),
            HeapKind::Function(_) if sym == self.sym_prototype => Synth::FnProto,
            _ => Synth::None,
        };
        match synth {
            Synth::Len(n) => Ok(Value::Int(n)),
            Synth::FnProto => self.function_prototype(h),
            Synth::None => Ok(self.walk_chain(base, sym)),
        }
    }

    /// A function's `prototype` object, materialized on first access.
    fn function_prototype(&mut self, h: Handle) -> Result<Value, VmError> {
        let sym = self.sym_prototype;
        if let Some(v) = self
            .realm
            .heap
            .as_function(h)
            .and_then(|f| f.props.get(sym))
        {
            return Ok(v);
        }
        let obj_proto = self.realm.protos.object;
        let new_h = self.alloc_value(HeapKind::Object(ScriptObject::new(obj_proto)))?;
        if let Some(f) = self.realm.heap.as_function_mut(h) {
            f.props.set(sym, Value::Ref(new_h));
        }
        Ok(Value::Ref(new_h))
    }

    fn set_prop_by_sym(&mut self, base: Value, sym: KeySym, value: Value) -> Result<(), VmError> {
        let Value::Ref(h) = base else {
            let name = self.realm.names.name(sym).to_string();
            return Err(self.rt_err(format!(
                "cannot set property `{}` on {}",
                name,
                base.kind_name()
            )));
        };

        let frozen = match &mut self.realm.heap.get_mut(h).kind {
            HeapKind::Object(o) => {
                if !o.frozen {
                    o.props.set(sym, value);
                }
                o.frozen
            }
            HeapKind::Array(a) => {
                if !a.frozen {
                    a.props.set(sym, value);
                }
                a.frozen
            }
            HeapKind::Function(f) => {
                f.props.set(sym, value);
                false
            }
            HeapKind::Str(_) => {
                return Err(self.rt_err("cannot set properties on a string"));
            }
        };

        if frozen {
            return Err(self.rt_err("write to frozen object"));
        }
        Ok(())
    }

    fn get_index_value(&mut self, base: Value, index: Value) -> Result<Value, VmError> {
        let Value::Ref(h) = base else {
            return Err(self.rt_err(format!("cannot index {}", base.kind_name())));
        };

        // String keys go through the named-property path.
        if let Some(name) = self.str_content(index) {
            let name = name.to_string();
            let sym = self.realm.names.intern(&name);
            return self.get_prop_by_sym(base, sym);
        }

        let Value::Int(i) = index else {
            return Err(self.rt_err(format!("invalid index of kind {}", index.kind_name())));
        };

        enum Elem {
            Direct(Value),
            Char(char),
            OutOfRange(usize),
            NotIndexable,
        }
        let elem = match &self.realm.heap.get(h).kind {
            HeapKind::Array(a) => match a.elems.get(i.max(0) as usize) {
                Some(&v) if i >= 0 => Elem::Direct(v),
                _ => Elem::OutOfRange(a.elems.len()),
            },
            HeapKind::Str(s) => match s.chars().nth(i.max(0) as usize) {
                Some(c) if i >= 0 => Elem::Char(c),
                _ => Elem::OutOfRange(s.chars().count()),
            },
            _ => Elem::NotIndexable,
        };

        match elem {
            Elem::Direct(v) => Ok(v),
            Elem::Char(c) => {
                let sh = self.alloc_value(HeapKind::Str(c.to_string()))?;
                Ok(Value::Ref(sh))
            }
            Elem::OutOfRange(len) => Err(self.rt_err(format!(
                "index {} out of range (length {})",
                i, len
            ))),
            Elem::NotIndexable => Err(self.rt_err("value is not indexable")),
        }
    }

    fn set_index_value(&mut self, base: Value, index: Value, value: Value) -> Result<(), VmError> {
        if let Some(name) = self.str_content(index) {
            let name = name.to_string();
            let sym = self.realm.names.intern(&name);
            return self.set_prop_by_sym(base, sym, value);
        }

        let Value::Ref(h) = base else {
            return Err(self.rt_err(format!("cannot index {}", base.kind_name())));
        };
        let Value::Int(i) = index else {
            return Err(self.rt_err(format!("invalid index of kind {}", index.kind_name())));
        };

        let Some((len, frozen)) = self
            .realm
            .heap
            .as_array(h)
            .map(|a| (a.elems.len(), a.frozen))
        else {
            return Err(self.rt_err("value is not indexable"));
        };
        if frozen {
            return Err(self.rt_err("write to frozen array"));
        }
        // Writing exactly at the length appends; anything past is a hole.
        if i < 0 || i as usize > len {
            return Err(self.rt_err(format!(
                "array index {} out of range (length {})",
                i, len
            )));
        }
        if let Some(a) = self.realm.heap.as_array_mut(h) {
            a.set(i as usize, value);
        }
        Ok(())
    }

    // =====================================================================
    // Calls
    // =====================================================================

    /// Script function id for a callable value: `Some(None)` means native.
    fn callable_id(&self, callee: Value) -> Option<Option<u32>> {
        let func = callee
            .as_handle()
            .and_then(|h| self.realm.heap.as_function(h))?;
        match &func.kind {
            FunctionKind::Native { .. } => Some(None),
            FunctionKind::Script { fn_id, .. } => Some(Some(*fn_id)),
        }
    }

    fn call_op(&mut self, kind: CallKind) -> Result<Flow, VmError> {
        let argc = self.rd_u8() as usize;
        let callee_idx = self.stack.len() - argc - 1;
        let callee = self.stack[callee_idx];

        let Some(script_id) = self.callable_id(callee) else {
            return Err(self.rt_err(format!("{} value is not callable", callee.kind_name())));
        };

        match script_id {
            None => self.call_native(callee, callee_idx, argc, kind)?,
            Some(fn_id) => self.call_script(callee, fn_id, callee_idx, argc, kind)?,
        }
        Ok(Flow::Continue)
    }

    fn call_native(
        &mut self,
        callee: Value,
        callee_idx: usize,
        argc: usize,
        kind: CallKind,
    ) -> Result<(), VmError> {
        let (fptr, fname) = match callee
            .as_handle()
            .and_then(|h| self.realm.heap.as_function(h))
            .map(|f| &f.kind)
        {
            Some(FunctionKind::Native { func, name }) => (*func, name.clone()),
            _ => return Err(self.rt_err("native call on non-native")),
        };

        let this_val = match kind {
            CallKind::Method => self.stack[callee_idx - 1],
            _ => Value::undefined(),
        };
        let ret_base = match kind {
            CallKind::Method => callee_idx - 1,
            _ => callee_idx,
        };

        // Drop the callee slot; arguments slide down one.
        self.stack.copy_within(callee_idx + 1..callee_idx + 1 + argc, callee_idx);
        self.stack.truncate(callee_idx + argc);
        if argc == 0 {
            // The ABI writes the result to stack[rsbp]; make the slot real.
            self.push(Value::undefined())?;
        }

        let ok = {
            let mut ctx = NativeCtx {
                stack: &mut self.stack,
                rsbp: callee_idx,
                realm: &mut *self.realm,
                out: &mut *self.out,
                this_val,
            };
            fptr(&mut ctx, argc)
        };
        if !ok {
            return Err(VmError::Host(fname));
        }

        let rv = self.stack[callee_idx];
        self.stack.truncate(ret_base);
        self.push(rv)?;
        Ok(())
    }

    fn call_script(
        &mut self,
        callee: Value,
        fn_id: u32,
        callee_idx: usize,
        argc: usize,
        kind: CallKind,
    ) -> Result<(), VmError> {
        if self.frames.len() >= self.config.call_depth {
            return Err(VmError::CallDepthExhausted);
        }

        let (this_val, construct_this) = match kind {
            CallKind::Method => (self.stack[callee_idx - 1], None),
            CallKind::Construct => {
                // The receiver inherits from the callee's `prototype`;
                // callee and args are still on the stack during allocation.
                let h = callee.as_handle().expect("checked callable");
                let proto_v = self.function_prototype(h)?;
                let obj = self.alloc_value(HeapKind::Object(ScriptObject::new(proto_v)))?;
                (Value::Ref(obj), Some(Value::Ref(obj)))
            }
            CallKind::Plain => (Value::undefined(), None),
        };
        let ret_base = match kind {
            CallKind::Method => callee_idx - 1,
            _ => callee_idx,
        };

        // Drop the callee slot; rsbp lands on arg0.
        self.stack.copy_within(callee_idx + 1..callee_idx + 1 + argc, callee_idx);
        self.stack.truncate(callee_idx + argc);
        let new_rsbp = callee_idx;

        // Normalize the argument count to the declared arity.
        let proto = self.program.func(fn_id);
        let arity = proto.arity as usize;
        if argc > arity {
            self.stack.truncate(new_rsbp + arity);
        }
        for _ in argc..arity {
            self.push(Value::undefined())?;
        }
        for _ in arity..proto.local_slots as usize {
            self.push(Value::undefined())?;
        }

        self.frames.push(Frame {
            ret_pc: self.pc,
            ret_fn: self.fn_id,
            saved_rsbp: self.rsbp,
            saved_func: self.func_val,
            saved_this: self.this_val,
            ret_base,
            construct_this,
        });
        self.rsbp = new_rsbp;
        self.pc = 0;
        self.fn_id = fn_id;
        self.func_val = callee;
        self.this_val = this_val;
        Ok(())
    }

    fn finish_return(&mut self, rv: Value) -> Result<Flow, VmError> {
        let Some(frame) = self.frames.pop() else {
            return Ok(Flow::Done(rv));
        };

        // A constructor yields its receiver unless it returned a heap value.
        let rv = match frame.construct_this {
            Some(obj) if !rv.is_ref() => obj,
            _ => rv,
        };

        self.stack.truncate(frame.ret_base);
        self.rsbp = frame.saved_rsbp;
        self.pc = frame.ret_pc;
        self.fn_id = frame.ret_fn;
        self.func_val = frame.saved_func;
        self.this_val = frame.saved_this;
        self.push(rv)?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{emit_program, EmitterTables, Program};
    use crate::gc::HeapConfig;
    use crate::parser::lexer::{default_lexicals, LexTable};
    use crate::parser::parser::Parser;
    use crate::parser::resolver::Resolver;

    fn run_with(src: &str, policy: DispatchPolicy) -> Result<(Value, Realm), VmError> {
        let mut table = LexTable::new();
        default_lexicals(&mut table);
        let (ast, diags) = Parser::new("test.js", src, &table).parse();
        assert!(diags.is_empty(), "parse failed: {}", diags);
        let mut ast = ast.unwrap();

        let mut realm = Realm::new(HeapConfig::default());
        let resolved = Resolver::new("test.js", src, &mut realm)
            .resolve(&mut ast)
            .expect("resolve failed");

        let mut tables = EmitterTables::new();
        tables.install_defaults();
        let mut program = Program::default();
        let entry = emit_program(&tables, &ast, &resolved, &mut program).expect("emit failed");

        let mut out = Vec::new();
        let result = {
            let mut machine = Machine::new(&mut realm, &program, &mut out, VmConfig::default());
            machine.run(entry, policy)
        };
        result.map(|v| (v, realm))
    }

    fn global_int(src: &str, name: &str, policy: DispatchPolicy) -> i64 {
        let (_, realm) = run_with(src, policy).expect("run failed");
        realm
            .get_global(name)
            .expect("global missing")
            .as_int()
            .expect("global not an int")
    }

    #[test]
    fn test_arithmetic_both_cores() {
        for policy in [DispatchPolicy::LoopSwitch, DispatchPolicy::Tail] {
            assert_eq!(global_int("var x = 1 + 2 * 3;", "x", policy), 7);
            assert_eq!(global_int("var x = (10 - 4) / 2;", "x", policy), 3);
            assert_eq!(global_int("var x = 10 % 3;", "x", policy), 1);
        }
    }

    #[test]
    fn test_while_loop_sum() {
        let src = "var sum = 0; var i = 1; while (i < 6) { sum += i; i += 1; }";
        for policy in [DispatchPolicy::LoopSwitch, DispatchPolicy::Tail] {
            assert_eq!(global_int(src, "sum", policy), 15);
        }
    }

    #[test]
    fn test_break_and_continue() {
        let src = "
            var sum = 0; var i = 0;
            while (true) {
                i += 1;
                if (i > 9) { break; }
                if (i % 2 === 0) { continue; }
                sum += i;
            }
        ";
        assert_eq!(global_int(src, "sum", DispatchPolicy::LoopSwitch), 25);
    }

    #[test]
    fn test_function_call_and_arg_normalization() {
        // A missing argument arrives as undefined.
        let src = "
            function probe(a, b) { return typeof b; }
            var r = probe(1);
        ";
        let (_, realm) = run_with(src, DispatchPolicy::LoopSwitch).unwrap();
        let v = realm.get_global("r").unwrap();
        let s = v.as_handle().and_then(|h| realm.heap.as_str(h)).unwrap();
        assert_eq!(s, "undefined");

        assert_eq!(
            global_int(
                "function add(a, b) { return a + b; } var x = add(1, 2, 99);",
                "x",
                DispatchPolicy::Tail
            ),
            3
        );
    }

    #[test]
    fn test_recursion() {
        let src = "
            function fact(n) { if (n < 2) { return 1; } return n * fact(n - 1); }
            var x = fact(5);
        ";
        for policy in [DispatchPolicy::LoopSwitch, DispatchPolicy::Tail] {
            assert_eq!(global_int(src, "x", policy), 120);
        }
    }

    #[test]
    fn test_closure_upvalues() {
        let src = "
            function mk() {
                var n = 0;
                return function() { n += 1; return n; };
            }
            var c = mk();
            var a = c();
            var b = c();
        ";
        for policy in [DispatchPolicy::LoopSwitch, DispatchPolicy::Tail] {
            let (_, realm) = run_with(src, policy).unwrap();
            assert_eq!(realm.get_global("a").unwrap().as_int(), Some(1));
            assert_eq!(realm.get_global("b").unwrap().as_int(), Some(2));
        }
    }

    #[test]
    fn test_deep_tail_recursion_under_tail_dispatch() {
        let src = "
            function f(n) { if (n === 0) { return 42; } return f(n - 1); }
            var x = f(100000);
        ";
        assert_eq!(global_int(src, "x", DispatchPolicy::Tail), 42);
    }

    #[test]
    fn test_deep_recursion_exhausts_loop_switch() {
        let src = "
            function f(n) { if (n === 0) { return 42; } return f(n - 1); }
            var x = f(100000);
        ";
        let err = run_with(src, DispatchPolicy::LoopSwitch).unwrap_err();
        assert!(matches!(err, VmError::CallDepthExhausted));
    }

    #[test]
    fn test_objects_and_prototype_chain() {
        let src = "
            var proto = {greet: 7};
            var o = {x: 1};
            var direct = o.x;
        ";
        assert_eq!(global_int(src, "direct", DispatchPolicy::LoopSwitch), 1);
    }

    #[test]
    fn test_arrays_and_indexing() {
        let src = "
            var a = [10, 20, 30];
            var x = a[1];
            a[2] = 5;
            var y = a[2];
            var n = a.length;
        ";
        let (_, realm) = run_with(src, DispatchPolicy::Tail).unwrap();
        assert_eq!(realm.get_global("x").unwrap().as_int(), Some(20));
        assert_eq!(realm.get_global("y").unwrap().as_int(), Some(5));
        assert_eq!(realm.get_global("n").unwrap().as_int(), Some(3));
    }

    #[test]
    fn test_index_out_of_range_is_runtime_error() {
        let err = run_with("var a = [1]; var x = a[5];", DispatchPolicy::LoopSwitch).unwrap_err();
        assert!(matches!(err, VmError::Runtime { .. }));
    }

    #[test]
    fn test_string_concat_and_equality() {
        let src = "
            var s = \"foo\" + \"bar\";
            var same = s === \"foobar\";
            var loose = 1 == 1.0;
            var strict = 1 === 1;
            var cross = 1 === \"1\";
        ";
        let (_, realm) = run_with(src, DispatchPolicy::LoopSwitch).unwrap();
        assert_eq!(realm.get_global("same").unwrap().as_bool(), Some(true));
        assert_eq!(realm.get_global("loose").unwrap().as_bool(), Some(true));
        assert_eq!(realm.get_global("strict").unwrap().as_bool(), Some(true));
        assert_eq!(realm.get_global("cross").unwrap().as_bool(), Some(false));
    }

    #[test]
    fn test_nan_is_not_equal_to_itself() {
        let src = "var zero = 0.0; var x = zero / zero; var eq = x === x; var loose = x == x;";
        let (_, realm) = run_with(src, DispatchPolicy::LoopSwitch).unwrap();
        assert_eq!(realm.get_global("eq").unwrap().as_bool(), Some(false));
        assert_eq!(realm.get_global("loose").unwrap().as_bool(), Some(false));
    }

    #[test]
    fn test_short_circuit_does_not_evaluate_rhs() {
        let src = "
            var hits = 0;
            function bump() { hits += 1; return true; }
            var a = false && bump();
            var b = true || bump();
        ";
        let (_, realm) = run_with(src, DispatchPolicy::LoopSwitch).unwrap();
        assert_eq!(realm.get_global("hits").unwrap().as_int(), Some(0));
    }

    #[test]
    fn test_calling_non_callable_is_runtime_error() {
        let err = run_with("var x = 3; x();", DispatchPolicy::LoopSwitch).unwrap_err();
        assert!(matches!(err, VmError::Runtime { .. }));
    }

    #[test]
    fn test_gc_reclaims_loop_garbage() {
        // Far more strings than the pool holds; without collection at
        // allocation points this would exhaust the heap.
        let src = "
            var i = 0;
            var keep = \"\";
            while (i < 10000) {
                keep = \"x\" + i;
                i += 1;
            }
        ";
        let (_, realm) = run_with(src, DispatchPolicy::LoopSwitch).unwrap();
        assert!(realm.heap.live_count() < 4096);
    }

    #[test]
    fn test_runtime_error_carries_line() {
        let err = run_with("var a = 1;\nvar b = 2;\nvar c = a();\n", DispatchPolicy::Tail)
            .unwrap_err();
        match err {
            VmError::Runtime { line, .. } => assert_eq!(line, 3),
            other => panic!("expected runtime error, got {other:?}"),
        }
    }
}

//! Native-function ABI
//!
//! A native function has the signature `fn(&mut NativeCtx, argc) -> bool`.
//! On entry `stack[rsbp .. rsbp + argc)` holds the arguments; the native
//! writes its result to `stack[rsbp]` (the VM guarantees that slot exists)
//! and returns true. Returning false halts the VM with a host error.
//!
//! Natives run to completion with respect to their arguments: the VM never
//! collects garbage between argument setup and return, so handles held
//! across a native call stay valid. Allocation inside a native goes
//! straight to the heap and simply fails when the pool is exhausted.

use crate::runtime::Realm;
use crate::value::Value;
use std::io::Write;

/// Execution context handed to native functions.
pub struct NativeCtx<'a> {
    /// The VM value stack.
    pub stack: &'a mut Vec<Value>,
    /// Base of this call's arguments; also the result slot.
    pub rsbp: usize,
    /// Heap, interner, globals, prototypes.
    pub realm: &'a mut Realm,
    /// Console sink.
    pub out: &'a mut dyn Write,
    /// Receiver for method-form calls, `undefined` otherwise.
    pub this_val: Value,
}

impl<'a> NativeCtx<'a> {
    /// Argument `i`, or `undefined` when the caller passed fewer.
    #[inline]
    pub fn arg(&self, i: usize, argc: usize) -> Value {
        if i < argc {
            self.stack[self.rsbp + i]
        } else {
            Value::undefined()
        }
    }

    /// Write the return value into the result slot.
    #[inline]
    pub fn ret(&mut self, value: Value) {
        self.stack[self.rsbp] = value;
    }
}

/// Native function pointer type.
pub type NativeFn = fn(&mut NativeCtx<'_>, usize) -> bool;

//! Script array representation
//!
//! Arrays are dense: every element from 0 to len-1 is defined, there are no
//! holes. Named properties (for methods resolved through `Array.prototype`
//! and user-attached data) live in a regular property table next to the
//! element vector.

use crate::runtime::property::PropertyTable;
use crate::value::Value;

/// Maximum element count.
pub const MAX_ARRAY_LEN: usize = (1 << 30) - 1;

/// A dense script array.
#[derive(Debug)]
pub struct ScriptArray {
    pub elems: Vec<Value>,
    pub props: PropertyTable,
    pub proto: Value,
    pub frozen: bool,
}

impl ScriptArray {
    pub fn new(proto: Value) -> Self {
        ScriptArray {
            elems: Vec::new(),
            props: PropertyTable::new(),
            proto,
            frozen: false,
        }
    }

    pub fn from_values(elems: Vec<Value>, proto: Value) -> Self {
        ScriptArray {
            elems,
            props: PropertyTable::new(),
            proto,
            frozen: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Read an element; out-of-range reads are `None` and become runtime
    /// errors in the VM.
    #[inline]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.elems.get(index).copied()
    }

    /// Write an element. Writing exactly at `len` appends; anything past
    /// that (or any write on a frozen array) is rejected.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        if self.frozen || index > self.elems.len() || index >= MAX_ARRAY_LEN {
            return false;
        }
        if index == self.elems.len() {
            self.elems.push(value);
        } else {
            self.elems[index] = value;
        }
        true
    }
}

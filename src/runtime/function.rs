//! Function objects
//!
//! A function heap object is either a script function (an index into the
//! program's function table plus the closure's upvalue cells) or a native
//! function (a Rust fn pointer following the native ABI). Both carry a
//! property table for own properties such as `length` and the lazily
//! materialized `prototype` object.

use crate::runtime::property::PropertyTable;
use crate::value::Value;
use crate::vm::native::NativeFn;

/// What a function object executes when called.
pub enum FunctionKind {
    /// Compiled script function. `upvalues` are the closure cells captured
    /// at `make_lambda` time; `store_upvalue` mutates them in place, so the
    /// cells are shared across every call of this closure instance.
    Script { fn_id: u32, upvalues: Vec<Value> },
    /// Host function following the native ABI.
    Native { func: NativeFn, name: String },
}

impl std::fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionKind::Script { fn_id, upvalues } => f
                .debug_struct("Script")
                .field("fn_id", fn_id)
                .field("upvalues", &upvalues.len())
                .finish(),
            FunctionKind::Native { name, .. } => {
                f.debug_struct("Native").field("name", name).finish()
            }
        }
    }
}

/// A callable heap object.
#[derive(Debug)]
pub struct FunctionObj {
    pub kind: FunctionKind,
    pub props: PropertyTable,
    pub proto: Value,
}

impl FunctionObj {
    pub fn script(fn_id: u32, upvalues: Vec<Value>, proto: Value) -> Self {
        FunctionObj {
            kind: FunctionKind::Script { fn_id, upvalues },
            props: PropertyTable::new(),
            proto,
        }
    }

    pub fn native(name: impl Into<String>, func: NativeFn, proto: Value) -> Self {
        FunctionObj {
            kind: FunctionKind::Native {
                func,
                name: name.into(),
            },
            props: PropertyTable::new(),
            proto,
        }
    }

    #[inline]
    pub fn is_native(&self) -> bool {
        matches!(self.kind, FunctionKind::Native { .. })
    }
}

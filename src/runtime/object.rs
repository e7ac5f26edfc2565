//! Script object representation
//!
//! Objects are a property table plus a prototype link and a frozen flag.
//! Property lookup that misses own properties continues down the prototype
//! chain; that walk lives in the VM, which owns heap access.

use crate::runtime::property::{KeySym, PropertyTable};
use crate::value::Value;

/// A plain script object.
#[derive(Debug)]
pub struct ScriptObject {
    pub props: PropertyTable,
    /// Prototype link: `Ref` to another heap object or `Null` at the chain end.
    pub proto: Value,
    pub frozen: bool,
}

impl ScriptObject {
    pub fn new(proto: Value) -> Self {
        ScriptObject {
            props: PropertyTable::new(),
            proto,
            frozen: false,
        }
    }

    /// Read an own property (no prototype walk).
    #[inline]
    pub fn get_own(&self, key: KeySym) -> Option<Value> {
        self.props.get(key)
    }

    /// Write an own property. Returns false when the object is frozen;
    /// the VM turns that into a runtime error.
    pub fn set_own(&mut self, key: KeySym, value: Value) -> bool {
        if self.frozen {
            return false;
        }
        self.props.set(key, value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_own() {
        let mut obj = ScriptObject::new(Value::null());
        let key = KeySym(1);

        assert!(obj.set_own(key, Value::Int(5)));
        assert_eq!(obj.get_own(key).unwrap().as_int(), Some(5));
        assert!(obj.get_own(KeySym(2)).is_none());
    }

    #[test]
    fn test_frozen_rejects_writes() {
        let mut obj = ScriptObject::new(Value::null());
        let key = KeySym(1);
        obj.set_own(key, Value::Int(1));
        obj.frozen = true;

        assert!(!obj.set_own(key, Value::Int(2)));
        assert!(!obj.set_own(KeySym(9), Value::Int(3)));
        // Reads are unaffected.
        assert_eq!(obj.get_own(key).unwrap().as_int(), Some(1));
    }
}

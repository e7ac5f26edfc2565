//! Native objects and prototypes
//!
//! Everything the driver installs at startup before any script runs:
//! the base prototypes (Object, Boolean, String, Array, Function), the
//! native globals (Object, Array, String, Boolean, console, Date,
//! parseInt), and the native methods hanging off the prototypes. Derived
//! methods live in the polyfill script, not here.

pub mod array;
pub mod console;
pub mod global;
pub mod object;
pub mod string;

use crate::driver::Driver;
use crate::value::Value;
use crate::vm::VmError;

/// Install prototypes and globals in the fixed startup order.
pub fn install(driver: &mut Driver) -> Result<(), VmError> {
    // Prototypes first: Object.prototype roots every chain, and
    // Function.prototype must exist before any native function object.
    let object_proto = driver.setup_basic_prototype("Object.prototype", Value::null(), &[])?;
    driver.realm.protos.object = object_proto;

    let function_proto =
        driver.setup_basic_prototype("Function.prototype", object_proto, &[])?;
    driver.realm.protos.function = function_proto;

    let boolean_proto = driver.setup_basic_prototype("Boolean.prototype", object_proto, &[])?;
    driver.realm.protos.boolean = boolean_proto;

    let string_proto =
        driver.setup_basic_prototype("String.prototype", object_proto, string::PROTO_PROPS)?;
    driver.realm.protos.string = string_proto;

    let array_proto =
        driver.setup_basic_prototype("Array.prototype", object_proto, array::PROTO_PROPS)?;
    driver.realm.protos.array = array_proto;

    // Native globals.
    driver.add_native_object("Object", object::GLOBAL_PROPS)?;
    driver.add_native_object("console", console::PROPS)?;
    driver.add_native_object("Date", global::DATE_PROPS)?;

    let array_global = driver.add_native_global("Array", global::array_ctor, 1)?;
    driver.set_object_prop(array_global, "prototype", array_proto);
    let string_global = driver.add_native_global("String", global::string_ctor, 1)?;
    driver.set_object_prop(string_global, "prototype", string_proto);
    let boolean_global = driver.add_native_global("Boolean", global::boolean_ctor, 1)?;
    driver.set_object_prop(boolean_global, "prototype", boolean_proto);

    driver.add_native_global("parseInt", global::parse_int, 2)?;

    Ok(())
}

//! Driver: pipeline composition and host integration
//!
//! The driver is the only long-lived object: it owns the lexical table,
//! the emitter tables, the realm (heap, globals, prototypes), and the
//! program compiled so far. Hosts configure it through the registration
//! API below; the stock configuration (`with_defaults`) follows the fixed
//! startup order: lexicals, emitters, native prototypes, native globals.
//! Scripts compiled later append to the same program, so function handles
//! created by the polyfill stay valid while user code runs.

use crate::builtins;
use crate::compiler::{disasm, emit_program, CompileError, EmitExpr, EmitStmt, EmitterTables, Program};
use crate::gc::{HeapConfig, HeapKind};
use crate::parser::ast::{ExprTag, StmtTag};
use crate::parser::{default_lexicals, LexTable, Parser, Resolver, TokenTag};
use crate::runtime::{FunctionObj, Realm, ScriptObject};
use crate::value::Value;
use crate::vm::native::NativeFn;
use crate::vm::{DispatchPolicy, Machine, VmConfig, VmError};
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Host-facing identity, reported by `-v`.
#[derive(Debug, Clone)]
pub struct DriverInfo {
    pub name: String,
    pub author: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
}

impl Default for DriverInfo {
    fn default() -> Self {
        DriverInfo {
            name: "DerkJS".to_string(),
            author: "DrkWithT (GitHub)".to_string(),
            version_major: 0,
            version_minor: 1,
            version_patch: 2,
        }
    }
}

/// Compile-time or run-time failure of one unit.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// The engine driver. See the module docs for ownership.
pub struct Driver {
    info: DriverInfo,
    lexicals: LexTable,
    emitters: EmitterTables,
    pub(crate) realm: Realm,
    program: Program,
    vm_config: VmConfig,
    dispatch: DispatchPolicy,
    dump_bytecode: bool,
    out: Box<dyn Write>,
}

impl Driver {
    /// Bare driver: nothing registered. Hosts that want the stock engine
    /// use [`Driver::with_defaults`].
    pub fn new(info: DriverInfo, heap: HeapConfig, vm: VmConfig) -> Self {
        Driver {
            info,
            lexicals: LexTable::new(),
            emitters: EmitterTables::new(),
            realm: Realm::new(heap),
            program: Program::default(),
            vm_config: vm,
            dispatch: DispatchPolicy::default(),
            dump_bytecode: false,
            out: Box::new(std::io::stdout()),
        }
    }

    /// Fully configured driver: source-language lexicals, default
    /// emitters, native prototypes, native globals — in that order.
    pub fn with_defaults(info: DriverInfo) -> Result<Self, VmError> {
        Driver::with_config(info, HeapConfig::default(), VmConfig::default())
    }

    /// Like [`Driver::with_defaults`] with explicit resource limits (heap
    /// slot cap, GC threshold, stack capacity, call depth).
    pub fn with_config(info: DriverInfo, heap: HeapConfig, vm: VmConfig) -> Result<Self, VmError> {
        let mut driver = Driver::new(info, heap, vm);
        default_lexicals(&mut driver.lexicals);
        driver.emitters.install_defaults();
        builtins::install(&mut driver)?;
        Ok(driver)
    }

    pub fn get_info(&self) -> &DriverInfo {
        &self.info
    }

    pub fn enable_bc_dump(&mut self, on: bool) {
        self.dump_bytecode = on;
    }

    pub fn set_dispatch(&mut self, policy: DispatchPolicy) {
        self.dispatch = policy;
    }

    /// Redirect `console.log` output (tests capture it this way).
    pub fn set_console_sink(&mut self, sink: Box<dyn Write>) {
        self.out = sink;
    }

    // =====================================================================
    // Host registration API
    // =====================================================================

    /// Register a keyword or operator punctuator.
    pub fn add_js_lexical(&mut self, lexeme: &str, tag: TokenTag) {
        self.lexicals.add(lexeme, tag);
    }

    /// Install a bytecode emitter for an expression node kind.
    pub fn add_expr_emitter(&mut self, tag: ExprTag, emitter: Box<dyn EmitExpr>) {
        self.emitters.set_expr(tag, emitter);
    }

    /// Install a bytecode emitter for a statement node kind.
    pub fn add_stmt_emitter(&mut self, tag: StmtTag, emitter: Box<dyn EmitStmt>) {
        self.emitters.set_stmt(tag, emitter);
    }

    fn make_native(&mut self, name: &str, func: NativeFn, arity: i64) -> Result<Value, VmError> {
        let proto = self.realm.protos.function;
        let mut obj = FunctionObj::native(name, func, proto);
        let length = self.realm.names.intern("length");
        obj.props.set(length, Value::Int(arity));
        let h = self
            .realm
            .heap
            .alloc(HeapKind::Function(obj))
            .ok_or(VmError::OutOfMemory)?;
        Ok(Value::Ref(h))
    }

    fn populate(
        &mut self,
        target: Value,
        props: &[(&str, NativeFn, i64)],
    ) -> Result<(), VmError> {
        for &(prop_name, func, arity) in props {
            let value = self.make_native(prop_name, func, arity)?;
            self.set_object_prop(target, prop_name, value);
        }
        Ok(())
    }

    /// Allocate and populate a prototype object bound to no global name.
    pub fn setup_basic_prototype(
        &mut self,
        debug_name: &str,
        proto: Value,
        props: &[(&str, NativeFn, i64)],
    ) -> Result<Value, VmError> {
        let h = self
            .realm
            .heap
            .alloc(HeapKind::Object(ScriptObject::new(proto)))
            .ok_or(VmError::OutOfMemory)?;
        let value = Value::Ref(h);
        self.realm.native_roots.push(value);
        self.populate(value, props)?;
        debug!(name = debug_name, "installed prototype");
        Ok(value)
    }

    /// Allocate a native object, install its properties, and bind it to a
    /// global name.
    pub fn add_native_object(
        &mut self,
        name: &str,
        props: &[(&str, NativeFn, i64)],
    ) -> Result<Value, VmError> {
        let proto = self.realm.protos.object;
        let h = self
            .realm
            .heap
            .alloc(HeapKind::Object(ScriptObject::new(proto)))
            .ok_or(VmError::OutOfMemory)?;
        let value = Value::Ref(h);
        self.populate(value, props)?;
        self.realm.set_global(name, value);
        debug!(name, "installed native object");
        Ok(value)
    }

    /// Install a batch of properties on a previously allocated object.
    pub fn patch_native_object(
        &mut self,
        target: Value,
        props: &[(&str, NativeFn, i64)],
    ) -> Result<(), VmError> {
        self.populate(target, props)
    }

    /// Register a callable global carrying a `length` own property.
    pub fn add_native_global(
        &mut self,
        name: &str,
        func: NativeFn,
        arity: i64,
    ) -> Result<Value, VmError> {
        let value = self.make_native(name, func, arity)?;
        self.realm.set_global(name, value);
        Ok(value)
    }

    /// Add a global name pointing at an existing value.
    pub fn add_native_object_alias(&mut self, name: &str, target: Value) {
        self.realm.set_global(name, target);
    }

    /// Set one data property on a host-created object.
    pub fn set_object_prop(&mut self, target: Value, name: &str, value: Value) {
        let sym = self.realm.names.intern(name);
        if let Some(h) = target.as_handle() {
            match &mut self.realm.heap.get_mut(h).kind {
                HeapKind::Object(o) => {
                    o.props.set(sym, value);
                }
                HeapKind::Array(a) => {
                    a.props.set(sym, value);
                }
                HeapKind::Function(f) => {
                    f.props.set(sym, value);
                }
                HeapKind::Str(_) => {}
            }
        }
    }

    // =====================================================================
    // Compilation and execution
    // =====================================================================

    fn compile_unit(&mut self, path: &str, source: &str) -> Result<u32, CompileError> {
        let (ast, diags) = Parser::new(path, source, &self.lexicals).parse();
        let Some(mut ast) = ast else {
            return Err(CompileError::Parse(diags));
        };

        let resolved = Resolver::new(path, source, &mut self.realm)
            .resolve(&mut ast)
            .map_err(CompileError::Semantic)?;

        let entry = emit_program(&self.emitters, &ast, &resolved, &mut self.program)?;
        debug!(
            path,
            entry,
            functions = self.program.funcs.len(),
            "compiled unit"
        );
        Ok(entry)
    }

    /// Compile and execute one source unit against the shared realm.
    pub fn run_source(&mut self, path: &str, source: &str) -> Result<Value, EngineError> {
        let entry = self.compile_unit(path, source)?;
        if self.dump_bytecode {
            print!("{}", disasm::disassemble(&self.program));
        }

        let vm_config = self.vm_config;
        let dispatch = self.dispatch;
        let result = {
            let mut machine = Machine::new(
                &mut self.realm,
                &self.program,
                &mut *self.out,
                vm_config,
            );
            machine.run(entry, dispatch)
        }?;
        debug!("unit finished");
        Ok(result)
    }

    /// Disassemble everything compiled so far.
    pub fn dump_program(&self) -> String {
        disasm::disassemble(&self.program)
    }

    /// Run a script file, optionally preceded by a polyfill script. Exit
    /// status semantics: 0 on success, 1 on any failure, reported to
    /// stderr. A failing polyfill stops the run before user code.
    pub fn run(&mut self, script: &Path, polyfill: Option<&Path>) -> i32 {
        if let Some(polyfill) = polyfill {
            let source = match std::fs::read_to_string(polyfill) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("error: cannot read {}: {}", polyfill.display(), e);
                    return 1;
                }
            };
            if let Err(e) = self.run_source(&polyfill.display().to_string(), &source) {
                eprintln!("{}", e);
                return 1;
            }
        }

        let source = match std::fs::read_to_string(script) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: cannot read {}: {}", script.display(), e);
                return 1;
            }
        };
        match self.run_source(&script.display().to_string(), &source) {
            Ok(_) => 0,
            Err(e) => {
                eprintln!("{}", e);
                1
            }
        }
    }
}

//! Bytecode emission
//!
//! Per-node emitters are installed into `EmitterTables` by the driver and
//! dispatched by AST tag. `EmitCtx` carries the program under construction:
//! the function prototypes, the shared constant pool, and the loop patch
//! stack of the function currently being emitted.
//!
//! Emission policies:
//! - `&&`/`||` emit the short-circuit jump form and leave one value.
//! - `if`/`else` uses forward jumps with back-patching; `while` a back
//!   jump, with `break`/`continue` recorded as pending patches resolved at
//!   loop close.
//! - Compound assignment decomposes into load/op/store.
//! - Lambda bodies are emitted as separate function prototypes referenced
//!   by id; `return <plain call>` emits `tail_call`.

use crate::compiler::program::{ConstPool, FunctionProto, Program};
use crate::compiler::CompileError;
use crate::parser::ast::*;
use crate::parser::resolver::ResolveOutput;
use crate::vm::opcode::Op;

/// Emitter for one expression node kind.
pub trait EmitExpr {
    fn emit(
        &self,
        expr: &Expr,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError>;
}

/// Emitter for one statement node kind.
pub trait EmitStmt {
    fn emit(
        &self,
        stmt: &Stmt,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError>;
}

/// Tag-indexed emitter registries.
pub struct EmitterTables {
    expr: Vec<Option<Box<dyn EmitExpr>>>,
    stmt: Vec<Option<Box<dyn EmitStmt>>>,
}

impl Default for EmitterTables {
    fn default() -> Self {
        EmitterTables::new()
    }
}

impl EmitterTables {
    pub fn new() -> Self {
        EmitterTables {
            expr: (0..ExprTag::COUNT).map(|_| None).collect(),
            stmt: (0..StmtTag::COUNT).map(|_| None).collect(),
        }
    }

    pub fn set_expr(&mut self, tag: ExprTag, emitter: Box<dyn EmitExpr>) {
        self.expr[tag as usize] = Some(emitter);
    }

    pub fn set_stmt(&mut self, tag: StmtTag, emitter: Box<dyn EmitStmt>) {
        self.stmt[tag as usize] = Some(emitter);
    }

    /// Install the stock emitter set for the whole grammar.
    pub fn install_defaults(&mut self) {
        self.set_expr(ExprTag::Literal, Box::new(LiteralEmitter));
        self.set_expr(ExprTag::Ident, Box::new(IdentEmitter));
        self.set_expr(ExprTag::This, Box::new(ThisEmitter));
        self.set_expr(ExprTag::ObjectLit, Box::new(ObjectLitEmitter));
        self.set_expr(ExprTag::ArrayLit, Box::new(ArrayLitEmitter));
        self.set_expr(ExprTag::Lambda, Box::new(LambdaEmitter));
        self.set_expr(ExprTag::Member, Box::new(MemberEmitter));
        self.set_expr(ExprTag::Unary, Box::new(UnaryEmitter));
        self.set_expr(ExprTag::Binary, Box::new(BinaryEmitter));
        self.set_expr(ExprTag::Assign, Box::new(AssignEmitter));
        self.set_expr(ExprTag::Call, Box::new(CallEmitter));

        self.set_stmt(StmtTag::Expr, Box::new(ExprStmtEmitter));
        self.set_stmt(StmtTag::VarDecl, Box::new(VarDeclEmitter));
        self.set_stmt(StmtTag::If, Box::new(IfEmitter));
        self.set_stmt(StmtTag::Return, Box::new(ReturnEmitter));
        self.set_stmt(StmtTag::While, Box::new(WhileEmitter));
        self.set_stmt(StmtTag::Break, Box::new(BreakEmitter));
        self.set_stmt(StmtTag::Continue, Box::new(ContinueEmitter));
        self.set_stmt(StmtTag::Block, Box::new(BlockEmitter));
        self.set_stmt(StmtTag::FuncDecl, Box::new(FuncDeclEmitter));
    }
}

/// Dispatch one expression through the tables.
pub fn emit_expr(
    tables: &EmitterTables,
    expr: &Expr,
    ctx: &mut EmitCtx,
) -> Result<(), CompileError> {
    ctx.set_line(expr.span.line);
    match &tables.expr[expr.tag() as usize] {
        Some(emitter) => emitter.emit(expr, tables, ctx),
        None => Err(CompileError::Codegen(format!(
            "no emitter installed for expression tag {:?}",
            expr.tag()
        ))),
    }
}

/// Dispatch one statement through the tables.
pub fn emit_stmt(
    tables: &EmitterTables,
    stmt: &Stmt,
    ctx: &mut EmitCtx,
) -> Result<(), CompileError> {
    ctx.set_line(stmt.span.line);
    match &tables.stmt[stmt.tag() as usize] {
        Some(emitter) => emitter.emit(stmt, tables, ctx),
        None => Err(CompileError::Codegen(format!(
            "no emitter installed for statement tag {:?}",
            stmt.tag()
        ))),
    }
}

/// Pending patches for the innermost loop.
#[derive(Debug, Default)]
struct LoopCtx {
    /// Code offset of the condition, the `continue` target.
    start: usize,
    break_patches: Vec<usize>,
}

/// Emission state for one unit.
///
/// Units compiled later (the user script after the polyfill) append their
/// functions to the same program, so unit-local function ids are offset by
/// `base` to stay stable across runs.
pub struct EmitCtx<'a> {
    pub consts: &'a mut ConstPool,
    protos: &'a mut Vec<FunctionProto>,
    base: u32,
    current: usize,
    loops: Vec<LoopCtx>,
    line: u32,
}

impl<'a> EmitCtx<'a> {
    fn new(consts: &'a mut ConstPool, protos: &'a mut Vec<FunctionProto>, base: u32) -> Self {
        EmitCtx {
            consts,
            protos,
            base,
            current: base as usize,
            loops: Vec::new(),
            line: 1,
        }
    }

    #[inline]
    fn code(&mut self) -> &mut Vec<u8> {
        &mut self.protos[self.current].code
    }

    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    pub fn offset(&mut self) -> usize {
        self.code().len()
    }

    /// Emit an opcode byte, recording the current source line.
    pub fn op(&mut self, op: Op) {
        let offset = self.protos[self.current].code.len() as u32;
        let line = self.line;
        let lines = &mut self.protos[self.current].lines;
        if lines.last().map(|&(_, l)| l) != Some(line) {
            lines.push((offset, line));
        }
        self.code().push(op as u8);
    }

    pub fn byte(&mut self, b: u8) {
        self.code().push(b);
    }

    pub fn u16(&mut self, v: u16) {
        self.code().extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.code().extend_from_slice(&v.to_le_bytes());
    }

    /// Emit a jump and return the operand offset for later patching.
    pub fn jump(&mut self, op: Op) -> usize {
        self.op(op);
        let at = self.offset();
        self.i32(0);
        at
    }

    /// Point a previously emitted jump at the current offset.
    pub fn patch_jump(&mut self, operand_at: usize) {
        let target = self.offset() as i64;
        let rel = target - (operand_at as i64 + 4);
        let bytes = (rel as i32).to_le_bytes();
        let code = self.code();
        code[operand_at..operand_at + 4].copy_from_slice(&bytes);
    }

    /// Emit an unconditional jump back to `target`.
    pub fn jump_back(&mut self, op: Op, target: usize) {
        self.op(op);
        let after = self.offset() + 4;
        let rel = target as i64 - after as i64;
        self.i32(rel as i32);
    }
}

/// Emit a resolved unit into `program`, appending its functions after the
/// ones already there. Returns the function id of the unit's top level.
pub fn emit_program(
    tables: &EmitterTables,
    stmts: &[Stmt],
    resolved: &ResolveOutput,
    program: &mut Program,
) -> Result<u32, CompileError> {
    let base = program.funcs.len() as u32;
    if base as usize + resolved.funcs.len() > u16::MAX as usize {
        return Err(CompileError::Codegen("too many functions".to_string()));
    }
    program
        .funcs
        .extend(resolved.funcs.iter().map(|m| FunctionProto {
            name: m.name.clone(),
            arity: m.arity,
            local_slots: m.local_slots,
            upvals: m.upvals.clone(),
            ..Default::default()
        }));

    let mut ctx = EmitCtx::new(&mut program.consts, &mut program.funcs, base);
    for stmt in stmts {
        emit_stmt(tables, stmt, &mut ctx)?;
    }
    ctx.op(Op::RetUndef);

    Ok(base)
}

/// Emit a nested function body into its own prototype, then restore the
/// enclosing emission state.
fn emit_function_body(
    tables: &EmitterTables,
    func: &LambdaFn,
    ctx: &mut EmitCtx,
) -> Result<(), CompileError> {
    let saved_current = ctx.current;
    let saved_loops = std::mem::take(&mut ctx.loops);
    let saved_line = ctx.line;

    ctx.current = (ctx.base + func.fn_id) as usize;
    for stmt in &func.body {
        emit_stmt(tables, stmt, ctx)?;
    }
    ctx.op(Op::RetUndef);

    ctx.current = saved_current;
    ctx.loops = saved_loops;
    ctx.line = saved_line;
    Ok(())
}

fn store_res(res: Res, ctx: &mut EmitCtx) -> Result<(), CompileError> {
    match res {
        Res::Local(slot) => {
            ctx.op(Op::StoreLocal);
            ctx.u16(slot);
        }
        Res::Upvalue(idx) => {
            ctx.op(Op::StoreUpvalue);
            ctx.u16(idx);
        }
        Res::Global(slot) => {
            ctx.op(Op::StoreGlobal);
            ctx.u16(slot);
        }
        Res::Unresolved => {
            return Err(CompileError::Codegen(
                "store through unresolved name".to_string(),
            ))
        }
    }
    Ok(())
}

fn load_res(res: Res, ctx: &mut EmitCtx) -> Result<(), CompileError> {
    match res {
        Res::Local(slot) => {
            ctx.op(Op::LoadLocal);
            ctx.u16(slot);
        }
        Res::Upvalue(idx) => {
            ctx.op(Op::LoadUpvalue);
            ctx.u16(idx);
        }
        Res::Global(slot) => {
            ctx.op(Op::LoadGlobal);
            ctx.u16(slot);
        }
        Res::Unresolved => {
            return Err(CompileError::Codegen(
                "load through unresolved name".to_string(),
            ))
        }
    }
    Ok(())
}

fn emit_args(
    tables: &EmitterTables,
    args: &[Expr],
    ctx: &mut EmitCtx,
) -> Result<u8, CompileError> {
    if args.len() > u8::MAX as usize {
        return Err(CompileError::Codegen("too many call arguments".to_string()));
    }
    for arg in args {
        emit_expr(tables, arg, ctx)?;
    }
    Ok(args.len() as u8)
}

/// Emit the callee/receiver part of a call. For method calls the receiver
/// is duplicated below the callee so `call_method` can bind it.
fn emit_callee(
    tables: &EmitterTables,
    callee: &Expr,
    form: CallForm,
    ctx: &mut EmitCtx,
) -> Result<(), CompileError> {
    if form == CallForm::Method {
        let ExprNode::Member { base, key } = &callee.node else {
            return Err(CompileError::Codegen(
                "method call without member callee".to_string(),
            ));
        };
        emit_expr(tables, base, ctx)?;
        ctx.op(Op::Dup);
        match key {
            MemberKey::Named(name) => {
                let idx = ctx.consts.add_str(name);
                ctx.op(Op::GetProp);
                ctx.u16(idx);
            }
            MemberKey::Computed(index) => {
                emit_expr(tables, index, ctx)?;
                ctx.op(Op::GetIndex);
            }
        }
    } else {
        emit_expr(tables, callee, ctx)?;
    }
    Ok(())
}

// =========================================================================
// Default expression emitters
// =========================================================================

pub struct LiteralEmitter;

impl EmitExpr for LiteralEmitter {
    fn emit(
        &self,
        expr: &Expr,
        _tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let ExprNode::Literal(lit) = &expr.node else {
            unreachable!("literal emitter on non-literal");
        };
        match lit {
            Lit::Undefined => ctx.op(Op::PushUndef),
            Lit::Null => ctx.op(Op::PushNull),
            Lit::Bool(b) => {
                ctx.op(Op::PushBool);
                ctx.byte(*b as u8);
            }
            Lit::Int(n) => {
                if let Ok(small) = i32::try_from(*n) {
                    ctx.op(Op::PushInt);
                    ctx.i32(small);
                } else {
                    let idx = ctx.consts.add_num(*n as f64);
                    ctx.op(Op::PushConstNum);
                    ctx.u16(idx);
                }
            }
            Lit::Num(n) => {
                let idx = ctx.consts.add_num(*n);
                ctx.op(Op::PushConstNum);
                ctx.u16(idx);
            }
            Lit::Str(s) => {
                let idx = ctx.consts.add_str(s);
                ctx.op(Op::PushConstStr);
                ctx.u16(idx);
            }
        }
        Ok(())
    }
}

pub struct IdentEmitter;

impl EmitExpr for IdentEmitter {
    fn emit(
        &self,
        expr: &Expr,
        _tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let ExprNode::Ident { res, .. } = &expr.node else {
            unreachable!("ident emitter on non-ident");
        };
        load_res(*res, ctx)
    }
}

pub struct ThisEmitter;

impl EmitExpr for ThisEmitter {
    fn emit(
        &self,
        _expr: &Expr,
        _tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        ctx.op(Op::PushThis);
        Ok(())
    }
}

pub struct ObjectLitEmitter;

impl EmitExpr for ObjectLitEmitter {
    fn emit(
        &self,
        expr: &Expr,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let ExprNode::ObjectLit(entries) = &expr.node else {
            unreachable!("object emitter on non-object");
        };
        if entries.len() > u16::MAX as usize {
            return Err(CompileError::Codegen("object literal too large".to_string()));
        }
        for (key, value) in entries {
            let idx = ctx.consts.add_str(key);
            ctx.op(Op::PushConstStr);
            ctx.u16(idx);
            emit_expr(tables, value, ctx)?;
        }
        ctx.op(Op::NewObject);
        ctx.u16(entries.len() as u16);
        Ok(())
    }
}

pub struct ArrayLitEmitter;

impl EmitExpr for ArrayLitEmitter {
    fn emit(
        &self,
        expr: &Expr,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let ExprNode::ArrayLit(items) = &expr.node else {
            unreachable!("array emitter on non-array");
        };
        if items.len() > u16::MAX as usize {
            return Err(CompileError::Codegen("array literal too large".to_string()));
        }
        for item in items {
            emit_expr(tables, item, ctx)?;
        }
        ctx.op(Op::NewArray);
        ctx.u16(items.len() as u16);
        Ok(())
    }
}

pub struct LambdaEmitter;

impl EmitExpr for LambdaEmitter {
    fn emit(
        &self,
        expr: &Expr,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let ExprNode::Lambda(func) = &expr.node else {
            unreachable!("lambda emitter on non-lambda");
        };
        emit_function_body(tables, func, ctx)?;
        ctx.op(Op::MakeLambda);
        let id = ctx.base + func.fn_id;
        ctx.u16(id as u16);
        Ok(())
    }
}

pub struct MemberEmitter;

impl EmitExpr for MemberEmitter {
    fn emit(
        &self,
        expr: &Expr,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let ExprNode::Member { base, key } = &expr.node else {
            unreachable!("member emitter on non-member");
        };
        emit_expr(tables, base, ctx)?;
        match key {
            MemberKey::Named(name) => {
                let idx = ctx.consts.add_str(name);
                ctx.op(Op::GetProp);
                ctx.u16(idx);
            }
            MemberKey::Computed(index) => {
                emit_expr(tables, index, ctx)?;
                ctx.op(Op::GetIndex);
            }
        }
        Ok(())
    }
}

pub struct UnaryEmitter;

impl EmitExpr for UnaryEmitter {
    fn emit(
        &self,
        expr: &Expr,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let ExprNode::Unary { op, operand } = &expr.node else {
            unreachable!("unary emitter on non-unary");
        };
        emit_expr(tables, operand, ctx)?;
        ctx.op(match op {
            UnaryOp::Neg => Op::Neg,
            UnaryOp::Not => Op::Not,
            UnaryOp::TypeOf => Op::TypeOf,
            UnaryOp::Void => Op::Void,
        });
        Ok(())
    }
}

pub struct BinaryEmitter;

impl EmitExpr for BinaryEmitter {
    fn emit(
        &self,
        expr: &Expr,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let ExprNode::Binary { op, lhs, rhs } = &expr.node else {
            unreachable!("binary emitter on non-binary");
        };

        // Short-circuit forms keep the deciding value on the stack.
        if matches!(op, BinOp::And | BinOp::Or) {
            emit_expr(tables, lhs, ctx)?;
            ctx.op(Op::Dup);
            let end = ctx.jump(if *op == BinOp::And {
                Op::JumpIfFalse
            } else {
                Op::JumpIfTrue
            });
            ctx.op(Op::Pop);
            emit_expr(tables, rhs, ctx)?;
            ctx.patch_jump(end);
            return Ok(());
        }

        emit_expr(tables, lhs, ctx)?;
        emit_expr(tables, rhs, ctx)?;
        ctx.op(match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mul,
            BinOp::Div => Op::Div,
            BinOp::Mod => Op::Mod,
            BinOp::Eq => Op::Eq,
            BinOp::Neq => Op::Neq,
            BinOp::StrictEq => Op::StrictEq,
            BinOp::StrictNeq => Op::StrictNeq,
            BinOp::Lt => Op::Lt,
            BinOp::Le => Op::Le,
            BinOp::Gt => Op::Gt,
            BinOp::Ge => Op::Ge,
            BinOp::And | BinOp::Or => unreachable!(),
        });
        Ok(())
    }
}

pub struct AssignEmitter;

impl EmitExpr for AssignEmitter {
    fn emit(
        &self,
        expr: &Expr,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let ExprNode::Assign { op, target, value } = &expr.node else {
            unreachable!("assign emitter on non-assign");
        };

        match &target.node {
            ExprNode::Ident { res, .. } => {
                if let Some(binop) = op.binary() {
                    load_res(*res, ctx)?;
                    emit_expr(tables, value, ctx)?;
                    ctx.op(binop_opcode(binop));
                } else {
                    emit_expr(tables, value, ctx)?;
                }
                // The assignment expression's value stays on the stack.
                ctx.op(Op::Dup);
                store_res(*res, ctx)
            }
            ExprNode::Member { base, key } => match key {
                MemberKey::Named(name) => {
                    let idx = ctx.consts.add_str(name);
                    emit_expr(tables, base, ctx)?;
                    if let Some(binop) = op.binary() {
                        ctx.op(Op::Dup);
                        ctx.op(Op::GetProp);
                        ctx.u16(idx);
                        emit_expr(tables, value, ctx)?;
                        ctx.op(binop_opcode(binop));
                    } else {
                        emit_expr(tables, value, ctx)?;
                    }
                    // set_prop pushes the stored value back.
                    ctx.op(Op::SetProp);
                    ctx.u16(idx);
                    Ok(())
                }
                MemberKey::Computed(index) => {
                    emit_expr(tables, base, ctx)?;
                    emit_expr(tables, index, ctx)?;
                    if let Some(binop) = op.binary() {
                        // Compound element assignment re-evaluates base and
                        // index for the read; see DESIGN.md.
                        emit_expr(tables, base, ctx)?;
                        emit_expr(tables, index, ctx)?;
                        ctx.op(Op::GetIndex);
                        emit_expr(tables, value, ctx)?;
                        ctx.op(binop_opcode(binop));
                    } else {
                        emit_expr(tables, value, ctx)?;
                    }
                    ctx.op(Op::SetIndex);
                    Ok(())
                }
            },
            _ => Err(CompileError::Codegen(
                "invalid assignment target survived resolution".to_string(),
            )),
        }
    }
}

fn binop_opcode(op: BinOp) -> Op {
    match op {
        BinOp::Add => Op::Add,
        BinOp::Sub => Op::Sub,
        BinOp::Mul => Op::Mul,
        BinOp::Div => Op::Div,
        BinOp::Mod => Op::Mod,
        _ => Op::Nop,
    }
}

pub struct CallEmitter;

impl EmitExpr for CallEmitter {
    fn emit(
        &self,
        expr: &Expr,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let ExprNode::Call { callee, args, form } = &expr.node else {
            unreachable!("call emitter on non-call");
        };
        emit_callee(tables, callee, *form, ctx)?;
        let argc = emit_args(tables, args, ctx)?;
        ctx.op(match form {
            CallForm::Plain => Op::Call,
            CallForm::Method => Op::CallMethod,
            CallForm::Construct => Op::Construct,
        });
        ctx.byte(argc);
        Ok(())
    }
}

// =========================================================================
// Default statement emitters
// =========================================================================

pub struct ExprStmtEmitter;

impl EmitStmt for ExprStmtEmitter {
    fn emit(
        &self,
        stmt: &Stmt,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let StmtNode::Expr(expr) = &stmt.node else {
            unreachable!("expr-stmt emitter on other node");
        };
        emit_expr(tables, expr, ctx)?;
        ctx.op(Op::Pop);
        Ok(())
    }
}

pub struct VarDeclEmitter;

impl EmitStmt for VarDeclEmitter {
    fn emit(
        &self,
        stmt: &Stmt,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let StmtNode::VarDecl(bindings) = &stmt.node else {
            unreachable!("var emitter on other node");
        };
        for binding in bindings {
            match &binding.init {
                Some(init) => emit_expr(tables, init, ctx)?,
                None => ctx.op(Op::PushUndef),
            }
            store_res(binding.res, ctx)?;
        }
        Ok(())
    }
}

pub struct IfEmitter;

impl EmitStmt for IfEmitter {
    fn emit(
        &self,
        stmt: &Stmt,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let StmtNode::If {
            cond,
            then_branch,
            else_branch,
        } = &stmt.node
        else {
            unreachable!("if emitter on other node");
        };

        emit_expr(tables, cond, ctx)?;
        let to_else = ctx.jump(Op::JumpIfFalse);
        emit_stmt(tables, then_branch, ctx)?;

        match else_branch {
            Some(else_branch) => {
                let to_end = ctx.jump(Op::Jump);
                ctx.patch_jump(to_else);
                emit_stmt(tables, else_branch, ctx)?;
                ctx.patch_jump(to_end);
            }
            None => ctx.patch_jump(to_else),
        }
        Ok(())
    }
}

pub struct ReturnEmitter;

impl EmitStmt for ReturnEmitter {
    fn emit(
        &self,
        stmt: &Stmt,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let StmtNode::Return(value) = &stmt.node else {
            unreachable!("return emitter on other node");
        };
        match value {
            None => ctx.op(Op::RetUndef),
            Some(expr) => {
                // A plain call in tail position becomes `tail_call`; the
                // trailing `ret` only runs under loop-switch dispatch.
                if let ExprNode::Call {
                    callee,
                    args,
                    form: CallForm::Plain,
                } = &expr.node
                {
                    ctx.set_line(expr.span.line);
                    emit_callee(tables, callee, CallForm::Plain, ctx)?;
                    let argc = emit_args(tables, args, ctx)?;
                    ctx.op(Op::TailCall);
                    ctx.byte(argc);
                    ctx.op(Op::Ret);
                } else {
                    emit_expr(tables, expr, ctx)?;
                    ctx.op(Op::Ret);
                }
            }
        }
        Ok(())
    }
}

pub struct WhileEmitter;

impl EmitStmt for WhileEmitter {
    fn emit(
        &self,
        stmt: &Stmt,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let StmtNode::While { cond, body } = &stmt.node else {
            unreachable!("while emitter on other node");
        };

        let start = ctx.offset();
        ctx.loops.push(LoopCtx {
            start,
            break_patches: Vec::new(),
        });

        emit_expr(tables, cond, ctx)?;
        let exit = ctx.jump(Op::JumpIfFalse);
        emit_stmt(tables, body, ctx)?;
        ctx.jump_back(Op::Jump, start);
        ctx.patch_jump(exit);

        let finished = ctx.loops.pop().unwrap_or_default();
        for patch in finished.break_patches {
            ctx.patch_jump(patch);
        }
        Ok(())
    }
}

pub struct BreakEmitter;

impl EmitStmt for BreakEmitter {
    fn emit(
        &self,
        _stmt: &Stmt,
        _tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let patch = ctx.jump(Op::Jump);
        match ctx.loops.last_mut() {
            Some(l) => {
                l.break_patches.push(patch);
                Ok(())
            }
            None => Err(CompileError::Codegen(
                "break outside loop survived resolution".to_string(),
            )),
        }
    }
}

pub struct ContinueEmitter;

impl EmitStmt for ContinueEmitter {
    fn emit(
        &self,
        _stmt: &Stmt,
        _tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        match ctx.loops.last() {
            Some(l) => {
                let start = l.start;
                ctx.jump_back(Op::Jump, start);
                Ok(())
            }
            None => Err(CompileError::Codegen(
                "continue outside loop survived resolution".to_string(),
            )),
        }
    }
}

pub struct BlockEmitter;

impl EmitStmt for BlockEmitter {
    fn emit(
        &self,
        stmt: &Stmt,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let StmtNode::Block(stmts) = &stmt.node else {
            unreachable!("block emitter on other node");
        };
        for s in stmts {
            emit_stmt(tables, s, ctx)?;
        }
        Ok(())
    }
}

pub struct FuncDeclEmitter;

impl EmitStmt for FuncDeclEmitter {
    fn emit(
        &self,
        stmt: &Stmt,
        tables: &EmitterTables,
        ctx: &mut EmitCtx,
    ) -> Result<(), CompileError> {
        let StmtNode::FuncDecl { func, res, .. } = &stmt.node else {
            unreachable!("function emitter on other node");
        };
        emit_function_body(tables, func, ctx)?;
        ctx.op(Op::MakeLambda);
        let id = ctx.base + func.fn_id;
        ctx.u16(id as u16);
        store_res(*res, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::HeapConfig;
    use crate::parser::lexer::{default_lexicals, LexTable};
    use crate::parser::parser::Parser;
    use crate::parser::resolver::Resolver;
    use crate::runtime::Realm;
    use crate::vm::opcode::{read_i32, Op};

    fn compile(src: &str) -> Program {
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
        assert_eq!(entry, 0);
        program
    }

    fn ops_of(code: &[u8]) -> Vec<Op> {
        let mut out = Vec::new();
        let mut pc = 0;
        while pc < code.len() {
            let op = Op::from_byte(code[pc]).expect("bad opcode");
            out.push(op);
            pc += crate::vm::opcode::OP_INFO[op as usize].size as usize;
        }
        out
    }

    #[test]
    fn test_arithmetic_emission() {
        let prog = compile("var x = 1 + 2 * 3;");
        let ops = ops_of(&prog.funcs[0].code);
        assert_eq!(
            ops,
            vec![
                Op::PushInt,
                Op::PushInt,
                Op::PushInt,
                Op::Mul,
                Op::Add,
                Op::StoreGlobal,
                Op::RetUndef,
            ]
        );
    }

    #[test]
    fn test_string_constants_dedup() {
        let prog = compile("var a = \"hi\"; var b = \"hi\";");
        assert_eq!(prog.consts.str_count(), 1);
    }

    #[test]
    fn test_if_else_backpatching() {
        let prog = compile("var x = 1; if (x) { x = 2; } else { x = 3; }");
        let code = &prog.funcs[0].code;
        let ops = ops_of(code);
        assert!(ops.contains(&Op::JumpIfFalse));
        assert!(ops.contains(&Op::Jump));

        // Every jump must land inside the function.
        let mut pc = 0;
        while pc < code.len() {
            let op = Op::from_byte(code[pc]).unwrap();
            let size = crate::vm::opcode::OP_INFO[op as usize].size as usize;
            if matches!(op, Op::Jump | Op::JumpIfFalse | Op::JumpIfTrue) {
                let rel = read_i32(code, pc + 1);
                let target = (pc + size) as i64 + rel as i64;
                assert!(target >= 0 && (target as usize) <= code.len());
            }
            pc += size;
        }
    }

    #[test]
    fn test_while_loop_jumps_back() {
        let prog = compile("var i = 0; while (i < 3) { i = i + 1; }");
        let code = &prog.funcs[0].code;
        let mut saw_back_jump = false;
        let mut pc = 0;
        while pc < code.len() {
            let op = Op::from_byte(code[pc]).unwrap();
            let size = crate::vm::opcode::OP_INFO[op as usize].size as usize;
            if op == Op::Jump && read_i32(code, pc + 1) < 0 {
                saw_back_jump = true;
            }
            pc += size;
        }
        assert!(saw_back_jump);
    }

    #[test]
    fn test_lambda_gets_own_function() {
        let prog = compile("var f = function(a) { return a; };");
        assert_eq!(prog.funcs.len(), 2);
        assert_eq!(prog.funcs[1].arity, 1);
        let ops = ops_of(&prog.funcs[0].code);
        assert!(ops.contains(&Op::MakeLambda));
    }

    #[test]
    fn test_tail_call_only_in_tail_position() {
        let prog = compile("function f(n) { if (n === 0) { return 0; } return f(n - 1); }");
        let ops = ops_of(&prog.funcs[1].code);
        assert!(ops.contains(&Op::TailCall));

        // A call whose result feeds an addition is not a tail call.
        let prog = compile("function g(n) { return g(n) + 1; }");
        let ops = ops_of(&prog.funcs[1].code);
        assert!(!ops.contains(&Op::TailCall));
        assert!(ops.contains(&Op::Call));
    }

    #[test]
    fn test_method_call_form() {
        let prog = compile("var o = {f: function() { return 1; }}; o.f();");
        let ops = ops_of(&prog.funcs[0].code);
        assert!(ops.contains(&Op::CallMethod));
    }

    #[test]
    fn test_short_circuit_uses_jumps() {
        let prog = compile("var a = true; var b = a && false;");
        let ops = ops_of(&prog.funcs[0].code);
        assert!(ops.contains(&Op::JumpIfFalse));
        assert!(!ops.contains(&Op::And));
    }

    #[test]
    fn test_compound_assignment_decomposes() {
        let prog = compile("var x = 1; x += 2;");
        let ops = ops_of(&prog.funcs[0].code);
        assert!(ops.contains(&Op::Add));
    }

    #[test]
    fn test_line_table_is_monotonic() {
        let prog = compile("var a = 1;\nvar b = 2;\nvar c = a + b;\n");
        let lines = &prog.funcs[0].lines;
        assert!(!lines.is_empty());
        for pair in lines.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
        assert_eq!(prog.funcs[0].line_for(0), 1);
    }
}

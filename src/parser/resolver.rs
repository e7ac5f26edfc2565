//! Semantic pass
//!
//! Walks the parsed AST once and rewrites every identifier to a storage
//! class: a local slot of the enclosing function, an upvalue of an
//! enclosing lambda, or a global slot. Assigns function-table ids to
//! lambdas and function declarations, annotates calls with their call
//! form, and rejects duplicate declarations in a scope and
//! `break`/`continue` outside loops.
//!
//! Top-level `var` and `function` bindings are globals; a pre-pass
//! registers them so forward references between top-level functions
//! resolve.

use crate::compiler::program::UpvalSrc;
use crate::parser::ast::*;
use crate::parser::parser::{Diagnostic, Diagnostics};
use crate::runtime::Realm;

/// Per-function facts the emitter needs.
#[derive(Debug, Default)]
pub struct FuncMeta {
    pub name: String,
    pub arity: u16,
    pub local_slots: u16,
    pub upvals: Vec<UpvalSrc>,
}

/// Resolver output: one entry per function id, id 0 is the top level.
#[derive(Debug, Default)]
pub struct ResolveOutput {
    pub funcs: Vec<FuncMeta>,
}

struct LocalVar {
    name: String,
    depth: u32,
    slot: u16,
}

struct FuncScope {
    fn_id: u32,
    name: String,
    arity: u16,
    locals: Vec<LocalVar>,
    next_slot: u16,
    max_slots: u16,
    scope_depth: u32,
    loop_depth: u32,
    upvals: Vec<(String, UpvalSrc)>,
}

impl FuncScope {
    fn new(fn_id: u32, name: String, params: &[String]) -> Self {
        let mut scope = FuncScope {
            fn_id,
            name,
            arity: params.len() as u16,
            locals: Vec::new(),
            next_slot: 0,
            max_slots: 0,
            scope_depth: 0,
            loop_depth: 0,
            upvals: Vec::new(),
        };
        for p in params {
            // Parameters occupy the first slots; duplicates checked later.
            let slot = scope.next_slot;
            scope.locals.push(LocalVar {
                name: p.clone(),
                depth: 0,
                slot,
            });
            scope.next_slot += 1;
        }
        scope.max_slots = scope.next_slot;
        scope
    }

    fn find_local(&self, name: &str) -> Option<u16> {
        self.locals
            .iter()
            .rev()
            .find(|l| l.name == name)
            .map(|l| l.slot)
    }

    fn declare_local(&mut self, name: &str) -> Result<u16, ()> {
        let dup = self
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth >= self.scope_depth)
            .any(|l| l.name == name);
        if dup {
            return Err(());
        }
        let slot = self.next_slot;
        self.locals.push(LocalVar {
            name: name.to_string(),
            depth: self.scope_depth,
            slot,
        });
        self.next_slot += 1;
        self.max_slots = self.max_slots.max(self.next_slot);
        Ok(slot)
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_depth -= 1;
        while let Some(local) = self.locals.last() {
            if local.depth <= self.scope_depth {
                break;
            }
            self.locals.pop();
            self.next_slot -= 1;
        }
    }

    fn add_upvalue(&mut self, name: &str, src: UpvalSrc) -> u16 {
        if let Some(i) = self.upvals.iter().position(|(n, _)| n == name) {
            return i as u16;
        }
        self.upvals.push((name.to_string(), src));
        (self.upvals.len() - 1) as u16
    }
}

/// The resolver. Borrows the realm for the persistent global registry.
pub struct Resolver<'a> {
    realm: &'a mut Realm,
    path: String,
    src: &'a str,
    scopes: Vec<FuncScope>,
    metas: Vec<FuncMeta>,
    diags: Vec<Diagnostic>,
}

impl<'a> Resolver<'a> {
    pub fn new(path: &str, src: &'a str, realm: &'a mut Realm) -> Self {
        Resolver {
            realm,
            path: path.to_string(),
            src,
            scopes: Vec::new(),
            metas: Vec::new(),
            diags: Vec::new(),
        }
    }

    /// Resolve a unit in place.
    pub fn resolve(mut self, stmts: &mut [Stmt]) -> Result<ResolveOutput, Diagnostics> {
        // Pre-register top-level bindings so forward references work.
        for stmt in stmts.iter() {
            match &stmt.node {
                StmtNode::VarDecl(bindings) => {
                    for b in bindings {
                        self.realm.ensure_global(&b.name);
                    }
                }
                StmtNode::FuncDecl { name, .. } => {
                    self.realm.ensure_global(name);
                }
                _ => {}
            }
        }

        self.scopes
            .push(FuncScope::new(0, String::new(), &[]));
        self.metas.push(FuncMeta::default());

        for stmt in stmts.iter_mut() {
            self.stmt(stmt);
        }

        let top = self.scopes.pop().expect("top-level scope");
        self.finish_func(top);

        if self.diags.is_empty() {
            Ok(ResolveOutput { funcs: self.metas })
        } else {
            Err(Diagnostics(self.diags))
        }
    }

    fn error(&mut self, span: Span, msg: &str) {
        self.diags.push(Diagnostic {
            path: self.path.clone(),
            line: span.line,
            col: span.col,
            msg: msg.to_string(),
            source_line: self
                .src
                .lines()
                .nth(span.line.saturating_sub(1) as usize)
                .unwrap_or("")
                .to_string(),
            underline: span.len.max(1),
        });
    }

    fn finish_func(&mut self, scope: FuncScope) {
        let meta = &mut self.metas[scope.fn_id as usize];
        meta.name = scope.name;
        meta.arity = scope.arity;
        meta.local_slots = scope.max_slots;
        meta.upvals = scope.upvals.iter().map(|&(_, src)| src).collect();
    }

    #[inline]
    fn in_function(&self) -> bool {
        self.scopes.len() > 1
    }

    /// Resolve `name` against function scope `depth` (index into `scopes`),
    /// threading upvalues through intermediate lambdas.
    fn resolve_in(&mut self, depth: usize, name: &str) -> Option<Res> {
        if let Some(slot) = self.scopes[depth].find_local(name) {
            return Some(Res::Local(slot));
        }
        // The top level keeps its vars in globals, so the walk stops there.
        if depth <= 1 {
            return None;
        }

        match self.resolve_in(depth - 1, name)? {
            Res::Local(slot) => {
                let idx = self.scopes[depth].add_upvalue(name, UpvalSrc::ParentLocal(slot));
                Some(Res::Upvalue(idx))
            }
            Res::Upvalue(parent_idx) => {
                let idx =
                    self.scopes[depth].add_upvalue(name, UpvalSrc::ParentUpvalue(parent_idx));
                Some(Res::Upvalue(idx))
            }
            other => Some(other),
        }
    }

    fn resolve_name(&mut self, name: &str, span: Span) -> Res {
        let depth = self.scopes.len() - 1;
        if let Some(res) = self.resolve_in(depth, name) {
            return res;
        }
        if let Some(slot) = self.realm.global_slot(name) {
            return Res::Global(slot as u16);
        }
        self.error(span, &format!("undefined name `{}`", name));
        Res::Unresolved
    }

    fn declare(&mut self, name: &str, span: Span) -> Res {
        if self.in_function() {
            let scope = self.scopes.last_mut().expect("function scope");
            match scope.declare_local(name) {
                Ok(slot) => Res::Local(slot),
                Err(()) => {
                    self.error(span, &format!("duplicate declaration of `{}`", name));
                    Res::Unresolved
                }
            }
        } else {
            // Top level: already pre-registered.
            Res::Global(self.realm.ensure_global(name) as u16)
        }
    }

    fn enter_func(&mut self, func: &mut LambdaFn, name: &str, span: Span) {
        let fn_id = self.metas.len() as u32;
        func.fn_id = fn_id;
        self.metas.push(FuncMeta::default());

        let mut scope = FuncScope::new(fn_id, name.to_string(), &func.params);
        // Parameters share one scope; reject duplicates among them.
        let mut seen: Vec<&str> = Vec::new();
        for p in &func.params {
            if seen.contains(&p.as_str()) {
                self.error(span, &format!("duplicate parameter `{}`", p));
            }
            seen.push(p);
        }
        scope.begin_scope();
        self.scopes.push(scope);

        for stmt in func.body.iter_mut() {
            self.stmt(stmt);
        }

        let scope = self.scopes.pop().expect("function scope");
        self.finish_func(scope);
    }

    fn stmt(&mut self, stmt: &mut Stmt) {
        let span = stmt.span;
        match &mut stmt.node {
            StmtNode::Expr(e) => self.expr(e),
            StmtNode::VarDecl(bindings) => {
                for b in bindings.iter_mut() {
                    if let Some(init) = &mut b.init {
                        self.expr(init);
                    }
                    // Initializer first: `var x = x;` refers to the outer x.
                    b.res = self.declare(&b.name, span);
                }
            }
            StmtNode::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond);
                self.stmt(then_branch);
                if let Some(e) = else_branch {
                    self.stmt(e);
                }
            }
            StmtNode::Return(value) => {
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            StmtNode::While { cond, body } => {
                self.expr(cond);
                if let Some(scope) = self.scopes.last_mut() {
                    scope.loop_depth += 1;
                }
                self.stmt(body);
                if let Some(scope) = self.scopes.last_mut() {
                    scope.loop_depth -= 1;
                }
            }
            StmtNode::Break | StmtNode::Continue => {
                let in_loop = self
                    .scopes
                    .last()
                    .is_some_and(|s| s.loop_depth > 0);
                if !in_loop {
                    let what = if matches!(stmt.node, StmtNode::Break) {
                        "break"
                    } else {
                        "continue"
                    };
                    self.error(span, &format!("`{}` outside of a loop", what));
                }
            }
            StmtNode::Block(stmts) => {
                if let Some(scope) = self.scopes.last_mut() {
                    scope.begin_scope();
                }
                for s in stmts.iter_mut() {
                    self.stmt(s);
                }
                if let Some(scope) = self.scopes.last_mut() {
                    scope.end_scope();
                }
            }
            StmtNode::FuncDecl { name, func, res } => {
                let name_owned = name.clone();
                *res = self.declare(&name_owned, span);
                self.enter_func(func, &name_owned, span);
            }
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        let span = expr.span;
        match &mut expr.node {
            ExprNode::Literal(_) | ExprNode::This => {}
            ExprNode::Ident { name, res } => {
                let name = name.clone();
                *res = self.resolve_name(&name, span);
            }
            ExprNode::ObjectLit(entries) => {
                for (_, v) in entries.iter_mut() {
                    self.expr(v);
                }
            }
            ExprNode::ArrayLit(items) => {
                for item in items.iter_mut() {
                    self.expr(item);
                }
            }
            ExprNode::Lambda(func) => {
                self.enter_func(func, "", span);
            }
            ExprNode::Member { base, key } => {
                self.expr(base);
                if let MemberKey::Computed(idx) = key {
                    self.expr(idx);
                }
            }
            ExprNode::Unary { operand, .. } => self.expr(operand),
            ExprNode::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            ExprNode::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            ExprNode::Call { callee, args, form } => {
                self.expr(callee);
                for arg in args.iter_mut() {
                    self.expr(arg);
                }
                // Method form: the callee is a property of the receiver.
                if *form == CallForm::Plain && matches!(callee.node, ExprNode::Member { .. }) {
                    *form = CallForm::Method;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::HeapConfig;
    use crate::parser::lexer::{default_lexicals, LexTable};
    use crate::parser::parser::Parser;

    fn resolve_src(src: &str) -> (Result<ResolveOutput, Diagnostics>, Vec<Stmt>, Realm) {
        let mut table = LexTable::new();
        default_lexicals(&mut table);
        let (ast, diags) = Parser::new("test.js", src, &table).parse();
        assert!(diags.is_empty(), "parse failed: {}", diags);
        let mut ast = ast.unwrap();
        let mut realm = Realm::new(HeapConfig::default());
        realm.ensure_global("console");
        let out = Resolver::new("test.js", src, &mut realm).resolve(&mut ast);
        (out, ast, realm)
    }

    #[test]
    fn test_top_level_vars_are_globals() {
        let (out, ast, realm) = resolve_src("var a = 1; a;");
        out.unwrap();
        assert!(realm.global_slot("a").is_some());
        let StmtNode::Expr(e) = &ast[1].node else {
            panic!();
        };
        assert!(matches!(e.node, ExprNode::Ident { res: Res::Global(_), .. }));
    }

    #[test]
    fn test_function_locals_and_params() {
        let (out, ast, _) = resolve_src("function f(a, b) { var c = a; return c; }");
        let out = out.unwrap();
        assert_eq!(out.funcs.len(), 2);
        assert_eq!(out.funcs[1].arity, 2);
        assert_eq!(out.funcs[1].local_slots, 3);

        let StmtNode::FuncDecl { func, .. } = &ast[0].node else {
            panic!();
        };
        assert_eq!(func.fn_id, 1);
    }

    #[test]
    fn test_upvalue_capture() {
        let (out, _, _) =
            resolve_src("function mk() { var n = 0; return function() { n += 1; return n; }; }");
        let out = out.unwrap();
        assert_eq!(out.funcs.len(), 3);
        // The inner lambda captures `n` from mk's frame.
        assert_eq!(out.funcs[2].upvals, vec![UpvalSrc::ParentLocal(0)]);
    }

    #[test]
    fn test_nested_upvalue_threads_through() {
        let src = "function a() { var x = 1; return function() { return function() { return x; }; }; }";
        let (out, _, _) = resolve_src(src);
        let out = out.unwrap();
        // Middle lambda captures x as ParentLocal; inner as ParentUpvalue.
        assert_eq!(out.funcs[2].upvals, vec![UpvalSrc::ParentLocal(0)]);
        assert_eq!(out.funcs[3].upvals, vec![UpvalSrc::ParentUpvalue(0)]);
    }

    #[test]
    fn test_undefined_name_is_an_error() {
        let (out, _, _) = resolve_src("missing;");
        assert!(out.is_err());
    }

    #[test]
    fn test_duplicate_local_is_an_error() {
        let (out, _, _) = resolve_src("function f() { var x; var x; }");
        assert!(out.is_err());
    }

    #[test]
    fn test_shadowing_in_inner_block_is_fine() {
        let (out, _, _) = resolve_src("function f() { var x = 1; { var x = 2; } return x; }");
        assert!(out.is_ok());
    }

    #[test]
    fn test_break_outside_loop() {
        let (out, _, _) = resolve_src("break;");
        assert!(out.is_err());
        let (out, _, _) = resolve_src("while (true) { break; }");
        assert!(out.is_ok());
    }

    #[test]
    fn test_method_call_form() {
        let (out, ast, _) = resolve_src("var o = {f: function() { return 1; }}; o.f();");
        out.unwrap();
        let StmtNode::Expr(e) = &ast[1].node else {
            panic!();
        };
        let ExprNode::Call { form, .. } = &e.node else {
            panic!();
        };
        assert_eq!(*form, CallForm::Method);
    }
}

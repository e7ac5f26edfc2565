//! Recursive-descent / Pratt parser
//!
//! Statements parse top-down; expressions climb a precedence table with
//! right-associative assignment. Errors produce caret diagnostics and
//! switch the parser into panic mode, which recovers at the next statement
//! boundary so later errors still surface — but any error means the unit
//! yields no AST.

use crate::parser::ast::*;
use crate::parser::lexer::{LexTable, Lexer, Token, TokenTag};
use std::fmt;

/// One rendered parse diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub path: String,
    pub line: u32,
    pub col: u32,
    pub msg: String,
    /// Content of the offending source line, for the caret display.
    pub source_line: String,
    pub underline: usize,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}:{}:{}: error: {}",
            self.path, self.line, self.col, self.msg
        )?;
        writeln!(f, "  {}", self.source_line)?;
        let pad = " ".repeat(self.col.saturating_sub(1) as usize);
        let carets = "^".repeat(self.underline.max(1));
        write!(f, "  {}{}", pad, carets)
    }
}

/// A batch of diagnostics, rendered one per paragraph.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}", d)?;
        }
        Ok(())
    }
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Expression precedence, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Assignment,
    LogicalOr,
    LogicalAnd,
    Equality,
    Relational,
    Additive,
    Multiplicative,
    Unary,
}

impl Prec {
    fn next(self) -> Prec {
        match self {
            Prec::Assignment => Prec::LogicalOr,
            Prec::LogicalOr => Prec::LogicalAnd,
            Prec::LogicalAnd => Prec::Equality,
            Prec::Equality => Prec::Relational,
            Prec::Relational => Prec::Additive,
            Prec::Additive => Prec::Multiplicative,
            Prec::Multiplicative => Prec::Unary,
            Prec::Unary => Prec::Unary,
        }
    }
}

fn infix_prec(tag: TokenTag) -> Option<Prec> {
    use TokenTag::*;
    match tag {
        Assign | PlusAssign | MinusAssign | StarAssign | SlashAssign | PercentAssign => {
            Some(Prec::Assignment)
        }
        PipePipe => Some(Prec::LogicalOr),
        AmpAmp => Some(Prec::LogicalAnd),
        EqEq | BangEq | StrictEq | StrictBangEq => Some(Prec::Equality),
        Lt | Le | Gt | Ge => Some(Prec::Relational),
        Plus | Minus => Some(Prec::Additive),
        Star | Slash | Percent => Some(Prec::Multiplicative),
        _ => None,
    }
}

fn binop_for(tag: TokenTag) -> Option<BinOp> {
    use TokenTag::*;
    match tag {
        Plus => Some(BinOp::Add),
        Minus => Some(BinOp::Sub),
        Star => Some(BinOp::Mul),
        Slash => Some(BinOp::Div),
        Percent => Some(BinOp::Mod),
        EqEq => Some(BinOp::Eq),
        BangEq => Some(BinOp::Neq),
        StrictEq => Some(BinOp::StrictEq),
        StrictBangEq => Some(BinOp::StrictNeq),
        Lt => Some(BinOp::Lt),
        Le => Some(BinOp::Le),
        Gt => Some(BinOp::Gt),
        Ge => Some(BinOp::Ge),
        AmpAmp => Some(BinOp::And),
        PipePipe => Some(BinOp::Or),
        _ => None,
    }
}

fn assign_op_for(tag: TokenTag) -> Option<AssignOp> {
    use TokenTag::*;
    match tag {
        Assign => Some(AssignOp::Assign),
        PlusAssign => Some(AssignOp::Add),
        MinusAssign => Some(AssignOp::Sub),
        StarAssign => Some(AssignOp::Mul),
        SlashAssign => Some(AssignOp::Div),
        PercentAssign => Some(AssignOp::Mod),
        _ => None,
    }
}

/// The parser. Consumes the token stream once; `parse` yields the AST or
/// nothing if any diagnostic was produced.
pub struct Parser<'a> {
    src: &'a str,
    path: String,
    lexer: Lexer<'a>,
    current: Token,
    prev: Token,
    diags: Vec<Diagnostic>,
    panic_mode: bool,
}

impl<'a> Parser<'a> {
    pub fn new(path: &str, source: &'a str, table: &'a LexTable) -> Self {
        let mut lexer = Lexer::new(source, table);
        let current = lexer.next_token();
        Parser {
            src: source,
            path: path.to_string(),
            lexer,
            current,
            prev: current,
            diags: Vec::new(),
            panic_mode: false,
        }
    }

    /// Parse a whole unit. An empty diagnostics list means the AST is valid.
    pub fn parse(mut self) -> (Option<Vec<Stmt>>, Diagnostics) {
        let mut stmts = Vec::new();
        while !self.check(TokenTag::Eof) {
            match self.statement() {
                Some(stmt) => stmts.push(stmt),
                None => self.synchronize(),
            }
        }

        if self.diags.is_empty() {
            (Some(stmts), Diagnostics(self.diags))
        } else {
            (None, Diagnostics(self.diags))
        }
    }

    // =====================================================================
    // Token handling
    // =====================================================================

    fn advance(&mut self) {
        self.prev = self.current;
        loop {
            self.current = self.lexer.next_token();
            if self.current.tag != TokenTag::Unknown {
                break;
            }
            let lexeme = self.current.lexeme(self.src).to_string();
            self.error_at_current(&format!("unrecognized input `{}`", lexeme));
        }
    }

    #[inline]
    fn check(&self, tag: TokenTag) -> bool {
        self.current.tag == tag
    }

    fn match_tag(&mut self, tag: TokenTag) -> bool {
        if self.check(tag) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tag: TokenTag, what: &str) -> Option<Token> {
        if self.check(tag) {
            let tok = self.current;
            self.advance();
            Some(tok)
        } else {
            self.error_at_current(&format!("expected {}", what));
            None
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        let tok = self.current;
        self.error_at(&tok, msg);
    }

    fn error_at(&mut self, tok: &Token, msg: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.diags.push(Diagnostic {
            path: self.path.clone(),
            line: tok.line,
            col: tok.col,
            msg: msg.to_string(),
            source_line: source_line(self.src, tok.line),
            underline: tok.len.max(1),
        });
    }

    /// Skip to the next statement boundary after an error.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenTag::Eof) {
            if self.prev.tag == TokenTag::Semicolon {
                return;
            }
            match self.current.tag {
                TokenTag::KwVar
                | TokenTag::KwIf
                | TokenTag::KwWhile
                | TokenTag::KwReturn
                | TokenTag::KwFunction
                | TokenTag::KwBreak
                | TokenTag::KwContinue
                | TokenTag::RBrace => return,
                _ => {}
            }
            self.advance();
        }
    }

    // =====================================================================
    // Statements
    // =====================================================================

    fn statement(&mut self) -> Option<Stmt> {
        match self.current.tag {
            TokenTag::KwVar => self.var_declaration(),
            TokenTag::KwIf => self.if_statement(),
            TokenTag::KwWhile => self.while_statement(),
            TokenTag::KwReturn => self.return_statement(),
            TokenTag::KwBreak => self.simple_statement(StmtNode::Break),
            TokenTag::KwContinue => self.simple_statement(StmtNode::Continue),
            TokenTag::KwFunction => self.function_declaration(),
            TokenTag::LBrace => self.block_statement(),
            _ => self.expression_statement(),
        }
    }

    /// `var x = e, y, z = f;`
    fn var_declaration(&mut self) -> Option<Stmt> {
        let span = Span::from_token(&self.current);
        self.advance(); // var

        let mut bindings = Vec::new();
        loop {
            let name_tok = self.expect(TokenTag::Ident, "variable name")?;
            let name = name_tok.lexeme(self.src).to_string();

            let init = if self.match_tag(TokenTag::Assign) {
                Some(self.parse_prec(Prec::Assignment)?)
            } else {
                None
            };
            bindings.push(VarBinding {
                name,
                init,
                res: Res::Unresolved,
            });

            if !self.match_tag(TokenTag::Comma) {
                break;
            }
        }

        self.expect(TokenTag::Semicolon, "`;` after declaration")?;
        Some(Stmt {
            node: StmtNode::VarDecl(bindings),
            span,
        })
    }

    fn if_statement(&mut self) -> Option<Stmt> {
        let span = Span::from_token(&self.current);
        self.advance(); // if
        self.expect(TokenTag::LParen, "`(` after `if`")?;
        let cond = self.expression()?;
        self.expect(TokenTag::RParen, "`)` after condition")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_tag(TokenTag::KwElse) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Some(Stmt {
            node: StmtNode::If {
                cond,
                then_branch,
                else_branch,
            },
            span,
        })
    }

    fn while_statement(&mut self) -> Option<Stmt> {
        let span = Span::from_token(&self.current);
        self.advance(); // while
        self.expect(TokenTag::LParen, "`(` after `while`")?;
        let cond = self.expression()?;
        self.expect(TokenTag::RParen, "`)` after condition")?;
        let body = Box::new(self.statement()?);

        Some(Stmt {
            node: StmtNode::While { cond, body },
            span,
        })
    }

    fn return_statement(&mut self) -> Option<Stmt> {
        let span = Span::from_token(&self.current);
        self.advance(); // return

        let value = if self.check(TokenTag::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenTag::Semicolon, "`;` after return")?;

        Some(Stmt {
            node: StmtNode::Return(value),
            span,
        })
    }

    fn simple_statement(&mut self, node: StmtNode) -> Option<Stmt> {
        let span = Span::from_token(&self.current);
        self.advance();
        self.expect(TokenTag::Semicolon, "`;`")?;
        Some(Stmt { node, span })
    }

    fn function_declaration(&mut self) -> Option<Stmt> {
        let span = Span::from_token(&self.current);
        self.advance(); // function

        let name_tok = self.expect(TokenTag::Ident, "function name")?;
        let name = name_tok.lexeme(self.src).to_string();
        let func = self.function_rest()?;

        Some(Stmt {
            node: StmtNode::FuncDecl {
                name,
                func,
                res: Res::Unresolved,
            },
            span,
        })
    }

    /// Parameter list and body, shared by declarations and lambdas.
    fn function_rest(&mut self) -> Option<LambdaFn> {
        self.expect(TokenTag::LParen, "`(` before parameters")?;
        let mut params = Vec::new();
        if !self.check(TokenTag::RParen) {
            loop {
                let p = self.expect(TokenTag::Ident, "parameter name")?;
                params.push(p.lexeme(self.src).to_string());
                if !self.match_tag(TokenTag::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenTag::RParen, "`)` after parameters")?;

        self.expect(TokenTag::LBrace, "`{` before function body")?;
        let mut body = Vec::new();
        while !self.check(TokenTag::RBrace) && !self.check(TokenTag::Eof) {
            body.push(self.statement()?);
        }
        self.expect(TokenTag::RBrace, "`}` after function body")?;

        Some(LambdaFn {
            params,
            body,
            fn_id: 0,
        })
    }

    fn block_statement(&mut self) -> Option<Stmt> {
        let span = Span::from_token(&self.current);
        self.advance(); // {
        let mut stmts = Vec::new();
        while !self.check(TokenTag::RBrace) && !self.check(TokenTag::Eof) {
            stmts.push(self.statement()?);
        }
        self.expect(TokenTag::RBrace, "`}` after block")?;
        Some(Stmt {
            node: StmtNode::Block(stmts),
            span,
        })
    }

    fn expression_statement(&mut self) -> Option<Stmt> {
        let span = Span::from_token(&self.current);
        let expr = self.expression()?;
        self.expect(TokenTag::Semicolon, "`;` after expression")?;
        Some(Stmt {
            node: StmtNode::Expr(expr),
            span,
        })
    }

    // =====================================================================
    // Expressions (precedence climbing)
    // =====================================================================

    fn expression(&mut self) -> Option<Expr> {
        self.parse_prec(Prec::Assignment)
    }

    fn parse_prec(&mut self, min_prec: Prec) -> Option<Expr> {
        let mut lhs = self.unary_expr()?;

        while let Some(prec) = infix_prec(self.current.tag) {
            if prec < min_prec {
                break;
            }
            let op_tok = self.current;
            self.advance();

            if let Some(op) = assign_op_for(op_tok.tag) {
                // Right-associative; the target must be assignable.
                if !matches!(
                    lhs.node,
                    ExprNode::Ident { .. } | ExprNode::Member { .. }
                ) {
                    self.error_at(&op_tok, "invalid assignment target");
                    return None;
                }
                let value = self.parse_prec(Prec::Assignment)?;
                let span = lhs.span;
                lhs = Expr {
                    node: ExprNode::Assign {
                        op,
                        target: Box::new(lhs),
                        value: Box::new(value),
                    },
                    span,
                };
                continue;
            }

            let op = match binop_for(op_tok.tag) {
                Some(op) => op,
                None => {
                    self.error_at(&op_tok, "unexpected operator");
                    return None;
                }
            };
            let rhs = self.parse_prec(prec.next())?;
            let span = lhs.span;
            lhs = Expr {
                node: ExprNode::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }

        Some(lhs)
    }

    fn unary_expr(&mut self) -> Option<Expr> {
        let op = match self.current.tag {
            TokenTag::Minus => Some(UnaryOp::Neg),
            TokenTag::Bang => Some(UnaryOp::Not),
            TokenTag::KwTypeof => Some(UnaryOp::TypeOf),
            TokenTag::KwVoid => Some(UnaryOp::Void),
            _ => None,
        };

        if let Some(op) = op {
            let span = Span::from_token(&self.current);
            self.advance();
            let operand = self.unary_expr()?;
            return Some(Expr {
                node: ExprNode::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            });
        }

        if self.check(TokenTag::KwNew) {
            return self.new_expr();
        }

        self.postfix_chain()
    }

    /// `new Callee(args)` — the outermost postfix step must be a call.
    fn new_expr(&mut self) -> Option<Expr> {
        let span = Span::from_token(&self.current);
        self.advance(); // new
        let expr = self.postfix_chain()?;
        match expr.node {
            ExprNode::Call { callee, args, .. } => Some(Expr {
                node: ExprNode::Call {
                    callee,
                    args,
                    form: CallForm::Construct,
                },
                span,
            }),
            _ => {
                self.error_at_current("expected constructor call after `new`");
                None
            }
        }
    }

    /// Primary expression followed by call/member/index chains.
    fn postfix_chain(&mut self) -> Option<Expr> {
        let mut expr = self.primary_expr()?;

        loop {
            match self.current.tag {
                TokenTag::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(TokenTag::RParen) {
                        loop {
                            args.push(self.parse_prec(Prec::Assignment)?);
                            if !self.match_tag(TokenTag::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenTag::RParen, "`)` after arguments")?;
                    let span = expr.span;
                    expr = Expr {
                        node: ExprNode::Call {
                            callee: Box::new(expr),
                            args,
                            form: CallForm::Plain,
                        },
                        span,
                    };
                }
                TokenTag::Dot => {
                    self.advance();
                    // `prototype` is a keyword but a legal property name.
                    let name = if self.check(TokenTag::KwPrototype) {
                        let tok = self.current;
                        self.advance();
                        tok.lexeme(self.src).to_string()
                    } else {
                        let tok = self.expect(TokenTag::Ident, "property name after `.`")?;
                        tok.lexeme(self.src).to_string()
                    };
                    let span = expr.span;
                    expr = Expr {
                        node: ExprNode::Member {
                            base: Box::new(expr),
                            key: MemberKey::Named(name),
                        },
                        span,
                    };
                }
                TokenTag::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(TokenTag::RBracket, "`]` after index")?;
                    let span = expr.span;
                    expr = Expr {
                        node: ExprNode::Member {
                            base: Box::new(expr),
                            key: MemberKey::Computed(Box::new(index)),
                        },
                        span,
                    };
                }
                _ => break,
            }
        }

        Some(expr)
    }

    fn primary_expr(&mut self) -> Option<Expr> {
        let tok = self.current;
        let span = Span::from_token(&tok);

        let node = match tok.tag {
            TokenTag::Int => {
                self.advance();
                let text = tok.lexeme(self.src);
                match text.parse::<i64>() {
                    Ok(n) => ExprNode::Literal(Lit::Int(n)),
                    // Out of i64 range: fall back to a float literal.
                    Err(_) => ExprNode::Literal(Lit::Num(text.parse::<f64>().unwrap_or(0.0))),
                }
            }
            TokenTag::Float => {
                self.advance();
                let n = tok.lexeme(self.src).parse::<f64>().unwrap_or(0.0);
                ExprNode::Literal(Lit::Num(n))
            }
            TokenTag::Str => {
                self.advance();
                ExprNode::Literal(Lit::Str(unescape(tok.lexeme(self.src))))
            }
            TokenTag::KwTrue => {
                self.advance();
                ExprNode::Literal(Lit::Bool(true))
            }
            TokenTag::KwFalse => {
                self.advance();
                ExprNode::Literal(Lit::Bool(false))
            }
            TokenTag::KwNull => {
                self.advance();
                ExprNode::Literal(Lit::Null)
            }
            TokenTag::KwUndefined => {
                self.advance();
                ExprNode::Literal(Lit::Undefined)
            }
            TokenTag::KwThis => {
                self.advance();
                ExprNode::This
            }
            TokenTag::Ident => {
                self.advance();
                ExprNode::Ident {
                    name: tok.lexeme(self.src).to_string(),
                    res: Res::Unresolved,
                }
            }
            TokenTag::KwFunction => {
                self.advance();
                let func = self.function_rest()?;
                ExprNode::Lambda(func)
            }
            TokenTag::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenTag::RParen, "`)` after expression")?;
                return Some(inner);
            }
            TokenTag::LBrace => return self.object_literal(),
            TokenTag::LBracket => return self.array_literal(),
            _ => {
                self.error_at_current("expected an expression");
                return None;
            }
        };

        Some(Expr { node, span })
    }

    /// `{ key: expr, "key": expr, }` — trailing comma tolerated.
    fn object_literal(&mut self) -> Option<Expr> {
        let span = Span::from_token(&self.current);
        self.advance(); // {

        let mut entries = Vec::new();
        while !self.check(TokenTag::RBrace) {
            let key = match self.current.tag {
                TokenTag::Ident => {
                    let tok = self.current;
                    self.advance();
                    tok.lexeme(self.src).to_string()
                }
                TokenTag::Str => {
                    let tok = self.current;
                    self.advance();
                    unescape(tok.lexeme(self.src))
                }
                _ => {
                    self.error_at_current("expected property key");
                    return None;
                }
            };
            self.expect(TokenTag::Colon, "`:` after property key")?;
            let value = self.parse_prec(Prec::Assignment)?;
            entries.push((key, value));

            if !self.match_tag(TokenTag::Comma) {
                break;
            }
        }
        self.expect(TokenTag::RBrace, "`}` after object literal")?;

        Some(Expr {
            node: ExprNode::ObjectLit(entries),
            span,
        })
    }

    /// `[ expr, expr, ]` — trailing comma tolerated.
    fn array_literal(&mut self) -> Option<Expr> {
        let span = Span::from_token(&self.current);
        self.advance(); // [

        let mut items = Vec::new();
        while !self.check(TokenTag::RBracket) {
            items.push(self.parse_prec(Prec::Assignment)?);
            if !self.match_tag(TokenTag::Comma) {
                break;
            }
        }
        self.expect(TokenTag::RBracket, "`]` after array literal")?;

        Some(Expr {
            node: ExprNode::ArrayLit(items),
            span,
        })
    }
}

/// Content of the 1-based `line` in `src`, for caret diagnostics.
fn source_line(src: &str, line: u32) -> String {
    src.lines()
        .nth(line.saturating_sub(1) as usize)
        .unwrap_or("")
        .to_string()
}

/// Decode a quoted string literal's escapes.
fn unescape(raw: &str) -> String {
    let inner = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lexer::default_lexicals;

    fn parse(src: &str) -> (Option<Vec<Stmt>>, Diagnostics) {
        let mut table = LexTable::new();
        default_lexicals(&mut table);
        Parser::new("test.js", src, &table).parse()
    }

    fn parse_ok(src: &str) -> Vec<Stmt> {
        let (ast, diags) = parse(src);
        assert!(diags.is_empty(), "unexpected diagnostics: {}", diags);
        ast.unwrap()
    }

    #[test]
    fn test_precedence() {
        let ast = parse_ok("x = 1 + 2 * 3;");
        let StmtNode::Expr(e) = &ast[0].node else {
            panic!("expected expression statement");
        };
        let ExprNode::Assign { value, .. } = &e.node else {
            panic!("expected assignment");
        };
        let ExprNode::Binary { op, rhs, .. } = &value.node else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(
            rhs.node,
            ExprNode::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn test_var_multi_binding() {
        let ast = parse_ok("var a = 1, b, c = 3;");
        let StmtNode::VarDecl(bindings) = &ast[0].node else {
            panic!("expected var decl");
        };
        assert_eq!(bindings.len(), 3);
        assert!(bindings[1].init.is_none());
    }

    #[test]
    fn test_object_literal_with_trailing_comma() {
        let ast = parse_ok("var o = {a: 1, \"b c\": 2,};");
        let StmtNode::VarDecl(bindings) = &ast[0].node else {
            panic!("expected var decl");
        };
        let ExprNode::ObjectLit(entries) = &bindings[0].init.as_ref().unwrap().node else {
            panic!("expected object literal");
        };
        assert_eq!(entries[0].0, "a");
        assert_eq!(entries[1].0, "b c");
    }

    #[test]
    fn test_lambda_expression() {
        let ast = parse_ok("var f = function(a, b) { return a; };");
        let StmtNode::VarDecl(bindings) = &ast[0].node else {
            panic!("expected var decl");
        };
        let ExprNode::Lambda(l) = &bindings[0].init.as_ref().unwrap().node else {
            panic!("expected lambda");
        };
        assert_eq!(l.params, vec!["a", "b"]);
    }

    #[test]
    fn test_member_chain_and_call() {
        let ast = parse_ok("a.b[0].c(1, 2);");
        let StmtNode::Expr(e) = &ast[0].node else {
            panic!("expected expression");
        };
        let ExprNode::Call { callee, args, form } = &e.node else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 2);
        assert_eq!(*form, CallForm::Plain);
        assert!(matches!(callee.node, ExprNode::Member { .. }));
    }

    #[test]
    fn test_new_expression() {
        let ast = parse_ok("var p = new Point(1, 2);");
        let StmtNode::VarDecl(bindings) = &ast[0].node else {
            panic!("expected var decl");
        };
        let ExprNode::Call { form, .. } = &bindings[0].init.as_ref().unwrap().node else {
            panic!("expected call");
        };
        assert_eq!(*form, CallForm::Construct);
    }

    #[test]
    fn test_prototype_as_property_name() {
        parse_ok("f.prototype.greet = function() { return 1; };");
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(unescape(r#""a\nb\"c""#), "a\nb\"c");
    }

    #[test]
    fn test_error_recovers_and_reports_multiple() {
        let (ast, diags) = parse("var = 1;\nvar y = ;\nvar z = 3;");
        assert!(ast.is_none());
        assert!(diags.len() >= 2, "got {} diagnostics", diags.len());
    }

    #[test]
    fn test_diagnostic_has_caret() {
        let (_, diags) = parse("var x = @;");
        let rendered = diags.to_string();
        assert!(rendered.contains("test.js:1:"));
        assert!(rendered.contains('^'));
    }

    #[test]
    fn test_assignment_target_validation() {
        let (ast, _) = parse("1 = 2;");
        assert!(ast.is_none());
    }
}

//! Recursive-descent parser for the build-script language.

use std::rc::Rc;

use super::ast::*;
use super::error::SyntaxError;
use super::lexer::{tokenize, Tok, Token};

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "break", "class", "continue", "def", "del", "elif", "else", "except",
    "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal", "not",
    "or", "pass", "raise", "return", "try", "while", "with", "yield", "None", "True", "False",
];

/// Parse a complete script.
pub fn parse_program(text: &str) -> Result<Program, SyntaxError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut body = Vec::new();
    loop {
        match parser.peek().clone() {
            Tok::Eof => break,
            Tok::Newline => parser.pos += 1,
            _ => parser.statement(&mut body)?,
        }
    }
    Ok(Program { body })
}

/// Parse a single expression, e.g. the body of a manifest file.
pub fn parse_expression(text: &str) -> Result<Expr, SyntaxError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    while parser.peek() == &Tok::Newline {
        parser.pos += 1;
    }
    let expr = parser.testlist()?;
    while matches!(parser.peek(), Tok::Newline) {
        parser.pos += 1;
    }
    if parser.peek() != &Tok::Eof {
        return Err(parser.error("unexpected trailing input after expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line(), message)
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if &**n == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), SyntaxError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", op, describe(self.peek()))))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), SyntaxError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", kw, describe(self.peek()))))
        }
    }

    fn expect_name(&mut self) -> Result<Rc<str>, SyntaxError> {
        match self.peek().clone() {
            Tok::Name(name) if !KEYWORDS.contains(&&*name) => {
                self.pos += 1;
                Ok(name)
            }
            other => Err(self.error(format!("expected a name, found {}", describe(&other)))),
        }
    }

    fn expect_newline(&mut self) -> Result<(), SyntaxError> {
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof => Ok(()),
            other => Err(self.error(format!("expected end of line, found {}", describe(other)))),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self, out: &mut Vec<Statement>) -> Result<(), SyntaxError> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Indent => return Err(self.error("unexpected indent")),
            Tok::Name(n) => match &*n {
                "if" => Some(self.if_statement()?),
                "for" => Some(self.for_statement()?),
                "while" => Some(self.while_statement()?),
                "def" => Some(self.def_statement()?),
                "try" => Some(self.try_statement()?),
                "with" => Some(self.with_statement()?),
                "class" => return Err(self.error("class definitions are not supported")),
                _ => None,
            },
            Tok::Op("@") => return Err(self.error("decorators are not supported")),
            _ => None,
        };
        if let Some(kind) = kind {
            out.push(Statement { line, kind });
            return Ok(());
        }
        self.simple_statements(out)
    }

    fn simple_statements(&mut self, out: &mut Vec<Statement>) -> Result<(), SyntaxError> {
        loop {
            let line = self.line();
            let kind = self.small_statement()?;
            out.push(Statement { line, kind });
            if !self.eat_op(";") {
                break;
            }
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
        }
        self.expect_newline()
    }

    fn small_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        if let Tok::Name(n) = self.peek().clone() {
            match &*n {
                "pass" => {
                    self.pos += 1;
                    return Ok(StmtKind::Pass);
                }
                "break" => {
                    self.pos += 1;
                    return Ok(StmtKind::Break);
                }
                "continue" => {
                    self.pos += 1;
                    return Ok(StmtKind::Continue);
                }
                "return" => {
                    self.pos += 1;
                    if matches!(self.peek(), Tok::Newline | Tok::Eof) || self.is_op(";") {
                        return Ok(StmtKind::Return(None));
                    }
                    return Ok(StmtKind::Return(Some(self.testlist()?)));
                }
                "raise" => {
                    self.pos += 1;
                    if matches!(self.peek(), Tok::Newline | Tok::Eof) || self.is_op(";") {
                        return Ok(StmtKind::Raise(None));
                    }
                    let exc = self.test()?;
                    if self.eat_kw("from") {
                        self.test()?;
                    }
                    return Ok(StmtKind::Raise(Some(exc)));
                }
                "assert" => {
                    self.pos += 1;
                    let test = self.test()?;
                    let msg = if self.eat_op(",") {
                        Some(self.test()?)
                    } else {
                        None
                    };
                    return Ok(StmtKind::Assert { test, msg });
                }
                "del" => {
                    self.pos += 1;
                    let mut targets = vec![self.bitor()?];
                    while self.eat_op(",") {
                        if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                            break;
                        }
                        targets.push(self.bitor()?);
                    }
                    for target in &targets {
                        check_target(target).map_err(|m| self.error(m))?;
                    }
                    return Ok(StmtKind::Del(targets));
                }
                "global" | "nonlocal" => {
                    self.pos += 1;
                    let mut names = vec![self.expect_name()?.to_string()];
                    while self.eat_op(",") {
                        names.push(self.expect_name()?.to_string());
                    }
                    return Ok(StmtKind::Global(names));
                }
                "import" => return self.import_statement(),
                "from" => return self.from_import_statement(),
                "print" if matches!(self.peek_at(1), Tok::Str(_)) => {
                    return Err(self.error("print statements are not supported"));
                }
                "exec" | "yield" => {
                    return Err(self.error(format!("'{}' is not supported", n)));
                }
                _ => {}
            }
        }

        let first = self.testlist_star()?;

        if let Tok::Op(op) = self.peek().clone() {
            if let Some(binop) = augmented_op(op) {
                check_target(&first).map_err(|m| self.error(m))?;
                if matches!(first, Expr::Tuple(_) | Expr::List(_)) {
                    return Err(self.error("illegal expression for augmented assignment"));
                }
                self.pos += 1;
                let value = self.testlist()?;
                return Ok(StmtKind::AugAssign {
                    target: first,
                    op: binop,
                    value,
                });
            }
        }

        if self.is_op("=") {
            let mut targets = vec![first];
            let mut value;
            loop {
                self.expect_op("=")?;
                value = self.testlist_star()?;
                if self.is_op("=") {
                    targets.push(value);
                } else {
                    break;
                }
            }
            for target in &targets {
                check_target(target).map_err(|m| self.error(m))?;
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn dotted_name(&mut self) -> Result<String, SyntaxError> {
        if self.is_op(".") {
            return Err(self.error("relative imports are not supported"));
        }
        let mut name = self.expect_name()?.to_string();
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw("import")?;
        let mut names = Vec::new();
        loop {
            let name = self.dotted_name()?;
            let alias = if self.eat_kw("as") {
                Some(self.expect_name()?.to_string())
            } else {
                None
            };
            names.push(ImportName { name, alias });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn from_import_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw("from")?;
        let module = self.dotted_name()?;
        self.expect_kw("import")?;
        if self.eat_op("*") {
            return Ok(StmtKind::FromImport {
                module,
                names: Vec::new(),
            });
        }
        let parenthesized = self.eat_op("(");
        let mut names = Vec::new();
        loop {
            if parenthesized && self.is_op(")") {
                break;
            }
            let name = self.expect_name()?.to_string();
            let alias = if self.eat_kw("as") {
                Some(self.expect_name()?.to_string())
            } else {
                None
            };
            names.push(ImportName { name, alias });
            if !self.eat_op(",") {
                break;
            }
        }
        if parenthesized {
            self.expect_op(")")?;
        }
        Ok(StmtKind::FromImport { module, names })
    }

    fn block(&mut self) -> Result<Vec<Statement>, SyntaxError> {
        self.expect_op(":")?;
        let mut body = Vec::new();
        if !matches!(self.peek(), Tok::Newline) {
            self.simple_statements(&mut body)?;
            return Ok(body);
        }
        self.pos += 1;
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.pos += 1;
        loop {
            match self.peek().clone() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => self.pos += 1,
                _ => self.statement(&mut body)?,
            }
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw("if")?;
        let mut branches = Vec::new();
        let test = self.test()?;
        let body = self.block()?;
        branches.push((test, body));
        let mut orelse = Vec::new();
        loop {
            if self.eat_kw("elif") {
                let test = self.test()?;
                let body = self.block()?;
                branches.push((test, body));
            } else if self.eat_kw("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn for_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::For {
            target,
            iter,
            body,
            orelse,
        })
    }

    fn while_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw("while")?;
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::While { test, body, orelse })
    }

    fn def_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let (params, vararg, kwarg) = self.parameters(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let body = self.block()?;
        Ok(StmtKind::Def(Rc::new(FunctionDef {
            name,
            params,
            vararg,
            kwarg,
            body: FunctionBody::Block(body),
        })))
    }

    /// Parameter list up to (not including) `end`.
    #[allow(clippy::type_complexity)]
    fn parameters(
        &mut self,
        end: &str,
    ) -> Result<(Vec<Param>, Option<Rc<str>>, Option<Rc<str>>), SyntaxError> {
        let mut params = Vec::new();
        let mut vararg = None;
        let mut kwarg = None;
        let mut keyword_only = false;
        while !self.is_op(end) {
            if self.eat_op("**") {
                kwarg = Some(self.expect_name()?);
            } else if self.eat_op("*") {
                keyword_only = true;
                if !self.is_op(",") && !self.is_op(end) {
                    vararg = Some(self.expect_name()?);
                }
            } else {
                let name = self.expect_name()?;
                if end == ")" && self.eat_op(":") {
                    // Annotations are accepted and ignored
                    self.test()?;
                }
                let default = if self.eat_op("=") {
                    Some(self.test()?)
                } else {
                    None
                };
                params.push(Param {
                    name,
                    default,
                    keyword_only,
                });
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok((params, vararg, kwarg))
    }

    fn try_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw("try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.eat_kw("except") {
            let (kind, name) = if self.is_op(":") {
                (None, None)
            } else {
                let kind = self.test()?;
                let name = if self.eat_kw("as") || self.eat_op(",") {
                    Some(self.expect_name()?.to_string())
                } else {
                    None
                };
                (Some(kind), name)
            };
            let body = self.block()?;
            handlers.push(ExceptHandler { kind, name, body });
        }
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("try statement without except or finally"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn with_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw("with")?;
        let mut items = Vec::new();
        loop {
            let context = self.test()?;
            let target = if self.eat_kw("as") {
                let target = self.bitor()?;
                check_target(&target).map_err(|m| self.error(m))?;
                Some(target)
            } else {
                None
            };
            items.push((context, target));
            if !self.eat_op(",") {
                break;
            }
        }
        let body = self.block()?;
        Ok(StmtKind::With { items, body })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Comma-separated expressions; more than one (or a trailing comma) is a tuple.
    fn testlist(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.test()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_expression_end() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// Like `testlist` but allowing starred items, for assignment statements.
    fn testlist_star(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.test_or_star()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_expression_end() || self.is_op("=") || augmented_op_tok(self.peek()) {
                break;
            }
            items.push(self.test_or_star()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn test_or_star(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.bitor()?)));
        }
        self.test()
    }

    fn at_expression_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof)
            || self.is_op(")")
            || self.is_op("]")
            || self.is_op("}")
            || self.is_op(":")
            || self.is_op(";")
    }

    /// Targets of a `for` loop or comprehension, parsed below comparisons so
    /// that `in` is left for the caller.
    fn target_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.target_item()?;
        if !self.is_op(",") {
            check_target(&first).map_err(|m| self.error(m))?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_kw("in") {
                break;
            }
            items.push(self.target_item()?);
        }
        let target = Expr::Tuple(items);
        check_target(&target).map_err(|m| self.error(m))?;
        Ok(target)
    }

    fn target_item(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.bitor()?)));
        }
        self.bitor()
    }

    fn test(&mut self) -> Result<Expr, SyntaxError> {
        if self.is_kw("lambda") {
            return self.lambda();
        }
        let body = self.or_test()?;
        if self.eat_kw("if") {
            let test = self.or_test()?;
            self.expect_kw("else")?;
            let orelse = self.test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    /// A test that cannot be an un-parenthesized conditional, used in
    /// comprehension conditions.
    fn test_no_cond(&mut self) -> Result<Expr, SyntaxError> {
        if self.is_kw("lambda") {
            return self.lambda();
        }
        self.or_test()
    }

    fn lambda(&mut self) -> Result<Expr, SyntaxError> {
        self.expect_kw("lambda")?;
        let (params, vararg, kwarg) = self.parameters(":")?;
        self.expect_op(":")?;
        let body = self.test()?;
        Ok(Expr::Lambda(Rc::new(FunctionDef {
            name: Rc::from("<lambda>"),
            params,
            vararg,
            kwarg,
            body: FunctionBody::Lambda(Box::new(body)),
        })))
    }

    fn or_test(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_kw("not") {
            let operand = self.not_test()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.bitor()?;
        let mut ops = Vec::new();
        loop {
            let tok = self.peek().clone();
            let op = match &tok {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if &**n == "in" => CmpOp::In,
                Tok::Name(n) if &**n == "not" && matches!(self.peek_at(1), Tok::Name(m) if &**m == "in") => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Tok::Name(n) if &**n == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(m) if &**m == "not") {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            ops.push((op, self.bitor()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), ops))
        }
    }

    fn bitor(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.bitxor()?;
        while self.eat_op("|") {
            let right = self.bitxor()?;
            left = Expr::BinOp(Box::new(left), BinOp::BitOr, Box::new(right));
        }
        Ok(left)
    }

    fn bitxor(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.bitand()?;
        while self.eat_op("^") {
            let right = self.bitand()?;
            left = Expr::BinOp(Box::new(left), BinOp::BitXor, Box::new(right));
        }
        Ok(left)
    }

    fn bitand(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.shift()?;
        while self.eat_op("&") {
            let right = self.shift()?;
            left = Expr::BinOp(Box::new(left), BinOp::BitAnd, Box::new(right));
        }
        Ok(left)
    }

    fn shift(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.arith()?;
        loop {
            let op = if self.eat_op("<<") {
                BinOp::LShift
            } else if self.eat_op(">>") {
                BinOp::RShift
            } else {
                break;
            };
            let right = self.arith()?;
            left = Expr::BinOp(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.term()?;
            left = Expr::BinOp(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.factor()?;
            left = Expr::BinOp(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let op = if self.eat_op("-") {
            UnaryOp::Neg
        } else if self.eat_op("+") {
            UnaryOp::Pos
        } else if self.eat_op("~") {
            UnaryOp::Invert
        } else {
            return self.power();
        };
        let operand = self.factor()?;
        // Fold negative literals
        if op == UnaryOp::Neg {
            match operand {
                Expr::Const(Literal::Int(i)) => return Ok(Expr::Const(Literal::Int(-i))),
                Expr::Const(Literal::Float(f)) => return Ok(Expr::Const(Literal::Float(-f))),
                _ => {}
            }
        }
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.atom_expr()?;
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(Expr::BinOp(Box::new(base), BinOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let args = self.call_args()?;
                self.expect_op(")")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat_op("[") {
                let index = self.subscript_list()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let name = match self.advance() {
                    Tok::Name(n) => n,
                    other => {
                        return Err(self.error(format!(
                            "expected attribute name, found {}",
                            describe(&other)
                        )))
                    }
                };
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, SyntaxError> {
        let mut args = Vec::new();
        while !self.is_op(")") {
            if self.eat_op("**") {
                args.push(Arg::DoubleStar(self.test()?));
            } else if self.eat_op("*") {
                args.push(Arg::Star(self.test()?));
            } else if matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_at(1), Tok::Op("=")) {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                args.push(Arg::Keyword(name, self.test()?));
            } else {
                let value = self.test()?;
                if self.is_kw("for") {
                    // A bare generator argument: f(x for x in y)
                    let generators = self.comprehension_clauses()?;
                    args.push(Arg::Positional(Expr::ListComp(Box::new(value), generators)));
                } else {
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(args)
    }

    fn subscript_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.subscript()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op("]") {
                break;
            }
            items.push(self.subscript()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn subscript(&mut self) -> Result<Expr, SyntaxError> {
        let lower = if self.is_op(":") {
            None
        } else {
            let value = self.test()?;
            if !self.is_op(":") {
                return Ok(value);
            }
            Some(Box::new(value))
        };
        self.expect_op(":")?;
        let upper = if self.is_op(":") || self.is_op("]") || self.is_op(",") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !self.is_op("]") && !self.is_op(",") {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, SyntaxError> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut conditions = Vec::new();
            while self.eat_kw("if") {
                conditions.push(self.test_no_cond()?);
            }
            generators.push(Comprehension {
                target,
                iter,
                conditions,
            });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Const(Literal::Int(i))),
            Tok::Float(f) => Ok(Expr::Const(Literal::Float(f))),
            Tok::Str(s) => Ok(Expr::Const(Literal::Str(s))),
            Tok::Name(n) => match &*n {
                "None" => Ok(Expr::Const(Literal::None)),
                "True" => Ok(Expr::Const(Literal::Bool(true))),
                "False" => Ok(Expr::Const(Literal::Bool(false))),
                name if KEYWORDS.contains(&name) => {
                    self.pos -= 1;
                    Err(self.error(format!("unexpected keyword '{}'", name)))
                }
                _ => Ok(Expr::Name(n)),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.test_or_star()?;
                if self.is_kw("for") {
                    let generators = self.comprehension_clauses()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp(Box::new(first), generators));
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op(")") {
                        break;
                    }
                    items.push(self.test_or_star()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.test_or_star()?;
                if self.is_kw("for") {
                    let generators = self.comprehension_clauses()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp(Box::new(first), generators));
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op("]") {
                        break;
                    }
                    items.push(self.test_or_star()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let key = self.test()?;
                if !self.is_op(":") {
                    return Err(self.error("set literals are not supported"));
                }
                self.expect_op(":")?;
                let value = self.test()?;
                if self.is_kw("for") {
                    let generators = self.comprehension_clauses()?;
                    self.expect_op("}")?;
                    return Ok(Expr::DictComp(Box::new(key), Box::new(value), generators));
                }
                let mut entries = vec![(key, value)];
                while self.eat_op(",") {
                    if self.is_op("}") {
                        break;
                    }
                    let key = self.test()?;
                    self.expect_op(":")?;
                    let value = self.test()?;
                    entries.push((key, value));
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(entries))
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {}", describe(&other))))
            }
        }
    }
}

fn augmented_op(op: &str) -> Option<BinOp> {
    Some(match op {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mul,
        "/=" => BinOp::Div,
        "//=" => BinOp::FloorDiv,
        "%=" => BinOp::Mod,
        "**=" => BinOp::Pow,
        "|=" => BinOp::BitOr,
        "&=" => BinOp::BitAnd,
        "^=" => BinOp::BitXor,
        "<<=" => BinOp::LShift,
        ">>=" => BinOp::RShift,
        _ => return None,
    })
}

fn augmented_op_tok(tok: &Tok) -> bool {
    matches!(tok, Tok::Op(op) if augmented_op(op).is_some())
}

fn check_target(expr: &Expr) -> Result<(), String> {
    match expr {
        Expr::Name(_) | Expr::Attribute(..) | Expr::Subscript(..) => Ok(()),
        Expr::Tuple(items) | Expr::List(items) => items.iter().try_for_each(check_target),
        Expr::Starred(inner) => check_target(inner),
        _ => Err("cannot assign to expression".to_string()),
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{}'", n),
        Tok::Int(i) => format!("number {}", i),
        Tok::Float(f) => format!("number {}", f),
        Tok::Str(_) => "string literal".to_string(),
        Tok::Op(op) => format!("'{}'", op),
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "indent".to_string(),
        Tok::Dedent => "dedent".to_string(),
        Tok::Eof => "end of file".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_program(src).unwrap()
    }

    #[test]
    fn test_parse_assignment_and_call() {
        let program = parse("env = Environment(LIBS=['m'])\nenv.Append(CPPPATH='inc')\n");
        assert_eq!(program.body.len(), 2);
        assert!(matches!(program.body[0].kind, StmtKind::Assign { .. }));
        assert!(matches!(program.body[1].kind, StmtKind::Expr(Expr::Call { .. })));
        assert_eq!(program.body[1].line, 2);
    }

    #[test]
    fn test_parse_nested_blocks() {
        let src = "\
if a:
    for x in y:
        pass
elif b:
    z = 1
else:
    z = 2
";
        let program = parse(src);
        assert_eq!(program.body.len(), 1);
        match &program.body[0].kind {
            StmtKind::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_bracket_continuation_and_comments() {
        let src = "libs = [\n  'a',  # first\n  'b',\n]\nx = 1 + \\\n  2\n";
        let program = parse(src);
        assert_eq!(program.body.len(), 2);
    }

    #[test]
    fn test_parse_for_target_leaves_in() {
        let program = parse("for a, b in pairs:\n  pass\n");
        match &program.body[0].kind {
            StmtKind::For { target, .. } => assert!(matches!(target, Expr::Tuple(items) if items.len() == 2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_comprehension_and_generator_argument() {
        parse("names = [x.name for x in items if x]\ns = ', '.join(str(x) for x in names)\n");
    }

    #[test]
    fn test_parse_def_with_defaults_and_star_args() {
        let program = parse("def f(a, b=2, *args, **kw):\n  return a\n");
        match &program.body[0].kind {
            StmtKind::Def(def) => {
                assert_eq!(def.params.len(), 2);
                assert!(def.vararg.is_some());
                assert!(def.kwarg.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_class_definition() {
        let err = parse_program("class A:\n  pass\n").unwrap_err();
        assert!(err.message.contains("class"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_parse_reports_bad_indent() {
        let err = parse_program("if x:\n    a = 1\n  b = 2\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_parse_expression_with_trailing_commas() {
        let expr = parse_expression("{\n 'modules_required_for_build': ['x',],\n}\n").unwrap();
        assert!(matches!(expr, Expr::Dict(entries) if entries.len() == 1));
    }

    #[test]
    fn test_adjacent_strings_concatenate() {
        let expr = parse_expression("('a' 'b'\n 'c')").unwrap();
        assert!(matches!(expr, Expr::Const(Literal::Str(s)) if &*s == "abc"));
    }
}

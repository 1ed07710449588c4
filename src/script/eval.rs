//! Tree-walking evaluator.
//!
//! Every construct the parser accepts has a case here. Objects the
//! interpreter does not own (the build API, faked library modules) are
//! reached through the [`Host`] trait.

use std::mem;
use std::rc::Rc;

use super::ast::*;
use super::builtins;
use super::error::ScriptError;
use super::value::*;

/// Maximum nesting of script function calls.
const MAX_CALL_DEPTH: usize = 64;

/// The embedding's side of the interpreter.
pub trait Host {
    /// Resolve `import name`, returning the (possibly dotted) module itself.
    fn import_module(&mut self, name: &str) -> Result<Value, ScriptError>;

    fn call(
        &mut self,
        interp: &mut Interpreter,
        callee: &Rc<dyn HostValue>,
        args: CallArgs,
    ) -> Result<Value, ScriptError>;

    fn get_attr(&mut self, obj: &Rc<dyn HostValue>, name: &str) -> Result<Value, ScriptError>;

    fn set_attr(
        &mut self,
        obj: &Rc<dyn HostValue>,
        name: &str,
        _value: Value,
    ) -> Result<(), ScriptError> {
        Err(ScriptError::unsupported(format!(
            "cannot set attribute '{}' on {}",
            name,
            obj.type_name()
        )))
    }

    fn get_item(&mut self, obj: &Rc<dyn HostValue>, _key: &Value) -> Result<Value, ScriptError> {
        Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            obj.type_name()
        )))
    }

    fn set_item(
        &mut self,
        obj: &Rc<dyn HostValue>,
        _key: Value,
        _value: Value,
    ) -> Result<(), ScriptError> {
        Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            obj.type_name()
        )))
    }

    fn contains(&mut self, obj: &Rc<dyn HostValue>, _item: &Value) -> Result<bool, ScriptError> {
        Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            obj.type_name()
        )))
    }

    fn iterate(&mut self, obj: &Rc<dyn HostValue>) -> Result<Vec<Value>, ScriptError> {
        Err(ScriptError::type_error(format!(
            "'{}' object is not iterable",
            obj.type_name()
        )))
    }

    /// `with obj as x:` binds the returned value to `x`.
    fn enter(&mut self, obj: &Rc<dyn HostValue>) -> Result<Value, ScriptError> {
        Ok(Value::Host(obj.clone()))
    }

    fn exit(&mut self, _obj: &Rc<dyn HostValue>) -> Result<(), ScriptError> {
        Ok(())
    }
}

/// A host with no imports and no objects.
#[derive(Debug, Default)]
pub struct NullHost;

impl Host for NullHost {
    fn import_module(&mut self, name: &str) -> Result<Value, ScriptError> {
        Err(ScriptError::raised(
            "ImportError",
            format!("No module named {}", name),
        ))
    }

    fn call(
        &mut self,
        _interp: &mut Interpreter,
        callee: &Rc<dyn HostValue>,
        _args: CallArgs,
    ) -> Result<Value, ScriptError> {
        Err(ScriptError::type_error(format!(
            "'{}' object is not callable",
            callee.type_name()
        )))
    }

    fn get_attr(&mut self, obj: &Rc<dyn HostValue>, name: &str) -> Result<Value, ScriptError> {
        Err(attribute_error(obj.type_name(), name))
    }
}

/// Control flow out of a statement.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    name: Rc<str>,
    globals: Scope,
    /// `None` at module level, where locals are the globals.
    locals: Option<Scope>,
    closure: Vec<Scope>,
    global_names: Vec<String>,
}

impl Frame {
    fn module(globals: Scope) -> Self {
        Frame {
            name: Rc::from("<module>"),
            globals,
            locals: None,
            closure: Vec::new(),
            global_names: Vec::new(),
        }
    }

    /// Scopes a nested function or comprehension can see, innermost last.
    fn visible_closure(&self) -> Vec<Scope> {
        let mut closure = self.closure.clone();
        if let Some(locals) = &self.locals {
            closure.push(locals.clone());
        }
        closure
    }
}

/// Executes parsed scripts.
pub struct Interpreter {
    current: Frame,
    stack: Vec<Frame>,
    /// Exceptions being handled, for bare `raise`.
    handling: Vec<Rc<ExceptionValue>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter {
            current: Frame::module(new_scope()),
            stack: Vec::new(),
            handling: Vec::new(),
        }
    }

    /// Name of the innermost executing script function, if any.
    pub fn current_function(&self) -> Option<&str> {
        if self.current.name.as_ref() == "<module>" {
            None
        } else {
            Some(&self.current.name)
        }
    }

    /// Globals of the innermost executing frame.
    pub fn current_globals(&self) -> Scope {
        self.current.globals.clone()
    }

    fn push_frame(&mut self, frame: Frame) {
        let previous = mem::replace(&mut self.current, frame);
        self.stack.push(previous);
    }

    fn pop_frame(&mut self) {
        if let Some(previous) = self.stack.pop() {
            self.current = previous;
        }
    }

    /// Run a whole program with the given module globals.
    pub fn run_program(
        &mut self,
        host: &mut dyn Host,
        program: &Program,
        globals: Scope,
    ) -> Result<(), ScriptError> {
        self.push_frame(Frame::module(globals));
        let result = self.exec_block(host, &program.body);
        self.pop_frame();
        match result? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(ScriptError::raised(
                "SyntaxError",
                "'return' outside function",
            )),
            Flow::Break | Flow::Continue => Err(ScriptError::raised(
                "SyntaxError",
                "'break' or 'continue' outside loop",
            )),
        }
    }

    /// Evaluate a standalone expression against the given globals.
    pub fn eval_in(
        &mut self,
        host: &mut dyn Host,
        expr: &Expr,
        globals: Scope,
    ) -> Result<Value, ScriptError> {
        self.push_frame(Frame::module(globals));
        let result = self.eval(host, expr);
        self.pop_frame();
        result
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        let frame = &self.current;
        if let Some(locals) = &frame.locals {
            if let Some(value) = locals.borrow().get(name) {
                return Ok(value.clone());
            }
        }
        for scope in frame.closure.iter().rev() {
            if let Some(value) = scope.borrow().get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = frame.globals.borrow().get(name) {
            return Ok(value.clone());
        }
        builtin_value(name).ok_or_else(|| ScriptError::name_error(name))
    }

    fn store_name(&mut self, name: &str, value: Value) {
        let frame = &self.current;
        match &frame.locals {
            Some(locals) if !frame.global_names.iter().any(|g| g == name) => {
                locals.borrow_mut().insert(name.to_string(), value);
            }
            _ => {
                frame.globals.borrow_mut().insert(name.to_string(), value);
            }
        }
    }

    fn delete_name(&mut self, name: &str) -> Result<(), ScriptError> {
        let frame = &self.current;
        let removed = match &frame.locals {
            Some(locals) if !frame.global_names.iter().any(|g| g == name) => {
                locals.borrow_mut().shift_remove(name)
            }
            _ => frame.globals.borrow_mut().shift_remove(name),
        };
        removed
            .map(|_| ())
            .ok_or_else(|| ScriptError::name_error(name))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn exec_block(&mut self, host: &mut dyn Host, body: &[Statement]) -> Result<Flow, ScriptError> {
        for stmt in body {
            let flow = self
                .exec_stmt(host, stmt)
                .map_err(|e| e.at_line(stmt.line))?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, host: &mut dyn Host, stmt: &Statement) -> Result<Flow, ScriptError> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(host, expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(host, value)?;
                for target in targets {
                    self.assign(host, target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(host, target)?;
                let rhs = self.eval(host, value)?;
                if let (BinOp::Add, Value::List(items)) = (op, &current) {
                    // In-place extension keeps aliases in sync
                    let extra = self.iterate(host, &rhs)?;
                    items.borrow_mut().extend(extra);
                    self.assign(host, target, current.clone())?;
                } else {
                    let result = builtins::binary_op(*op, &current, &rhs)?;
                    self.assign(host, target, result)?;
                }
            }
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(host, test)?.truthy() {
                        return self.exec_block(host, body);
                    }
                }
                return self.exec_block(host, orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(host, iter)?;
                let items = self.iterate(host, &iterable)?;
                for item in items {
                    self.assign(host, target, item)?;
                    match self.exec_block(host, body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(host, orelse);
            }
            StmtKind::While { test, body, orelse } => {
                while self.eval(host, test)?.truthy() {
                    match self.exec_block(host, body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(host, orelse);
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(host, expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Def(def) => {
                let function = self.make_function(host, def)?;
                self.store_name(&def.name, function);
            }
            StmtKind::Import(names) => {
                for import in names {
                    let module = host.import_module(&import.name)?;
                    match &import.alias {
                        Some(alias) => self.store_name(alias, module),
                        None => {
                            let top = import.name.split('.').next().unwrap_or(&import.name);
                            let value = if top == import.name {
                                module
                            } else {
                                host.import_module(top)?
                            };
                            self.store_name(top, value);
                        }
                    }
                }
            }
            StmtKind::FromImport { module, names } => {
                let source = host.import_module(module)?;
                if names.is_empty() {
                    let Value::Namespace(ns) = &source else {
                        return Err(ScriptError::unsupported(format!(
                            "cannot star-import from {}",
                            module
                        )));
                    };
                    let exported: Vec<(String, Value)> = ns
                        .attrs
                        .borrow()
                        .iter()
                        .filter(|(k, _)| !k.starts_with('_'))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    for (name, value) in exported {
                        self.store_name(&name, value);
                    }
                } else {
                    for import in names {
                        let value = match self.get_attribute(host, &source, &import.name) {
                            Ok(value) => value,
                            Err(err) if err.catchable_kind() == Some("AttributeError") => host
                                .import_module(&format!("{}.{}", module, import.name))
                                .map_err(|_| {
                                    ScriptError::raised(
                                        "ImportError",
                                        format!("cannot import name {}", import.name),
                                    )
                                })?,
                            Err(err) => return Err(err),
                        };
                        let bound = import.alias.as_deref().unwrap_or(&import.name);
                        self.store_name(bound, value);
                    }
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let result = match self.exec_block(host, body) {
                    Ok(Flow::Normal) => self.exec_block(host, orelse),
                    Ok(flow) => Ok(flow),
                    Err(err) => self.handle_exception(host, err, handlers),
                };
                if finalbody.is_empty() {
                    return result;
                }
                return match self.exec_block(host, finalbody)? {
                    Flow::Normal => result,
                    flow => Ok(flow),
                };
            }
            StmtKind::Raise(exc) => {
                let Some(exc) = exc else {
                    return match self.handling.last() {
                        Some(active) => Err(ScriptError::raised(
                            active.kind.to_string(),
                            active.message.clone(),
                        )),
                        None => Err(ScriptError::raised(
                            "RuntimeError",
                            "No active exception to reraise",
                        )),
                    };
                };
                let value = self.eval(host, exc)?;
                return Err(match value {
                    Value::ExceptionType(kind) => ScriptError::raised(kind.to_string(), ""),
                    Value::Exception(e) => ScriptError::raised(e.kind.to_string(), e.message.clone()),
                    other => ScriptError::type_error(format!(
                        "exceptions must derive from BaseException, not {}",
                        other.type_name()
                    )),
                });
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(host, test)?.truthy() {
                    let message = match msg {
                        Some(expr) => self.eval(host, expr)?.display(),
                        None => String::new(),
                    };
                    return Err(ScriptError::raised("AssertionError", message));
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(host, target)?;
                }
            }
            StmtKind::Global(names) => {
                for name in names {
                    if !self.current.global_names.contains(name) {
                        self.current.global_names.push(name.clone());
                    }
                }
            }
            StmtKind::With { items, body } => return self.exec_with(host, items, body),
        }
        Ok(Flow::Normal)
    }

    fn exec_with(
        &mut self,
        host: &mut dyn Host,
        items: &[(Expr, Option<Expr>)],
        body: &[Statement],
    ) -> Result<Flow, ScriptError> {
        let Some(((context, target), rest)) = items.split_first() else {
            return self.exec_block(host, body);
        };
        let manager = self.eval(host, context)?;
        let entered = match &manager {
            Value::Host(obj) => host.enter(obj)?,
            other => other.clone(),
        };
        let result = match target {
            Some(target) => self
                .assign(host, target, entered)
                .and_then(|_| self.exec_with(host, rest, body)),
            None => self.exec_with(host, rest, body),
        };
        if let Value::Host(obj) = &manager {
            host.exit(obj)?;
        }
        result
    }

    fn handle_exception(
        &mut self,
        host: &mut dyn Host,
        err: ScriptError,
        handlers: &[ExceptHandler],
    ) -> Result<Flow, ScriptError> {
        let (kind, message) = match &err {
            ScriptError::Raised { kind, message, .. } => (kind.clone(), message.clone()),
            _ => return Err(err),
        };
        for handler in handlers {
            let matched = match &handler.kind {
                None => true,
                Some(expr) => {
                    let spec = self.eval(host, expr)?;
                    handler_matches(&spec, &kind)?
                }
            };
            if !matched {
                continue;
            }
            let exception = Rc::new(ExceptionValue {
                kind: Rc::from(kind.as_str()),
                message,
            });
            if let Some(name) = &handler.name {
                self.store_name(name, Value::Exception(exception.clone()));
            }
            self.handling.push(exception);
            let result = self.exec_block(host, &handler.body);
            self.handling.pop();
            return result;
        }
        Err(err)
    }

    fn make_function(&mut self, host: &mut dyn Host, def: &Rc<FunctionDef>) -> Result<Value, ScriptError> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(host, expr)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            globals: self.current.globals.clone(),
            closure: self.current.visible_closure(),
        })))
    }

    // ------------------------------------------------------------------
    // Assignment targets
    // ------------------------------------------------------------------

    fn assign(&mut self, host: &mut dyn Host, target: &Expr, value: Value) -> Result<(), ScriptError> {
        match target {
            Expr::Name(name) => {
                self.store_name(name, value);
                Ok(())
            }
            Expr::Attribute(obj, name) => {
                let obj = self.eval(host, obj)?;
                self.set_attribute(host, &obj, name, value)
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(host, obj)?;
                let key = self.eval(host, index)?;
                self.set_item(host, &obj, key, value)
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let values = self.iterate(host, &value)?;
                let starred = targets.iter().position(|t| matches!(t, Expr::Starred(_)));
                match starred {
                    None => {
                        if values.len() != targets.len() {
                            return Err(ScriptError::raised(
                                "ValueError",
                                format!(
                                    "expected {} values to unpack, got {}",
                                    targets.len(),
                                    values.len()
                                ),
                            ));
                        }
                        for (target, value) in targets.iter().zip(values) {
                            self.assign(host, target, value)?;
                        }
                    }
                    Some(star) => {
                        let after = targets.len() - star - 1;
                        if values.len() < targets.len() - 1 {
                            return Err(ScriptError::raised(
                                "ValueError",
                                "not enough values to unpack",
                            ));
                        }
                        let mut values = values;
                        let tail = values.split_off(values.len() - after);
                        let middle = values.split_off(star);
                        for (target, value) in targets[..star].iter().zip(values) {
                            self.assign(host, target, value)?;
                        }
                        if let Expr::Starred(inner) = &targets[star] {
                            self.assign(host, inner, Value::list(middle))?;
                        }
                        for (target, value) in targets[star + 1..].iter().zip(tail) {
                            self.assign(host, target, value)?;
                        }
                    }
                }
                Ok(())
            }
            _ => Err(ScriptError::unsupported("cannot assign to expression")),
        }
    }

    fn delete(&mut self, host: &mut dyn Host, target: &Expr) -> Result<(), ScriptError> {
        match target {
            Expr::Name(name) => self.delete_name(name),
            Expr::Subscript(obj, index) => {
                let obj = self.eval(host, obj)?;
                let key = self.eval(host, index)?;
                match &obj {
                    Value::Dict(entries) => entries
                        .borrow_mut()
                        .shift_remove(&key.to_key()?)
                        .map(|_| ())
                        .ok_or_else(|| ScriptError::key_error(key.repr())),
                    Value::List(items) => {
                        let len = items.borrow().len();
                        let idx = builtins::normalize_index(&key, len)?;
                        items.borrow_mut().remove(idx);
                        Ok(())
                    }
                    other => Err(ScriptError::type_error(format!(
                        "'{}' object does not support item deletion",
                        other.type_name()
                    ))),
                }
            }
            Expr::Attribute(obj, name) => match self.eval(host, obj)? {
                Value::Namespace(ns) => ns
                    .attrs
                    .borrow_mut()
                    .shift_remove(&**name)
                    .map(|_| ())
                    .ok_or_else(|| attribute_error(&ns.name, name)),
                other => Err(ScriptError::unsupported(format!(
                    "cannot delete attribute of {}",
                    other.type_name()
                ))),
            },
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.delete(host, item)?;
                }
                Ok(())
            }
            _ => Err(ScriptError::unsupported("cannot delete expression")),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn eval(&mut self, host: &mut dyn Host, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Name(name) => self.lookup(name),
            Expr::Const(literal) => Ok(literal_value(literal)),
            Expr::List(items) => Ok(Value::list(self.eval_items(host, items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_items(host, items)?)),
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(host, key)?.to_key()?;
                    let value = self.eval(host, value)?;
                    dict.insert(key, value);
                }
                Ok(Value::dict(dict))
            }
            Expr::Attribute(obj, name) => {
                let obj = self.eval(host, obj)?;
                self.get_attribute(host, &obj, name)
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(host, obj)?;
                if let Expr::Slice { lower, upper, step } = &**index {
                    let lower = self.eval_optional(host, lower.as_deref())?;
                    let upper = self.eval_optional(host, upper.as_deref())?;
                    let step = self.eval_optional(host, step.as_deref())?;
                    return builtins::slice(&obj, lower, upper, step);
                }
                let key = self.eval(host, index)?;
                self.get_item(host, &obj, &key)
            }
            Expr::Slice { .. } => Err(ScriptError::unsupported(
                "slice outside of a subscript",
            )),
            Expr::Call { func, args } => {
                let callee = self.eval(host, func)?;
                let args = self.eval_args(host, args)?;
                self.call_value(host, &callee, args)
            }
            Expr::BinOp(left, op, right) => {
                let left = self.eval(host, left)?;
                let right = self.eval(host, right)?;
                builtins::binary_op(*op, &left, &right)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(host, operand)?;
                builtins::unary_op(*op, &value)
            }
            Expr::And(left, right) => {
                let left = self.eval(host, left)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(host, right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(host, left)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(host, right)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(host, first)?;
                for (op, expr) in rest {
                    let right = self.eval(host, expr)?;
                    if !self.compare(host, *op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(host, test)?.truthy() {
                    self.eval(host, body)
                } else {
                    self.eval(host, orelse)
                }
            }
            Expr::Lambda(def) => self.make_function(host, def),
            Expr::ListComp(elt, generators) => {
                let mut out = Vec::new();
                self.with_comprehension_scope(|interp| {
                    interp.comprehension(host, generators, &mut |interp, host| {
                        out.push(interp.eval(host, elt)?);
                        Ok(())
                    })
                })?;
                Ok(Value::list(out))
            }
            Expr::DictComp(key, value, generators) => {
                let mut out = Dict::new();
                self.with_comprehension_scope(|interp| {
                    interp.comprehension(host, generators, &mut |interp, host| {
                        let k = interp.eval(host, key)?.to_key()?;
                        let v = interp.eval(host, value)?;
                        out.insert(k, v);
                        Ok(())
                    })
                })?;
                Ok(Value::dict(out))
            }
            Expr::Starred(_) => Err(ScriptError::unsupported(
                "starred expression outside of a list or call",
            )),
        }
    }

    fn eval_optional(&mut self, host: &mut dyn Host, expr: Option<&Expr>) -> Result<Option<Value>, ScriptError> {
        match expr {
            Some(expr) => Ok(Some(self.eval(host, expr)?)),
            None => Ok(None),
        }
    }

    fn eval_items(&mut self, host: &mut dyn Host, items: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Expr::Starred(inner) = item {
                let value = self.eval(host, inner)?;
                out.extend(self.iterate(host, &value)?);
            } else {
                out.push(self.eval(host, item)?);
            }
        }
        Ok(out)
    }

    fn eval_args(&mut self, host: &mut dyn Host, args: &[Arg]) -> Result<CallArgs, ScriptError> {
        let mut call = CallArgs::default();
        for arg in args {
            match arg {
                Arg::Positional(expr) => call.positional.push(self.eval(host, expr)?),
                Arg::Keyword(name, expr) => {
                    let value = self.eval(host, expr)?;
                    call.keywords.push((name.clone(), value));
                }
                Arg::Star(expr) => {
                    let value = self.eval(host, expr)?;
                    call.positional.extend(self.iterate(host, &value)?);
                }
                Arg::DoubleStar(expr) => match self.eval(host, expr)? {
                    Value::Dict(entries) => {
                        for (key, value) in entries.borrow().iter() {
                            let Key::Str(name) = key else {
                                return Err(ScriptError::type_error("keywords must be strings"));
                            };
                            call.keywords.push((name.clone(), value.clone()));
                        }
                    }
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok(call)
    }

    fn with_comprehension_scope<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        let frame = Frame {
            name: self.current.name.clone(),
            globals: self.current.globals.clone(),
            locals: Some(new_scope()),
            closure: self.current.visible_closure(),
            global_names: Vec::new(),
        };
        self.push_frame(frame);
        let result = body(self);
        self.pop_frame();
        result
    }

    #[allow(clippy::type_complexity)]
    fn comprehension(
        &mut self,
        host: &mut dyn Host,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Interpreter, &mut dyn Host) -> Result<(), ScriptError>,
    ) -> Result<(), ScriptError> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self, host);
        };
        let iterable = self.eval(host, &first.iter)?;
        'items: for item in self.iterate(host, &iterable)? {
            self.assign(host, &first.target, item)?;
            for condition in &first.conditions {
                if !self.eval(host, condition)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension(host, rest, emit)?;
        }
        Ok(())
    }

    fn compare(&mut self, host: &mut dyn Host, op: CmpOp, left: &Value, right: &Value) -> Result<bool, ScriptError> {
        Ok(match op {
            CmpOp::Eq => left.equals(right),
            CmpOp::NotEq => !left.equals(right),
            CmpOp::Is => left.is(right),
            CmpOp::IsNot => !left.is(right),
            CmpOp::In => self.contains(host, right, left)?,
            CmpOp::NotIn => !self.contains(host, right, left)?,
            CmpOp::Lt => builtins::compare_order(left, right)?.is_lt(),
            CmpOp::LtE => builtins::compare_order(left, right)?.is_le(),
            CmpOp::Gt => builtins::compare_order(left, right)?.is_gt(),
            CmpOp::GtE => builtins::compare_order(left, right)?.is_ge(),
        })
    }

    // ------------------------------------------------------------------
    // Object protocol
    // ------------------------------------------------------------------

    /// Call any callable value.
    pub fn call_value(&mut self, host: &mut dyn Host, callee: &Value, args: CallArgs) -> Result<Value, ScriptError> {
        match callee {
            Value::Function(function) => self.call_function(host, function, args),
            Value::Builtin(builtin) => builtins::call_builtin(self, host, *builtin, args),
            Value::Method(method) => {
                builtins::call_method(self, host, &method.receiver, &method.name, args)
            }
            Value::Host(obj) => host.call(self, obj, args),
            Value::ExceptionType(kind) => {
                args.expect_no_keywords(kind)?;
                let message = match args.positional.as_slice() {
                    [] => String::new(),
                    [single] => single.display(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::Exception(Rc::new(ExceptionValue {
                    kind: kind.clone(),
                    message,
                })))
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, host: &mut dyn Host, function: &Rc<Function>, args: CallArgs) -> Result<Value, ScriptError> {
        if self.stack.len() > MAX_CALL_DEPTH {
            return Err(ScriptError::raised(
                "RuntimeError",
                "maximum recursion depth exceeded",
            ));
        }
        let def = &function.def;
        let locals = bind_arguments(function, args)?;
        self.push_frame(Frame {
            name: def.name.clone(),
            globals: function.globals.clone(),
            locals: Some(locals),
            closure: function.closure.clone(),
            global_names: Vec::new(),
        });
        let result = match &def.body {
            FunctionBody::Block(body) => self.exec_block(host, body).map(|flow| match flow {
                Flow::Return(value) => value,
                _ => Value::None,
            }),
            FunctionBody::Lambda(expr) => self.eval(host, expr),
        };
        self.pop_frame();
        result
    }

    pub fn get_attribute(&mut self, host: &mut dyn Host, obj: &Value, name: &str) -> Result<Value, ScriptError> {
        match obj {
            Value::Namespace(ns) => ns
                .get(name)
                .ok_or_else(|| attribute_error(&ns.name, name)),
            Value::Host(h) => host.get_attr(h, name),
            Value::Exception(e) => match name {
                "args" => Ok(Value::tuple(vec![Value::str(&e.message)])),
                "message" => Ok(Value::str(&e.message)),
                _ => Err(attribute_error(&e.kind, name)),
            },
            Value::Function(f) if name == "__name__" => Ok(Value::Str(f.def.name.clone())),
            Value::ExceptionType(kind) if name == "__name__" => Ok(Value::Str(kind.clone())),
            other if builtins::has_method(other, name) => Ok(Value::Method(Rc::new(BoundMethod {
                receiver: other.clone(),
                name: Rc::from(name),
            }))),
            other => Err(attribute_error(&other.type_name(), name)),
        }
    }

    pub fn set_attribute(&mut self, host: &mut dyn Host, obj: &Value, name: &str, value: Value) -> Result<(), ScriptError> {
        match obj {
            Value::Namespace(ns) => {
                ns.set(name, value);
                Ok(())
            }
            Value::Host(h) => host.set_attr(h, name, value),
            other => Err(ScriptError::raised(
                "AttributeError",
                format!(
                    "'{}' object attribute '{}' is read-only",
                    other.type_name(),
                    name
                ),
            )),
        }
    }

    pub fn get_item(&mut self, host: &mut dyn Host, obj: &Value, key: &Value) -> Result<Value, ScriptError> {
        match obj {
            Value::Host(h) => host.get_item(h, key),
            other => builtins::get_item(other, key),
        }
    }

    pub fn set_item(&mut self, host: &mut dyn Host, obj: &Value, key: Value, value: Value) -> Result<(), ScriptError> {
        match obj {
            Value::Dict(entries) => {
                entries.borrow_mut().insert(key.to_key()?, value);
                Ok(())
            }
            Value::List(items) => {
                let len = items.borrow().len();
                let idx = builtins::normalize_index(&key, len)?;
                items.borrow_mut()[idx] = value;
                Ok(())
            }
            Value::Host(h) => host.set_item(h, key, value),
            other => Err(ScriptError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    pub fn contains(&mut self, host: &mut dyn Host, container: &Value, item: &Value) -> Result<bool, ScriptError> {
        match container {
            Value::Str(s) => match item {
                Value::Str(needle) => Ok(s.contains(&**needle)),
                other => Err(ScriptError::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(items) => Ok(items.borrow().iter().any(|v| v.equals(item))),
            Value::Tuple(items) => Ok(items.iter().any(|v| v.equals(item))),
            Value::Dict(entries) => Ok(entries.borrow().contains_key(&item.to_key()?)),
            Value::Namespace(ns) if ns.kind == NamespaceKind::Record => match item {
                Value::Str(name) => Ok(ns.attrs.borrow().contains_key(&**name)),
                _ => Ok(false),
            },
            Value::Host(h) => host.contains(h, item),
            other => Err(ScriptError::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Materialize any iterable value.
    pub fn iterate(&mut self, host: &mut dyn Host, value: &Value) -> Result<Vec<Value>, ScriptError> {
        match value {
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(Rc::from(c.to_string()))).collect()),
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Dict(entries) => Ok(entries.borrow().keys().map(Key::to_value).collect()),
            Value::Host(h) => host.iterate(h),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }
}

fn handler_matches(spec: &Value, kind: &str) -> Result<bool, ScriptError> {
    match spec {
        Value::ExceptionType(name) => Ok(exception_matches(kind, name)),
        Value::Tuple(items) => {
            for item in items.iter() {
                if handler_matches(item, kind)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(ScriptError::type_error(format!(
            "catching classes that do not inherit from BaseException is not allowed ({})",
            other.type_name()
        ))),
    }
}

fn bind_arguments(function: &Function, mut args: CallArgs) -> Result<Scope, ScriptError> {
    let def = &function.def;
    let mut bound: Vec<Option<Value>> = vec![None; def.params.len()];
    let mut extra = Vec::new();
    let mut slots = def
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.keyword_only)
        .map(|(i, _)| i);
    for value in args.positional.drain(..) {
        match slots.next() {
            Some(i) => bound[i] = Some(value),
            None => extra.push(value),
        }
    }

    let mut extra_keywords = Dict::new();
    for (name, value) in args.keywords {
        match def.params.iter().position(|p| p.name == name) {
            Some(i) if bound[i].is_some() => {
                return Err(ScriptError::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, name
                )))
            }
            Some(i) => bound[i] = Some(value),
            None if def.kwarg.is_some() => {
                extra_keywords.insert(Key::Str(name), value);
            }
            None => {
                return Err(ScriptError::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    def.name, name
                )))
            }
        }
    }

    let locals = new_scope();
    {
        let mut scope = locals.borrow_mut();
        for (i, param) in def.params.iter().enumerate() {
            let value = match bound[i].take() {
                Some(value) => value,
                None => function.defaults[i].clone().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "{}() missing required argument '{}'",
                        def.name, param.name
                    ))
                })?,
            };
            scope.insert(param.name.to_string(), value);
        }
        match &def.vararg {
            Some(name) => {
                scope.insert(name.to_string(), Value::tuple(extra));
            }
            None if !extra.is_empty() => {
                return Err(ScriptError::type_error(format!(
                    "{}() takes {} positional arguments but more were given",
                    def.name,
                    def.params.len()
                )))
            }
            None => {}
        }
        if let Some(name) = &def.kwarg {
            scope.insert(name.to_string(), Value::dict(extra_keywords));
        }
    }
    Ok(locals)
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::None => Value::None,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

fn builtin_value(name: &str) -> Option<Value> {
    if let Some(builtin) = Builtin::lookup(name) {
        return Some(Value::Builtin(builtin));
    }
    EXCEPTION_TYPES
        .iter()
        .find(|&&t| t == name)
        .map(|t| Value::ExceptionType(Rc::from(*t)))
}

pub(crate) fn attribute_error(owner: &str, name: &str) -> ScriptError {
    ScriptError::raised(
        "AttributeError",
        format!("'{}' object has no attribute '{}'", owner, name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;

    fn run(src: &str) -> Scope {
        let program = parse_program(src).unwrap();
        let globals = new_scope();
        Interpreter::new()
            .run_program(&mut NullHost, &program, globals.clone())
            .unwrap();
        globals
    }

    fn get(scope: &Scope, name: &str) -> String {
        scope.borrow()[name].repr()
    }

    #[test]
    fn test_functions_defaults_and_closures() {
        let scope = run("\
def outer(a, b=2, *rest, **kw):
    def inner():
        return a + b
    return inner() + len(rest) + len(kw)
x = outer(1)
y = outer(1, 3, 4, 5, k=1)
");
        assert_eq!(get(&scope, "x"), "3");
        assert_eq!(get(&scope, "y"), "7");
    }

    #[test]
    fn test_list_augmented_add_extends_in_place() {
        let scope = run("a = [1]\nb = a\nb += [2]\n");
        assert_eq!(get(&scope, "a"), "[1, 2]");
    }

    #[test]
    fn test_try_except_catches_raised_errors() {
        let scope = run("\
try:
    d = {}
    d['missing']
except KeyError as e:
    caught = 'yes'
finally:
    done = True
");
        assert_eq!(get(&scope, "caught"), "'yes'");
        assert_eq!(get(&scope, "done"), "True");
    }

    #[test]
    fn test_failed_import_is_catchable() {
        let scope = run("\
try:
    import nothing_here
except ImportError:
    fallback = True
");
        assert_eq!(get(&scope, "fallback"), "True");

        let program = parse_program("import nothing_here\n").unwrap();
        let err = Interpreter::new()
            .run_program(&mut NullHost, &program, new_scope())
            .unwrap_err();
        assert_eq!(err.catchable_kind(), Some("ImportError"));
    }

    #[test]
    fn test_comprehension_scope_does_not_leak() {
        let scope = run("items = [x * 2 for x in range(3) if x]\n");
        assert_eq!(get(&scope, "items"), "[2, 4]");
        assert!(!scope.borrow().contains_key("x"));
    }

    #[test]
    fn test_for_else_and_break() {
        let scope = run("\
found = None
for i in [1, 2, 3]:
    if i == 2:
        found = i
        break
else:
    found = -1
");
        assert_eq!(get(&scope, "found"), "2");
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let program = parse_program("a = 1\nb = undefined_name\n").unwrap();
        let err = Interpreter::new()
            .run_program(&mut NullHost, &program, new_scope())
            .unwrap_err();
        match err {
            ScriptError::Raised { kind, line, .. } => {
                assert_eq!(kind, "NameError");
                assert_eq!(line, Some(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tuple_unpacking_with_star() {
        let scope = run("a, *b, c = [1, 2, 3, 4]\n");
        assert_eq!(get(&scope, "a"), "1");
        assert_eq!(get(&scope, "b"), "[2, 3]");
        assert_eq!(get(&scope, "c"), "4");
    }

    #[test]
    fn test_current_function_tracks_innermost_call() {
        let program = parse_program("def probe():\n  return 1\nprobe()\n").unwrap();
        let mut interp = Interpreter::new();
        assert_eq!(interp.current_function(), None);
        interp
            .run_program(&mut NullHost, &program, new_scope())
            .unwrap();
        assert_eq!(interp.current_function(), None);
    }
}

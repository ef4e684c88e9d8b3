//! Tree-walking evaluator
//!
//! One `Interpreter` serves one run: it owns the console entry point, the
//! built-in globals and the resource guards. Snippets and test expressions
//! are evaluated against a [`BindingScope`], the global environment that
//! collects top-level declarations so later evaluations can see them.
//!
//! Every statement, loop iteration and call goes through [`Interpreter::tick`],
//! which charges the step budget and observes the cancellation token.

use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::ast::*;
use super::builtins;
use super::console::Console;
use super::error::{AbortReason, ScriptError};
use super::value::{
    array_index, AssignError, Elements, Env, Function, FunctionKind, ObjectClass, PropertyMap,
    ScopeKind, Value,
};

pub type EvalResult = Result<Value, Interrupt>;

/// Non-local exit from evaluation.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// A script-level exception; catchable by `try/catch`
    Throw(Value),
    /// A resource guard fired; never catchable
    Abort(AbortReason),
}

#[derive(Debug)]
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

type ExecResult = Result<Flow, Interrupt>;

/// Resource guards applied to every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Step budget per invocation
    pub fuel: u64,
    pub max_call_depth: usize,
    /// Maximum length of any string or array
    pub max_collection_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            fuel: 10_000_000,
            max_call_depth: 200,
            max_collection_length: 1_000_000,
        }
    }
}

/// Shared flag the host flips to stop an executor.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The identifier → value mapping shared by a snippet and its tests.
///
/// Dropping the scope clears its bindings, which releases closures that
/// captured it.
pub struct BindingScope {
    env: Rc<Env>,
}

impl BindingScope {
    /// Value bound directly in this scope (not a built-in).
    pub fn get(&self, name: &str) -> Option<Value> {
        if self.env.has_own(name) {
            self.env.lookup(name)
        } else {
            None
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.env.names()
    }

    pub(crate) fn env(&self) -> &Rc<Env> {
        &self.env
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.env.clear();
    }
}

/// Methods looked up on primitive and reference values.
#[derive(Default)]
pub(crate) struct Prototypes {
    pub string: PropertyMap,
    pub array: PropertyMap,
    pub number: PropertyMap,
    pub object: PropertyMap,
    pub function: PropertyMap,
}

enum Place {
    Name(String),
    Property(Value, String),
}

pub struct Interpreter {
    limits: Limits,
    cancel: CancelToken,
    console: Console,
    intrinsics: Rc<Env>,
    pub(crate) prototypes: Prototypes,
    fuel: u64,
    depth: usize,
    captured: Vec<Weak<Env>>,
    captured_ids: HashSet<usize>,
}

impl Interpreter {
    pub fn new(limits: Limits, cancel: CancelToken, console: Console) -> Self {
        let mut interp = Self {
            limits,
            cancel,
            console,
            intrinsics: Env::intrinsics(),
            prototypes: Prototypes::default(),
            fuel: limits.fuel,
            depth: 0,
            captured: Vec::new(),
            captured_ids: HashSet::new(),
        };
        builtins::install(&mut interp);
        interp
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Create an empty binding scope whose parent holds the built-ins.
    pub fn new_scope(&self) -> BindingScope {
        BindingScope {
            env: Env::new(&self.intrinsics, ScopeKind::Global, Some(Value::Undefined)),
        }
    }

    pub(crate) fn define_global(&self, name: &str, value: Value) {
        self.intrinsics.declare(name, value, false);
    }

    /// Execute a parsed snippet against `scope` with a fresh step budget.
    pub fn run_program(&mut self, program: &Program, scope: &BindingScope) -> Result<(), ScriptError> {
        self.begin_invocation();
        let env = scope.env();
        self.hoist_vars(&program.body, env);
        self.hoist_functions(&program.body, env);
        self.exec_statements(&program.body, env)
            .map(|_| ())
            .map_err(|interrupt| self.script_error(interrupt))
    }

    /// Evaluate a parsed expression against `scope` with a fresh step budget.
    pub fn evaluate(&mut self, expr: &Expr, scope: &BindingScope) -> Result<Value, ScriptError> {
        self.begin_invocation();
        self.eval(expr, scope.env())
            .map_err(|interrupt| self.script_error(interrupt))
    }

    fn begin_invocation(&mut self) {
        self.fuel = self.limits.fuel;
        self.depth = 0;
    }

    fn script_error(&self, interrupt: Interrupt) -> ScriptError {
        match interrupt {
            Interrupt::Throw(value) => ScriptError::Thrown {
                message: thrown_message(&value),
            },
            Interrupt::Abort(reason) => {
                trace!(%reason, "invocation aborted");
                ScriptError::Aborted(reason)
            }
        }
    }

    // -- guards -----------------------------------------------------------

    pub(crate) fn tick(&mut self) -> Result<(), Interrupt> {
        self.charge(1)
    }

    /// Charge `steps` against the budget; used by built-ins doing bulk work.
    pub(crate) fn charge(&mut self, steps: u64) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            return Err(Interrupt::Abort(AbortReason::Cancelled));
        }
        if self.fuel < steps {
            self.fuel = 0;
            return Err(Interrupt::Abort(AbortReason::FuelExhausted(self.limits.fuel)));
        }
        self.fuel -= steps;
        Ok(())
    }

    pub(crate) fn check_string_length(&self, len: usize) -> Result<(), Interrupt> {
        if len > self.limits.max_collection_length {
            return Err(self.range_error("Invalid string length"));
        }
        Ok(())
    }

    pub(crate) fn check_array_length(&self, len: usize) -> Result<(), Interrupt> {
        if len > self.limits.max_collection_length {
            return Err(self.range_error("Invalid array length"));
        }
        Ok(())
    }

    // -- errors -----------------------------------------------------------

    pub(crate) fn error(&self, name: &str, message: impl Into<String>) -> Interrupt {
        Interrupt::Throw(Value::new_error(name, message))
    }

    pub(crate) fn type_error(&self, message: impl Into<String>) -> Interrupt {
        self.error("TypeError", message)
    }

    pub(crate) fn range_error(&self, message: impl Into<String>) -> Interrupt {
        self.error("RangeError", message)
    }

    fn reference_error(&self, message: impl Into<String>) -> Interrupt {
        self.error("ReferenceError", message)
    }

    // -- statements -------------------------------------------------------

    fn exec_statements(&mut self, stmts: &[Stmt], env: &Rc<Env>) -> ExecResult {
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_block(&mut self, stmts: &[Stmt], env: &Rc<Env>) -> ExecResult {
        let scope = Env::new(env, ScopeKind::Block, None);
        self.hoist_functions(stmts, &scope);
        self.exec_statements(stmts, &scope)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Rc<Env>) -> ExecResult {
        self.tick()?;
        match stmt {
            Stmt::Declaration { kind, declarators } => {
                for declarator in declarators {
                    self.declare(*kind, declarator, env)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition, env)?.is_truthy() {
                    self.exec(then_branch, env)
                } else if let Some(else_branch) = else_branch {
                    self.exec(else_branch, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { condition, body } => {
                loop {
                    self.tick()?;
                    if !self.eval(condition, env)?.is_truthy() {
                        break;
                    }
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, condition } => {
                loop {
                    self.tick()?;
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval(condition, env)?.is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                condition,
                update,
                body,
            } => self.exec_for(init.as_deref(), condition.as_ref(), update.as_ref(), body, env),
            Stmt::ForOf {
                binding,
                iterable,
                body,
            } => {
                let source = self.eval(iterable, env)?;
                self.exec_for_of(binding, &source, iterable, body, env)
            }
            Stmt::ForIn {
                binding,
                object,
                body,
            } => {
                let source = self.eval(object, env)?;
                let keys: Vec<Value> = enumerable_keys(&source).into_iter().map(Value::from).collect();
                self.exec_for_of(binding, &Value::new_array(keys), object, body, env)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval(expr, env)?;
                Err(Interrupt::Throw(value))
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => self.exec_try(block, handler.as_ref(), finalizer.as_deref(), env),
            Stmt::Block(stmts) => self.exec_block(stmts, env),
            Stmt::Expression(expr) => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn declare(&mut self, kind: DeclKind, declarator: &Declarator, env: &Rc<Env>) -> Result<(), Interrupt> {
        let name = declarator.name.as_str();
        match kind {
            DeclKind::Var => {
                if let Some(init) = &declarator.init {
                    let value = self.eval_named(init, name, env)?;
                    self.assign_name(name, value, env)?;
                }
                Ok(())
            }
            DeclKind::Let | DeclKind::Const => {
                if env.has_own(name) {
                    return Err(self.error(
                        "SyntaxError",
                        format!("Identifier '{}' has already been declared", name),
                    ));
                }
                let value = match &declarator.init {
                    Some(init) => self.eval_named(init, name, env)?,
                    None => Value::Undefined,
                };
                env.declare(name, value, kind == DeclKind::Let);
                Ok(())
            }
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        condition: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        env: &Rc<Env>,
    ) -> ExecResult {
        let loop_env = Env::new(env, ScopeKind::Block, None);
        let per_iteration = matches!(
            init,
            Some(Stmt::Declaration {
                kind: DeclKind::Let | DeclKind::Const,
                ..
            })
        );
        if let Some(init) = init {
            self.exec(init, &loop_env)?;
        }
        let mut iteration = if per_iteration { loop_env.fork() } else { loop_env };
        loop {
            self.tick()?;
            if let Some(condition) = condition {
                if !self.eval(condition, &iteration)?.is_truthy() {
                    break;
                }
            }
            match self.exec(body, &iteration)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if per_iteration {
                iteration = iteration.fork();
            }
            if let Some(update) = update {
                self.eval(update, &iteration)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for_of(
        &mut self,
        binding: &LoopBinding,
        source: &Value,
        source_expr: &Expr,
        body: &Stmt,
        env: &Rc<Env>,
    ) -> ExecResult {
        let items = match source {
            Value::Array(items) => Rc::clone(items),
            Value::Str(s) => Rc::new(RefCell::new(
                s.chars().map(|c| Value::from(c.to_string())).collect::<Elements>(),
            )),
            _ => {
                return Err(self.type_error(format!("{} is not iterable", source_expr.describe())));
            }
        };
        let mut index = 0;
        loop {
            self.tick()?;
            let item = match items.borrow().get(index) {
                Some(item) => item.clone(),
                None => break,
            };
            index += 1;
            let scope = Env::new(env, ScopeKind::Block, None);
            match binding.kind {
                Some(DeclKind::Let) => scope.declare(&binding.name, item, true),
                Some(DeclKind::Const) => scope.declare(&binding.name, item, false),
                Some(DeclKind::Var) | None => self.assign_name(&binding.name, item, env)?,
            }
            match self.exec(body, &scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        handler: Option<&CatchClause>,
        finalizer: Option<&[Stmt]>,
        env: &Rc<Env>,
    ) -> ExecResult {
        let outcome = match (self.exec_block(block, env), handler) {
            (Err(Interrupt::Throw(thrown)), Some(handler)) => {
                let scope = Env::new(env, ScopeKind::Block, None);
                if let Some(param) = &handler.param {
                    scope.declare(param, thrown, true);
                }
                self.hoist_functions(&handler.body, &scope);
                self.exec_statements(&handler.body, &scope)
            }
            (outcome, _) => outcome,
        };
        if matches!(outcome, Err(Interrupt::Abort(_))) {
            return outcome;
        }
        if let Some(finalizer) = finalizer {
            match self.exec_block(finalizer, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        outcome
    }

    // -- hoisting ---------------------------------------------------------

    fn hoist_vars(&self, stmts: &[Stmt], env: &Rc<Env>) {
        let mut names = Vec::new();
        collect_var_names(stmts, &mut names);
        for name in names {
            if !env.has_own(&name) {
                env.declare(&name, Value::Undefined, true);
            }
        }
    }

    fn hoist_functions(&mut self, stmts: &[Stmt], env: &Rc<Env>) {
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                let closure = self.make_closure(def, env, None);
                env.declare(def.name.as_deref().unwrap_or_default(), closure, true);
            }
        }
    }

    fn make_closure(&mut self, def: &Rc<FunctionDef>, env: &Rc<Env>, name_hint: Option<&str>) -> Value {
        let id = Rc::as_ptr(env) as usize;
        if self.captured_ids.insert(id) {
            self.captured.push(Rc::downgrade(env));
        }
        let name = def
            .name
            .as_deref()
            .or(name_hint)
            .unwrap_or_default()
            .to_string();
        Value::Function(Rc::new(Function {
            name,
            kind: FunctionKind::Closure {
                def: Rc::clone(def),
                env: Rc::clone(env),
            },
            properties: Default::default(),
        }))
    }

    // -- expressions ------------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr, env: &Rc<Env>) -> EvalResult {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::from(s.as_str())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => {
                            let value = self.eval(expr, env)?;
                            out.push_str(&value.to_js_string());
                        }
                    }
                    self.check_string_length(out.len())?;
                }
                Ok(Value::from(out))
            }
            Expr::Ident(name) => env
                .lookup(name)
                .ok_or_else(|| self.reference_error(format!("{} is not defined", name))),
            Expr::This => Ok(env.this_value()),
            Expr::Array(elements) => {
                let items = self.eval_elements(elements, env)?;
                Ok(Value::new_array(items))
            }
            Expr::Object(properties) => {
                let mut map = PropertyMap::default();
                for property in properties {
                    let key = match &property.key {
                        PropertyKey::Static(key) => key.clone(),
                        PropertyKey::Computed(expr) => self.eval(expr, env)?.to_js_string(),
                    };
                    let value = self.eval_named(&property.value, &key, env)?;
                    map.set(key, value);
                }
                Ok(Value::new_object(map))
            }
            Expr::Function(def) => Ok(self.make_closure(def, env, None)),
            Expr::Unary(op, operand) => self.eval_unary(*op, operand, env),
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let place = self.place(target, env)?;
                let old = self.read_place(&place, env)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_place(place, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary(left, op, right) => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, &left, &right)
            }
            Expr::Logical(left, op, right) => {
                let left = self.eval(left, env)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                if self.eval(condition, env)?.is_truthy() {
                    self.eval(then_expr, env)
                } else {
                    self.eval(else_expr, env)
                }
            }
            Expr::Assign { op, target, value } => {
                let place = self.place(target, env)?;
                let value = match op {
                    None => match &place {
                        Place::Name(name) => self.eval_named(value, name, env)?,
                        Place::Property(..) => self.eval(value, env)?,
                    },
                    Some(op) => {
                        let current = self.read_place(&place, env)?;
                        let rhs = self.eval(value, env)?;
                        self.binary(*op, &current, &rhs)?
                    }
                };
                self.write_place(place, value.clone(), env)?;
                Ok(value)
            }
            Expr::Member { .. } | Expr::Call { .. } => {
                Ok(self.eval_chain(expr, env)?.unwrap_or(Value::Undefined))
            }
            Expr::New { callee, args } => {
                let constructor = self.eval(callee, env)?;
                let args = self.eval_elements(args, env)?;
                self.construct(&constructor, callee, args)
            }
        }
    }

    /// Evaluate, naming anonymous function literals after their binding.
    fn eval_named(&mut self, expr: &Expr, name: &str, env: &Rc<Env>) -> EvalResult {
        match expr {
            Expr::Function(def) if def.name.is_none() => Ok(self.make_closure(def, env, Some(name))),
            other => self.eval(other, env),
        }
    }

    fn eval_elements(&mut self, elements: &[Element], env: &Rc<Env>) -> Result<Vec<Value>, Interrupt> {
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Element::Plain(expr) => out.push(self.eval(expr, env)?),
                Element::Spread(expr) => match self.eval(expr, env)? {
                    Value::Array(items) => out.extend(items.borrow().iter().cloned()),
                    Value::Str(s) => out.extend(s.chars().map(|c| Value::from(c.to_string()))),
                    _ => {
                        return Err(self.type_error(format!("{} is not iterable", expr.describe())));
                    }
                },
            }
            self.check_array_length(out.len())?;
        }
        Ok(out)
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, env: &Rc<Env>) -> EvalResult {
        if let (UnaryOp::Typeof, Expr::Ident(name)) = (op, operand) {
            let value = env.lookup(name).unwrap_or(Value::Undefined);
            return Ok(Value::from(value.type_of()));
        }
        let value = self.eval(operand, env)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::Neg => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::Typeof => Value::from(value.type_of()),
        })
    }

    pub(crate) fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> EvalResult {
        let number = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
        Ok(match op {
            BinaryOp::Add => return self.add(left, right),
            BinaryOp::Sub => number(|a, b| a - b),
            BinaryOp::Mul => number(|a, b| a * b),
            BinaryOp::Div => number(|a, b| a / b),
            BinaryOp::Mod => number(|a, b| a % b),
            BinaryOp::Pow => number(builtins::js_pow),
            BinaryOp::Lt => Value::Bool(compare(left, right) == Some(CmpOrdering::Less)),
            BinaryOp::Gt => Value::Bool(compare(left, right) == Some(CmpOrdering::Greater)),
            BinaryOp::LtEq => Value::Bool(matches!(
                compare(left, right),
                Some(CmpOrdering::Less | CmpOrdering::Equal)
            )),
            BinaryOp::GtEq => Value::Bool(matches!(
                compare(left, right),
                Some(CmpOrdering::Greater | CmpOrdering::Equal)
            )),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
            BinaryOp::LooseEq => Value::Bool(left.loose_equals(right)),
            BinaryOp::LooseNotEq => Value::Bool(!left.loose_equals(right)),
            BinaryOp::In => return self.has_property(right, left),
        })
    }

    fn add(&mut self, left: &Value, right: &Value) -> EvalResult {
        let (left, right) = (left.to_primitive(), right.to_primitive());
        if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
            let mut out = left.to_js_string();
            let rhs = right.to_js_string();
            self.check_string_length(out.len() + rhs.len())?;
            out.push_str(&rhs);
            return Ok(Value::from(out));
        }
        Ok(Value::Number(left.to_number() + right.to_number()))
    }

    fn has_property(&mut self, container: &Value, key: &Value) -> EvalResult {
        let key = key.to_js_string();
        let found = match container {
            Value::Object(obj) => obj.borrow().get(&key).is_some(),
            Value::Array(items) => {
                key == "length" || array_index(&key).is_some_and(|i| i < items.borrow().len())
            }
            Value::Function(func) => func.properties.borrow().contains(&key),
            other => {
                return Err(self.type_error(format!(
                    "Cannot use 'in' operator to search for '{}' in {}",
                    key,
                    other.to_js_string()
                )));
            }
        };
        Ok(Value::Bool(found))
    }

    // -- references -------------------------------------------------------

    fn place(&mut self, target: &Expr, env: &Rc<Env>) -> Result<Place, Interrupt> {
        match target {
            Expr::Ident(name) => Ok(Place::Name(name.clone())),
            Expr::Member {
                object, property, ..
            } => {
                let base = self.eval(object, env)?;
                let key = self.member_key(property, env)?;
                Ok(Place::Property(base, key))
            }
            _ => Err(self.error("SyntaxError", "Invalid left-hand side in assignment")),
        }
    }

    fn read_place(&mut self, place: &Place, env: &Rc<Env>) -> EvalResult {
        match place {
            Place::Name(name) => env
                .lookup(name)
                .ok_or_else(|| self.reference_error(format!("{} is not defined", name))),
            Place::Property(base, key) => self.get_property(base, key),
        }
    }

    fn write_place(&mut self, place: Place, value: Value, env: &Rc<Env>) -> Result<(), Interrupt> {
        match place {
            Place::Name(name) => self.assign_name(&name, value, env),
            Place::Property(base, key) => self.set_property(&base, &key, value),
        }
    }

    /// Assign to the nearest binding; an undeclared name lands in the binding scope.
    fn assign_name(&mut self, name: &str, value: Value, env: &Rc<Env>) -> Result<(), Interrupt> {
        match env.assign(name, value.clone()) {
            Ok(()) => Ok(()),
            Err(AssignError::Constant) => Err(self.type_error("Assignment to constant variable.")),
            Err(AssignError::NotFound) => {
                env.global_scope().declare(name, value, true);
                Ok(())
            }
        }
    }

    fn member_key(&mut self, property: &MemberProperty, env: &Rc<Env>) -> Result<String, Interrupt> {
        match property {
            MemberProperty::Named(name) => Ok(name.clone()),
            MemberProperty::Computed(expr) => Ok(self.eval(expr, env)?.to_js_string()),
        }
    }

    pub(crate) fn get_property(&mut self, base: &Value, key: &str) -> EvalResult {
        let found = match base {
            Value::Undefined | Value::Null => {
                return Err(self.type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    base.to_js_string(),
                    key
                )));
            }
            Value::Str(s) => {
                if key == "length" {
                    return Ok(Value::from(s.chars().count()));
                }
                if let Some(index) = array_index(key) {
                    return Ok(s
                        .chars()
                        .nth(index)
                        .map_or(Value::Undefined, |c| Value::from(c.to_string())));
                }
                self.prototypes.string.get(key).cloned()
            }
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::from(items.borrow().len()));
                }
                if let Some(index) = array_index(key) {
                    return Ok(items.borrow().get(index).cloned().unwrap_or(Value::Undefined));
                }
                self.prototypes.array.get(key).cloned()
            }
            Value::Object(obj) => {
                let own = obj.borrow().get(key);
                own.or_else(|| self.prototypes.object.get(key).cloned())
            }
            Value::Function(func) => {
                let own = func.properties.borrow().get(key).cloned();
                match key {
                    _ if own.is_some() => own,
                    "name" => Some(Value::from(func.name.as_str())),
                    "length" => Some(Value::from(func.arity())),
                    _ => self.prototypes.function.get(key).cloned(),
                }
            }
            Value::Number(_) => self.prototypes.number.get(key).cloned(),
            Value::Bool(_) => match key {
                "toString" => self.prototypes.number.get(key).cloned(),
                _ => None,
            },
        };
        Ok(found.unwrap_or(Value::Undefined))
    }

    pub(crate) fn set_property(&mut self, base: &Value, key: &str, value: Value) -> Result<(), Interrupt> {
        match base {
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                base.to_js_string(),
                key
            ))),
            Value::Array(items) => {
                if key == "length" {
                    let len = value.to_number();
                    if len < 0.0 || len.fract() != 0.0 || len.is_nan() {
                        return Err(self.range_error("Invalid array length"));
                    }
                    self.check_array_length(len as usize)?;
                    items.borrow_mut().resize(len as usize, Value::Undefined);
                } else if let Some(index) = array_index(key) {
                    self.check_array_length(index.saturating_add(1))?;
                    let mut items = items.borrow_mut();
                    if index >= items.len() {
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                }
                Ok(())
            }
            Value::Object(obj) => {
                obj.borrow_mut().set(key, value);
                Ok(())
            }
            Value::Function(func) => {
                func.properties.borrow_mut().set(key, value);
                Ok(())
            }
            Value::Bool(_) | Value::Number(_) | Value::Str(_) => Ok(()),
        }
    }

    // -- calls ------------------------------------------------------------

    /// Evaluate a member/call chain. `None` means an optional link
    /// short-circuited, which makes the whole chain `undefined`.
    fn eval_chain(&mut self, expr: &Expr, env: &Rc<Env>) -> Result<Option<Value>, Interrupt> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let Some(base) = self.eval_chain(object, env)? else {
                    return Ok(None);
                };
                if *optional && base.is_nullish() {
                    return Ok(None);
                }
                let key = self.member_key(property, env)?;
                self.get_property(&base, &key).map(Some)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => {
                let Some((function, this)) = self.eval_callee(callee, env)? else {
                    return Ok(None);
                };
                if *optional && function.is_nullish() {
                    return Ok(None);
                }
                let args = self.eval_elements(args, env)?;
                if !matches!(function, Value::Function(_)) {
                    return Err(self.type_error(format!("{} is not a function", callee.describe())));
                }
                self.call_function(&function, this, args).map(Some)
            }
            other => self.eval(other, env).map(Some),
        }
    }

    fn eval_callee(&mut self, callee: &Expr, env: &Rc<Env>) -> Result<Option<(Value, Value)>, Interrupt> {
        match callee {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let Some(base) = self.eval_chain(object, env)? else {
                    return Ok(None);
                };
                if *optional && base.is_nullish() {
                    return Ok(None);
                }
                let key = self.member_key(property, env)?;
                let function = self.get_property(&base, &key)?;
                Ok(Some((function, base)))
            }
            other => Ok(self.eval_chain(other, env)?.map(|f| (f, Value::Undefined))),
        }
    }

    /// Call any function value with an explicit `this`.
    pub fn call_function(&mut self, callee: &Value, this: Value, args: Vec<Value>) -> EvalResult {
        let Value::Function(function) = callee else {
            return Err(self.type_error(format!("{} is not a function", callee.to_js_string())));
        };
        self.tick()?;
        if self.depth >= self.limits.max_call_depth {
            return Err(self.range_error("Maximum call stack size exceeded"));
        }
        self.depth += 1;
        let result = match &function.kind {
            FunctionKind::Native(native) => native(self, &this, args),
            FunctionKind::Closure { def, env } => self.call_closure(callee, def, env, this, args),
        };
        self.depth -= 1;
        result
    }

    fn call_closure(
        &mut self,
        callee: &Value,
        def: &FunctionDef,
        captured: &Rc<Env>,
        this: Value,
        args: Vec<Value>,
    ) -> EvalResult {
        let parent = match (&def.name, def.is_arrow) {
            (Some(name), false) => {
                let named = Env::new(captured, ScopeKind::Block, None);
                named.declare(name, callee.clone(), false);
                named
            }
            _ => Rc::clone(captured),
        };
        let this = if def.is_arrow { None } else { Some(this) };
        let scope = Env::new(&parent, ScopeKind::Function, this);

        let mut args = args.into_iter();
        for param in &def.params {
            let value = match args.next() {
                Some(arg) if !matches!(arg, Value::Undefined) => arg,
                _ => match &param.default {
                    Some(default) => self.eval(default, &scope)?,
                    None => Value::Undefined,
                },
            };
            scope.declare(&param.name, value, true);
        }
        if let Some(rest) = &def.rest {
            scope.declare(rest, Value::new_array(args.collect()), true);
        }

        match &def.body {
            FunctionBody::Expression(expr) => self.eval(expr, &scope),
            FunctionBody::Block(stmts) => {
                self.hoist_vars(stmts, &scope);
                self.hoist_functions(stmts, &scope);
                match self.exec_statements(stmts, &scope)? {
                    Flow::Return(value) => Ok(value),
                    _ => Ok(Value::Undefined),
                }
            }
        }
    }

    fn construct(&mut self, constructor: &Value, callee: &Expr, args: Vec<Value>) -> EvalResult {
        let not_constructor = || format!("{} is not a constructor", callee.describe());
        let Value::Function(function) = constructor else {
            return Err(self.type_error(not_constructor()));
        };
        match &function.kind {
            FunctionKind::Native(_) => self.call_function(constructor, Value::Undefined, args),
            FunctionKind::Closure { def, .. } if def.is_arrow => Err(self.type_error(not_constructor())),
            FunctionKind::Closure { .. } => {
                let instance = Value::new_object(PropertyMap::default());
                let result = self.call_function(constructor, instance.clone(), args)?;
                Ok(match result {
                    Value::Object(_) | Value::Array(_) | Value::Function(_) => result,
                    _ => instance,
                })
            }
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        for env in self.captured.drain(..) {
            if let Some(env) = env.upgrade() {
                env.clear();
            }
        }
        self.intrinsics.clear();
    }
}

/// Message reported for an uncaught thrown value.
pub fn thrown_message(value: &Value) -> String {
    if let Value::Object(obj) = value {
        let obj = obj.borrow();
        if let ObjectClass::Error { message, .. } = &obj.class {
            return message.clone();
        }
        if let Some(Value::Str(message)) = obj.get("message") {
            return message.to_string();
        }
    }
    value.to_js_string()
}

/// Keys visited by `for...in` and `Object.keys`.
pub(crate) fn enumerable_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(obj) => obj.borrow().properties.keys(),
        Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
        Value::Str(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn compare(left: &Value, right: &Value) -> Option<CmpOrdering> {
    match (left.to_primitive(), right.to_primitive()) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(&b)),
        (a, b) => a.to_number().partial_cmp(&b.to_number()),
    }
}

fn collect_var_names(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        collect_var_names_in(stmt, out);
    }
}

fn collect_var_names_in(stmt: &Stmt, out: &mut Vec<String>) {
    match stmt {
        Stmt::Declaration {
            kind: DeclKind::Var,
            declarators,
        } => out.extend(declarators.iter().map(|d| d.name.clone())),
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_var_names_in(then_branch, out);
            if let Some(else_branch) = else_branch {
                collect_var_names_in(else_branch, out);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_var_names_in(body, out),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_var_names_in(init, out);
            }
            collect_var_names_in(body, out);
        }
        Stmt::ForOf { binding, body, .. } | Stmt::ForIn { binding, body, .. } => {
            if binding.kind == Some(DeclKind::Var) {
                out.push(binding.name.clone());
            }
            collect_var_names_in(body, out);
        }
        Stmt::Try {
            block,
            handler,
            finalizer,
        } => {
            collect_var_names(block, out);
            if let Some(handler) = handler {
                collect_var_names(&handler.body, out);
            }
            if let Some(finalizer) = finalizer {
                collect_var_names(finalizer, out);
            }
        }
        Stmt::Block(stmts) => collect_var_names(stmts, out),
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::script::console::{render_line, ConsoleLevel, ConsoleSink};
    use crate::script::parser::{parse_expression, parse_program};

    #[derive(Default)]
    struct Lines(RefCell<Vec<String>>);

    impl ConsoleSink for Lines {
        fn write(&self, _level: ConsoleLevel, args: &[Value]) {
            self.0.borrow_mut().push(render_line(args));
        }
    }

    /// Outcome of running a snippet then one expression, rendered to strings
    /// so it can cross the thread boundary.
    #[derive(Debug, PartialEq)]
    pub(crate) struct Outcome {
        pub value: Result<String, String>,
        pub logs: Vec<String>,
    }

    /// Run on a thread with a roomy stack; recursion tests go deep.
    pub(crate) fn run_with(limits: Limits, snippet: &str, expression: &str) -> Outcome {
        let snippet = snippet.to_string();
        let expression = expression.to_string();
        std::thread::Builder::new()
            .stack_size(32 * 1024 * 1024)
            .spawn(move || {
                let lines = Rc::new(Lines::default());
                let mut interp = Interpreter::new(limits, CancelToken::new(), Console::new(lines.clone()));
                let scope = interp.new_scope();
                let value = parse_program(&snippet)
                    .and_then(|program| interp.run_program(&program, &scope))
                    .and_then(|()| parse_expression(&expression))
                    .and_then(|expr| interp.evaluate(&expr, &scope))
                    .map(|v| v.to_js_string())
                    .map_err(|e| e.message());
                let logs = lines.0.borrow().clone();
                Outcome { value, logs }
            })
            .unwrap()
            .join()
            .unwrap()
    }

    pub(crate) fn run(snippet: &str, expression: &str) -> Result<String, String> {
        run_with(Limits::default(), snippet, expression).value
    }

    fn ok(snippet: &str, expression: &str) -> String {
        run(snippet, expression).unwrap_or_else(|e| panic!("unexpected error: {}", e))
    }

    #[test]
    fn test_top_level_declarations_reach_scope() {
        assert_eq!(ok("function add(a, b) { return a + b; }", "add(2, 3) === 5"), "true");
        assert_eq!(ok("var x = 2; let y = 3; const z = 4;", "x + y + z"), "9");
        assert_eq!(ok("counter = 10", "counter"), "10");
    }

    #[test]
    fn test_undefined_identifier() {
        assert_eq!(run("", "x === 1"), Err("x is not defined".to_string()));
        assert_eq!(ok("", "typeof x"), "undefined");
    }

    #[test]
    fn test_hoisting() {
        assert_eq!(ok("var r = f(); function f() { return 7; }", "r"), "7");
        assert_eq!(ok("var before = v; var v = 1;", "before"), "undefined");
    }

    #[test]
    fn test_const_and_redeclaration() {
        assert_eq!(
            run("const c = 1; c = 2;", "c"),
            Err("Assignment to constant variable.".to_string())
        );
        assert_eq!(
            run("let a = 1; let a = 2;", "a"),
            Err("Identifier 'a' has already been declared".to_string())
        );
        assert_eq!(ok("let a = 1; { let a = 2; }", "a"), "1");
    }

    #[test]
    fn test_closures_and_per_iteration_bindings() {
        let src = "var fns = []; for (let i = 0; i < 3; i++) { fns.push(() => i); }";
        assert_eq!(ok(src, "fns.map(f => f()).join(',')"), "0,1,2");
        let counter = "function make() { let n = 0; return () => ++n; } const next = make(); next(); next();";
        assert_eq!(ok(counter, "next()"), "3");
    }

    #[test]
    fn test_control_flow() {
        let src = r#"
            let total = 0;
            for (const n of [1, 2, 3, 4, 5, 6]) {
                if (n % 2 === 0) continue;
                if (n > 4) break;
                total += n;
            }
            let k = 0;
            do { k++; } while (k < 3);
            let keys = [];
            for (const key in { a: 1, b: 2 }) keys.push(key);
        "#;
        assert_eq!(ok(src, "[total, k, keys.join('')].join(' ')"), "4 3 ab");
    }

    #[test]
    fn test_try_catch_finally() {
        let src = r#"
            let log = [];
            try { null.x; } catch (e) { log.push(e.message); } finally { log.push('done'); }
            function f() { try { return 1; } finally { log.push('cleanup'); } }
            f();
        "#;
        assert_eq!(
            ok(src, "log.join('|')"),
            "Cannot read properties of null (reading 'x')|done|cleanup"
        );
    }

    #[test]
    fn test_thrown_values() {
        assert_eq!(run("throw new Error('boom')", "1"), Err("boom".to_string()));
        assert_eq!(run("throw 'plain'", "1"), Err("plain".to_string()));
        assert_eq!(run("throw { message: 'obj' }", "1"), Err("obj".to_string()));
        assert_eq!(run("", "undefinedFn()"), Err("undefinedFn is not defined".to_string()));
        assert_eq!(run("const o = {};", "o.missing()"), Err("o.missing is not a function".to_string()));
    }

    #[test]
    fn test_this_binding() {
        let src = r#"
            const counter = {
                count: 1,
                inc() { this.count++; return this.count; },
                later() { return [1].map(() => this.count)[0]; },
            };
            function Point(x, y) { this.x = x; this.y = y; }
            const p = new Point(1, 2);
        "#;
        assert_eq!(ok(src, "counter.inc() + counter.later() + p.x + p.y"), "7");
    }

    #[test]
    fn test_optional_chaining_and_nullish() {
        assert_eq!(ok("const o = null;", "o?.a.b.c"), "undefined");
        assert_eq!(ok("const o = { a: { b: 5 } };", "o?.a?.b ?? 0"), "5");
        assert_eq!(ok("const o = {};", "o.f?.()"), "undefined");
        assert_eq!(ok("", "null ?? 'd'"), "d");
    }

    #[test]
    fn test_operators() {
        assert_eq!(ok("", "1 + '2'"), "12");
        assert_eq!(ok("", "'3' * '4'"), "12");
        assert_eq!(ok("", "2 ** 10"), "1024");
        assert_eq!(ok("", "[1, 2] + ''"), "1,2");
        assert_eq!(ok("", "'b' > 'a' && 2 >= 2"), "true");
        assert_eq!(ok("", "'a' in { a: 1 }"), "true");
        assert_eq!(ok("", "1 == '1' && null == undefined && 1 !== '1'"), "true");
        assert_eq!(ok("let i = 5; let j = i++;", "`${i} ${j}`"), "6 5");
    }

    #[test]
    fn test_default_and_rest_params() {
        let src = "function f(a, b = 10, ...rest) { return a + b + rest.length; }";
        assert_eq!(ok(src, "f(1) + f(1, 2, 3, 4)"), "16");
    }

    #[test]
    fn test_named_function_expression_recursion() {
        let src = "const fact = function inner(n) { return n <= 1 ? 1 : n * inner(n - 1); };";
        assert_eq!(ok(src, "fact(5)"), "120");
        assert_eq!(ok("const f = () => 1;", "f.name"), "f");
    }

    #[test]
    fn test_fuel_exhaustion_is_not_catchable() {
        let limits = Limits {
            fuel: 10_000,
            ..Limits::default()
        };
        let outcome = run_with(limits, "try { while (true) {} } catch (e) {}", "1");
        assert_eq!(
            outcome.value,
            Err("Execution exceeded the step budget of 10000".to_string())
        );
    }

    #[test]
    fn test_fuel_resets_per_invocation() {
        let limits = Limits {
            fuel: 2_000,
            ..Limits::default()
        };
        let src = "function spin() { let n = 0; for (let i = 0; i < 400; i++) { n++; } return n; } spin();";
        assert_eq!(run_with(limits, src, "spin()").value, Ok("400".to_string()));
    }

    #[test]
    fn test_call_depth_is_catchable_range_error() {
        let limits = Limits {
            max_call_depth: 50,
            ..Limits::default()
        };
        let src = "function down(n) { return down(n + 1); } let msg; try { down(0); } catch (e) { msg = e.name + ': ' + e.message; }";
        assert_eq!(
            run_with(limits, src, "msg").value,
            Ok("RangeError: Maximum call stack size exceeded".to_string())
        );
    }

    #[test]
    fn test_collection_limits() {
        let limits = Limits {
            max_collection_length: 100,
            ..Limits::default()
        };
        assert_eq!(
            run_with(limits, "let s = 'x'; while (true) { s = s + s; }", "s").value,
            Err("Invalid string length".to_string())
        );
        assert_eq!(
            run_with(limits, "const a = []; a[500] = 1;", "a").value,
            Err("Invalid array length".to_string())
        );
    }

    #[test]
    fn test_cancellation_aborts() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut interp = Interpreter::new(Limits::default(), cancel, Console::new(Rc::new(Lines::default())));
        let scope = interp.new_scope();
        let program = parse_program("let a = 1;").unwrap();
        assert_eq!(
            interp.run_program(&program, &scope),
            Err(ScriptError::Aborted(AbortReason::Cancelled))
        );
    }

    #[test]
    fn test_console_lines() {
        let outcome = run_with(
            Limits::default(),
            "console.log('a', 1, [1, 2]); console.error({ k: true });",
            "0",
        );
        assert_eq!(
            outcome.logs,
            vec![
                "\"a\" 1 [\n  1,\n  2\n]".to_string(),
                "{\n  \"k\": true\n}".to_string(),
            ]
        );
    }

    #[test]
    fn test_binding_scope_accessors() {
        let mut interp = Interpreter::new(
            Limits::default(),
            CancelToken::new(),
            Console::new(Rc::new(Lines::default())),
        );
        let scope = interp.new_scope();
        let program = parse_program("var b = 1; let a = 'x';").unwrap();
        interp.run_program(&program, &scope).unwrap();
        assert_eq!(scope.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(scope.get("Math").is_none());
        assert_eq!(scope.get("b").map(|v| v.to_number()), Some(1.0));
    }
}

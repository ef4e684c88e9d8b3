//! Runtime values and lexical environments
//!
//! Arrays, objects and functions have reference semantics (`Rc`), matching
//! the identity rules of `===`. Primitive conversions (`to_number`,
//! `to_js_string`, equality) follow the familiar dynamic-language rules the
//! tests are written against.
//!
//! Containers release their contents through one worklist (`release`), so
//! dropping an arbitrarily deep chain of arrays, objects or closures never
//! recurses on the native stack.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use super::ast::FunctionDef;
use super::interpreter::{EvalResult, Interpreter};

/// Nesting bound for recursive conversions of arrays.
pub const MAX_CONVERSION_DEPTH: usize = 512;

/// Signature of a built-in function: interpreter, `this`, arguments.
pub type NativeFn = fn(&mut Interpreter, &Value, Vec<Value>) -> EvalResult;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Elements>>),
    Object(Rc<RefCell<Object>>),
    Function(Rc<Function>),
}

impl fmt::Debug for Value {
    // Shallow on purpose: reference values may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(items) => write!(f, "Array({})", items.borrow().len()),
            Value::Object(_) => write!(f, "Object"),
            Value::Function(func) => write!(f, "Function({})", func.name),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl Value {
    pub fn new_array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(Elements::from(items))))
    }

    pub fn new_object(properties: PropertyMap) -> Value {
        Value::Object(Rc::new(RefCell::new(Object {
            class: ObjectClass::Plain,
            properties,
        })))
    }

    pub fn new_error(name: &str, message: impl Into<String>) -> Value {
        Value::Object(Rc::new(RefCell::new(Object {
            class: ObjectClass::Error {
                name: name.to_string(),
                message: message.into(),
            },
            properties: PropertyMap::default(),
        })))
    }

    pub fn native(name: &str, func: NativeFn) -> Value {
        Value::Function(Rc::new(Function {
            name: name.to_string(),
            kind: FunctionKind::Native(func),
            properties: RefCell::new(PropertyMap::default()),
        }))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => {
                string_to_number(&self.to_js_string())
            }
        }
    }

    /// String conversion as performed by `String(value)` and `+` concatenation.
    pub fn to_js_string(&self) -> String {
        let mut seen = HashSet::new();
        self.stringify_into(&mut seen)
    }

    fn stringify_into(&self, seen: &mut HashSet<usize>) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => {
                let id = Rc::as_ptr(items) as usize;
                if seen.len() >= MAX_CONVERSION_DEPTH || !seen.insert(id) {
                    return String::new();
                }
                let joined = items
                    .borrow()
                    .iter()
                    .map(|item| match item {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.stringify_into(seen),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                seen.remove(&id);
                joined
            }
            Value::Object(obj) => match &obj.borrow().class {
                ObjectClass::Error { name, message } if message.is_empty() => name.clone(),
                ObjectClass::Error { name, message } => format!("{}: {}", name, message),
                ObjectClass::Plain => "[object Object]".to_string(),
            },
            Value::Function(func) => func.source_text(),
        }
    }

    /// Primitive conversion used by `+` and loose equality.
    pub fn to_primitive(&self) -> Value {
        match self {
            Value::Array(_) | Value::Object(_) | Value::Function(_) => {
                Value::from(self.to_js_string())
            }
            other => other.clone(),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => a.strict_equals(b),
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(n), Value::Str(_)) | (Value::Str(_), Value::Number(n)) => {
                let s = if matches!(self, Value::Str(_)) { self } else { other };
                *n == s.to_number()
            }
            (Value::Bool(b), rest) | (rest, Value::Bool(b)) => {
                Value::Number(f64::from(u8::from(*b))).loose_equals(rest)
            }
            (a, b) => {
                let a_ref = matches!(a, Value::Array(_) | Value::Object(_) | Value::Function(_));
                let b_ref = matches!(b, Value::Array(_) | Value::Object(_) | Value::Function(_));
                match (a_ref, b_ref) {
                    (true, false) => a.to_primitive().loose_equals(b),
                    (false, true) => a.loose_equals(&b.to_primitive()),
                    _ => false,
                }
            }
        }
    }
}

/// Convert a number the way `String(n)` does: integers without a fraction,
/// `NaN`, `Infinity`, exponent notation outside `[1e-6, 1e21)`.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if !(1e-6..1e21).contains(&abs) {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        };
    }
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parse a numeric string the way `Number(s)` does.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map(|v| v as f64).unwrap_or(f64::NAN);
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Canonical array index for a property key, if it is one.
pub fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Backing storage of an array value.
#[derive(Debug, Default)]
pub struct Elements(Vec<Value>);

impl Deref for Elements {
    type Target = Vec<Value>;

    fn deref(&self) -> &Vec<Value> {
        &self.0
    }
}

impl DerefMut for Elements {
    fn deref_mut(&mut self) -> &mut Vec<Value> {
        &mut self.0
    }
}

impl From<Vec<Value>> for Elements {
    fn from(items: Vec<Value>) -> Self {
        Elements(items)
    }
}

impl FromIterator<Value> for Elements {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Elements(iter.into_iter().collect())
    }
}

impl Drop for Elements {
    fn drop(&mut self) {
        release(mem::take(&mut self.0), Vec::new());
    }
}

/// Drop `values` and `envs` iteratively. A container whose last reference
/// is being dropped hands its contents to the worklist instead of dropping
/// them in place.
fn release(mut values: Vec<Value>, mut envs: Vec<Rc<Env>>) {
    loop {
        if let Some(value) = values.pop() {
            match value {
                Value::Array(items) => {
                    if let Ok(cell) = Rc::try_unwrap(items) {
                        values.append(&mut cell.into_inner().0);
                    }
                }
                Value::Object(object) => {
                    if let Ok(cell) = Rc::try_unwrap(object) {
                        values.append(&mut cell.into_inner().properties.take_values());
                    }
                }
                Value::Function(func) => {
                    if let Ok(mut func) = Rc::try_unwrap(func) {
                        values.append(&mut func.properties.get_mut().take_values());
                        envs.extend(func.detach());
                    }
                }
                _ => {}
            }
        } else if let Some(env) = envs.pop() {
            if let Ok(mut env) = Rc::try_unwrap(env) {
                values.append(&mut env.take_values());
                envs.extend(env.parent.take());
            }
        } else {
            break;
        }
    }
}

/// Insertion-ordered string-keyed property storage.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl PropertyMap {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Empty the map, returning its values.
    pub fn take_values(&mut self) -> Vec<Value> {
        self.index.clear();
        mem::take(&mut self.entries)
            .into_iter()
            .map(|(_, value)| value)
            .collect()
    }
}

impl FromIterator<(String, Value)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = PropertyMap::default();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectClass {
    Plain,
    /// `name` and `message` live here so they stay out of key enumeration
    Error { name: String, message: String },
}

#[derive(Debug)]
pub struct Object {
    pub class: ObjectClass,
    pub properties: PropertyMap,
}

impl Object {
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.properties.get(key) {
            return Some(value.clone());
        }
        match (&self.class, key) {
            (ObjectClass::Error { name, .. }, "name") => Some(Value::from(name.as_str())),
            (ObjectClass::Error { message, .. }, "message") => Some(Value::from(message.as_str())),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: Value) {
        match (&mut self.class, key) {
            (ObjectClass::Error { name, .. }, "name") => *name = value.to_js_string(),
            (ObjectClass::Error { message, .. }, "message") => *message = value.to_js_string(),
            _ => self.properties.set(key, value),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.class, ObjectClass::Error { .. })
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        release(self.properties.take_values(), Vec::new());
    }
}

pub enum FunctionKind {
    Closure { def: Rc<FunctionDef>, env: Rc<Env> },
    Native(NativeFn),
}

pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    /// Static members such as `Number.isInteger`
    pub properties: RefCell<PropertyMap>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("name", &self.name).finish()
    }
}

impl Function {
    pub fn source_text(&self) -> String {
        match &self.kind {
            FunctionKind::Closure { def, .. } => def.source.clone(),
            FunctionKind::Native(_) => format!("function {}() {{ [native code] }}", self.name),
        }
    }

    pub fn arity(&self) -> usize {
        match &self.kind {
            FunctionKind::Closure { def, .. } => {
                def.params.iter().take_while(|p| p.default.is_none()).count()
            }
            FunctionKind::Native(_) => 0,
        }
    }

    pub fn is_arrow(&self) -> bool {
        matches!(&self.kind, FunctionKind::Closure { def, .. } if def.is_arrow)
    }

    /// Take the captured environment out of a closure that is being dropped.
    fn detach(&mut self) -> Option<Rc<Env>> {
        match mem::replace(&mut self.kind, FunctionKind::Native(detached)) {
            FunctionKind::Closure { env, .. } => Some(env),
            FunctionKind::Native(_) => None,
        }
    }
}

fn detached(_: &mut Interpreter, _: &Value, _: Vec<Value>) -> EvalResult {
    Ok(Value::Undefined)
}

impl Drop for Function {
    fn drop(&mut self) {
        let values = self.properties.get_mut().take_values();
        release(values, self.detach().into_iter().collect());
    }
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Built-ins; never written by scripts
    Intrinsics,
    /// The per-run binding scope
    Global,
    /// A function body; receives `var` declarations
    Function,
    /// A `{}` block or loop head
    Block,
}

/// Why an assignment to an existing name failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignError {
    NotFound,
    Constant,
}

/// One link in the lexical scope chain.
#[derive(Debug)]
pub struct Env {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Env>>,
    kind: ScopeKind,
    /// `this` for function scopes; arrow functions leave it unset
    this: Option<Value>,
}

impl Env {
    pub fn intrinsics() -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            kind: ScopeKind::Intrinsics,
            this: None,
        })
    }

    pub fn new(parent: &Rc<Env>, kind: ScopeKind, this: Option<Value>) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
            kind,
            this,
        })
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        if let Some(binding) = self.vars.borrow_mut().get_mut(name) {
            if !binding.mutable {
                return Err(AssignError::Constant);
            }
            binding.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) if parent.kind != ScopeKind::Intrinsics => parent.assign(name, value),
            _ => Err(AssignError::NotFound),
        }
    }

    /// The binding scope at the top of this chain.
    pub fn global_scope(self: &Rc<Self>) -> Rc<Env> {
        let mut env = Rc::clone(self);
        while env.kind != ScopeKind::Global {
            match &env.parent {
                Some(parent) if parent.kind != ScopeKind::Intrinsics => env = Rc::clone(parent),
                _ => break,
            }
        }
        env
    }

    /// Copy of this scope with the same parent, used for per-iteration loop bindings.
    pub fn fork(&self) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(self.vars.borrow().clone()),
            parent: self.parent.clone(),
            kind: self.kind,
            this: self.this.clone(),
        })
    }

    /// Nearest scope that receives `var` declarations.
    pub fn var_scope(self: &Rc<Self>) -> Rc<Env> {
        let mut env = Rc::clone(self);
        loop {
            if matches!(env.kind, ScopeKind::Function | ScopeKind::Global) {
                return env;
            }
            match &env.parent {
                Some(parent) => env = Rc::clone(parent),
                None => return env,
            }
        }
    }

    pub fn this_value(&self) -> Value {
        if let Some(this) = &self.this {
            return this.clone();
        }
        match &self.parent {
            Some(parent) => parent.this_value(),
            None => Value::Undefined,
        }
    }

    /// Names bound directly in this scope, sorted for stable output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every binding, breaking closure reference cycles through this scope.
    pub fn clear(&self) {
        let drained: Vec<Value> = self.vars.borrow_mut().drain().map(|(_, b)| b.value).collect();
        release(drained, Vec::new());
    }

    fn take_values(&mut self) -> Vec<Value> {
        let mut values: Vec<Value> = self.vars.get_mut().drain().map(|(_, b)| b.value).collect();
        values.extend(self.this.take());
        values
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        let values = self.take_values();
        release(values, self.parent.take().into_iter().collect());
    }
}

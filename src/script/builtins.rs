//! Built-in globals and the method tables behind primitive values

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::console::ConsoleLevel;
use super::interpreter::{enumerable_keys, EvalResult, Interpreter, Interrupt};
use super::json::{self, JsonError};
use super::value::{
    number_to_string, Elements, Function, FunctionKind, NativeFn, PropertyMap, Value,
    MAX_CONVERSION_DEPTH,
};

type Array = Rc<RefCell<Elements>>;

pub(crate) fn install(interp: &mut Interpreter) {
    interp.define_global("NaN", Value::Number(f64::NAN));
    interp.define_global("Infinity", Value::Number(f64::INFINITY));
    interp.define_global("console", namespace(CONSOLE, &[]));
    interp.define_global(
        "Math",
        namespace(
            MATH,
            &[
                ("PI", Value::Number(std::f64::consts::PI)),
                ("E", Value::Number(std::f64::consts::E)),
            ],
        ),
    );
    interp.define_global("JSON", namespace(JSON, &[]));
    interp.define_global("Date", namespace(DATE, &[]));
    interp.define_global("Object", constructor("Object", object_ctor, OBJECT_STATICS, &[]));
    interp.define_global("Array", constructor("Array", array_ctor, ARRAY_STATICS, &[]));
    interp.define_global(
        "Number",
        constructor(
            "Number",
            number_ctor,
            NUMBER_STATICS,
            &[
                ("MAX_SAFE_INTEGER", Value::Number(9_007_199_254_740_991.0)),
                ("MIN_SAFE_INTEGER", Value::Number(-9_007_199_254_740_991.0)),
                ("EPSILON", Value::Number(f64::EPSILON)),
                ("POSITIVE_INFINITY", Value::Number(f64::INFINITY)),
                ("NEGATIVE_INFINITY", Value::Number(f64::NEG_INFINITY)),
            ],
        ),
    );
    interp.define_global(
        "String",
        constructor("String", string_ctor, STRING_STATICS, &[]),
    );
    interp.define_global("Boolean", Value::native("Boolean", boolean_ctor));
    for (name, func) in GLOBAL_FUNCTIONS {
        interp.define_global(name, Value::native(name, *func));
    }

    interp.prototypes.string = table(STRING_METHODS);
    interp.prototypes.array = table(ARRAY_METHODS);
    interp.prototypes.number = table(NUMBER_METHODS);
    interp.prototypes.object = table(OBJECT_METHODS);
    interp.prototypes.function = table(FUNCTION_METHODS);
}

fn table(methods: &[(&str, NativeFn)]) -> PropertyMap {
    methods
        .iter()
        .map(|(name, func)| (name.to_string(), Value::native(name, *func)))
        .collect()
}

fn namespace(methods: &[(&str, NativeFn)], constants: &[(&str, Value)]) -> Value {
    let mut properties = table(methods);
    for (name, value) in constants {
        properties.set(*name, value.clone());
    }
    Value::new_object(properties)
}

fn constructor(
    name: &str,
    func: NativeFn,
    statics: &[(&str, NativeFn)],
    constants: &[(&str, Value)],
) -> Value {
    let mut properties = table(statics);
    for (key, value) in constants {
        properties.set(*key, value.clone());
    }
    Value::Function(Rc::new(Function {
        name: name.to_string(),
        kind: FunctionKind::Native(func),
        properties: RefCell::new(properties),
    }))
}

const CONSOLE: &[(&str, NativeFn)] = &[
    ("log", console_log),
    ("info", console_info),
    ("debug", console_debug),
    ("warn", console_warn),
    ("error", console_error),
];

const MATH: &[(&str, NativeFn)] = &[
    ("abs", math_abs),
    ("floor", math_floor),
    ("ceil", math_ceil),
    ("round", math_round),
    ("trunc", math_trunc),
    ("sign", math_sign),
    ("sqrt", math_sqrt),
    ("cbrt", math_cbrt),
    ("log", math_log),
    ("log2", math_log2),
    ("log10", math_log10),
    ("exp", math_exp),
    ("pow", math_pow),
    ("min", math_min),
    ("max", math_max),
    ("random", math_random),
];

const JSON: &[(&str, NativeFn)] = &[("stringify", json_stringify), ("parse", json_parse)];

const DATE: &[(&str, NativeFn)] = &[("now", date_now)];

const STRING_STATICS: &[(&str, NativeFn)] = &[("fromCharCode", string_from_char_code)];

const OBJECT_STATICS: &[(&str, NativeFn)] = &[
    ("keys", object_keys),
    ("values", object_values),
    ("entries", object_entries),
    ("assign", object_assign),
    ("fromEntries", object_from_entries),
];

const ARRAY_STATICS: &[(&str, NativeFn)] = &[
    ("isArray", array_is_array),
    ("from", array_from),
    ("of", array_of),
];

const NUMBER_STATICS: &[(&str, NativeFn)] = &[
    ("isInteger", number_is_integer),
    ("isFinite", number_is_finite),
    ("isNaN", number_is_nan),
    ("parseInt", parse_int),
    ("parseFloat", parse_float),
];

const GLOBAL_FUNCTIONS: &[(&str, NativeFn)] = &[
    ("parseInt", parse_int),
    ("parseFloat", parse_float),
    ("isNaN", global_is_nan),
    ("isFinite", global_is_finite),
    ("Error", error_ctor),
    ("TypeError", type_error_ctor),
    ("RangeError", range_error_ctor),
    ("ReferenceError", reference_error_ctor),
    ("SyntaxError", syntax_error_ctor),
];

const STRING_METHODS: &[(&str, NativeFn)] = &[
    ("charAt", string_char_at),
    ("charCodeAt", string_char_code_at),
    ("indexOf", string_index_of),
    ("lastIndexOf", string_last_index_of),
    ("includes", string_includes),
    ("startsWith", string_starts_with),
    ("endsWith", string_ends_with),
    ("slice", string_slice),
    ("substring", string_substring),
    ("toUpperCase", string_to_upper_case),
    ("toLowerCase", string_to_lower_case),
    ("trim", string_trim),
    ("trimStart", string_trim_start),
    ("trimEnd", string_trim_end),
    ("split", string_split),
    ("repeat", string_repeat),
    ("replace", string_replace),
    ("replaceAll", string_replace_all),
    ("padStart", string_pad_start),
    ("padEnd", string_pad_end),
    ("concat", string_concat),
    ("at", string_at),
    ("toString", string_to_string),
    ("valueOf", string_to_string),
];

const ARRAY_METHODS: &[(&str, NativeFn)] = &[
    ("push", array_push),
    ("pop", array_pop),
    ("shift", array_shift),
    ("unshift", array_unshift),
    ("slice", array_slice),
    ("splice", array_splice),
    ("indexOf", array_index_of),
    ("lastIndexOf", array_last_index_of),
    ("includes", array_includes),
    ("join", array_join),
    ("toString", array_join),
    ("reverse", array_reverse),
    ("concat", array_concat),
    ("map", array_map),
    ("filter", array_filter),
    ("reduce", array_reduce),
    ("forEach", array_for_each),
    ("some", array_some),
    ("every", array_every),
    ("find", array_find),
    ("findIndex", array_find_index),
    ("sort", array_sort),
    ("flat", array_flat),
    ("fill", array_fill),
    ("at", array_at),
];

const NUMBER_METHODS: &[(&str, NativeFn)] = &[
    ("toFixed", number_to_fixed),
    ("toString", number_to_string_method),
    ("valueOf", number_value_of),
];

const OBJECT_METHODS: &[(&str, NativeFn)] = &[
    ("hasOwnProperty", object_has_own_property),
    ("toString", object_to_string),
];

const FUNCTION_METHODS: &[(&str, NativeFn)] = &[
    ("call", function_call),
    ("apply", function_apply),
    ("toString", object_to_string),
];

// -- helpers --------------------------------------------------------------

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

fn to_integer(value: &Value) -> f64 {
    let n = value.to_number();
    if n.is_nan() {
        0.0
    } else {
        n.trunc()
    }
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = to_integer(value);
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn this_string(interp: &Interpreter, this: &Value, method: &str) -> Result<Rc<str>, Interrupt> {
    match this {
        Value::Str(s) => Ok(Rc::clone(s)),
        Value::Undefined | Value::Null => Err(interp.type_error(format!(
            "String.prototype.{} called on null or undefined",
            method
        ))),
        other => Ok(Rc::from(other.to_js_string())),
    }
}

fn this_array(interp: &Interpreter, this: &Value, method: &str) -> Result<Array, Interrupt> {
    match this {
        Value::Array(items) => Ok(Rc::clone(items)),
        _ => Err(interp.type_error(format!(
            "Array.prototype.{} called on incompatible receiver",
            method
        ))),
    }
}

fn callback(interp: &Interpreter, args: &[Value]) -> Result<Value, Interrupt> {
    match arg(args, 0) {
        f @ Value::Function(_) => Ok(f),
        other => Err(interp.type_error(format!("{} is not a function", other.to_js_string()))),
    }
}

fn element(items: &Array, index: usize) -> Option<Value> {
    items.borrow().get(index).cloned()
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

fn byte_offset(s: &str, char_index: usize) -> usize {
    s.char_indices().nth(char_index).map_or(s.len(), |(b, _)| b)
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn bulk_cost(len: usize) -> u64 {
    (len / 64) as u64
}

pub(crate) fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (exponent.is_infinite() && base.abs() == 1.0) {
        f64::NAN
    } else {
        base.powf(exponent)
    }
}

fn js_round(n: f64) -> f64 {
    if !n.is_finite() {
        return n;
    }
    let floor = n.floor();
    if n - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    }
}

// -- console --------------------------------------------------------------

fn emit(interp: &mut Interpreter, level: ConsoleLevel, args: Vec<Value>) -> EvalResult {
    let size: usize = args.iter().map(render_size).sum();
    interp.charge(1 + bulk_cost(size))?;
    interp.console().emit(level, &args);
    Ok(Value::Undefined)
}

/// Rough size of an argument's rendering, used to price console output.
fn render_size(value: &Value) -> usize {
    match value {
        Value::Str(s) => s.len(),
        Value::Array(items) => items.borrow().len(),
        Value::Object(obj) => obj.borrow().properties.len(),
        _ => 1,
    }
}

fn console_log(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    emit(interp, ConsoleLevel::Log, args)
}

fn console_info(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    emit(interp, ConsoleLevel::Info, args)
}

fn console_debug(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    emit(interp, ConsoleLevel::Debug, args)
}

fn console_warn(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    emit(interp, ConsoleLevel::Warn, args)
}

fn console_error(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    emit(interp, ConsoleLevel::Error, args)
}

// -- Math -----------------------------------------------------------------

fn unary(args: &[Value], f: fn(f64) -> f64) -> EvalResult {
    Ok(Value::Number(f(arg(args, 0).to_number())))
}

fn math_abs(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, f64::abs)
}

fn math_floor(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, f64::floor)
}

fn math_ceil(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, f64::ceil)
}

fn math_round(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, js_round)
}

fn math_trunc(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, f64::trunc)
}

fn math_sign(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, |n| if n.is_nan() || n == 0.0 { n } else { n.signum() })
}

fn math_sqrt(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, f64::sqrt)
}

fn math_cbrt(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, f64::cbrt)
}

fn math_log(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, f64::ln)
}

fn math_log2(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, f64::log2)
}

fn math_log10(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, f64::log10)
}

fn math_exp(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    unary(&args, f64::exp)
}

fn math_pow(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::Number(js_pow(
        arg(&args, 0).to_number(),
        arg(&args, 1).to_number(),
    )))
}

fn fold_numbers(args: &[Value], init: f64, pick: fn(f64, f64) -> f64) -> EvalResult {
    let mut out = init;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        out = pick(out, n);
    }
    Ok(Value::Number(out))
}

fn math_min(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    fold_numbers(&args, f64::INFINITY, f64::min)
}

fn math_max(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    fold_numbers(&args, f64::NEG_INFINITY, f64::max)
}

fn math_random(_: &mut Interpreter, _: &Value, _: Vec<Value>) -> EvalResult {
    Ok(Value::Number(rand::random::<f64>()))
}

fn date_now(_: &mut Interpreter, _: &Value, _: Vec<Value>) -> EvalResult {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0);
    Ok(Value::Number(millis))
}

// -- JSON -----------------------------------------------------------------

fn json_stringify(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    let indent = match arg(&args, 2) {
        Value::Number(n) => " ".repeat(n.clamp(0.0, 10.0) as usize),
        Value::Str(s) => s.chars().take(10).collect(),
        _ => String::new(),
    };
    match json::stringify(&arg(&args, 0), &indent) {
        Ok(Some(text)) => {
            interp.check_string_length(text.len())?;
            Ok(Value::from(text))
        }
        Ok(None) => Ok(Value::Undefined),
        Err(err) => Err(interp.type_error(err.to_string())),
    }
}

fn json_parse(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    let text = arg(&args, 0).to_js_string();
    interp.charge(bulk_cost(text.len()))?;
    json::parse(&text).map_err(|err| match err {
        JsonError::Serde(err) => interp.error(
            "SyntaxError",
            format!("Unexpected token in JSON at line {} column {}", err.line(), err.column()),
        ),
        other => interp.error("SyntaxError", other.to_string()),
    })
}

// -- Object ---------------------------------------------------------------

fn object_ctor(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(match arg(&args, 0) {
        value @ (Value::Object(_) | Value::Array(_) | Value::Function(_)) => value,
        _ => Value::new_object(PropertyMap::default()),
    })
}

fn require_object(interp: &Interpreter, value: &Value) -> Result<(), Interrupt> {
    if value.is_nullish() {
        return Err(interp.type_error("Cannot convert undefined or null to object"));
    }
    Ok(())
}

fn object_keys(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    let target = arg(&args, 0);
    require_object(interp, &target)?;
    Ok(Value::new_array(
        enumerable_keys(&target).into_iter().map(Value::from).collect(),
    ))
}

fn object_values(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    let target = arg(&args, 0);
    require_object(interp, &target)?;
    let mut values = Vec::new();
    for key in enumerable_keys(&target) {
        values.push(interp.get_property(&target, &key)?);
    }
    Ok(Value::new_array(values))
}

fn object_entries(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    let target = arg(&args, 0);
    require_object(interp, &target)?;
    let mut entries = Vec::new();
    for key in enumerable_keys(&target) {
        let value = interp.get_property(&target, &key)?;
        entries.push(Value::new_array(vec![Value::from(key), value]));
    }
    Ok(Value::new_array(entries))
}

fn object_assign(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    let target = arg(&args, 0);
    require_object(interp, &target)?;
    for source in args.iter().skip(1) {
        for key in enumerable_keys(source) {
            let value = interp.get_property(source, &key)?;
            interp.set_property(&target, &key, value)?;
        }
    }
    Ok(target)
}

fn object_from_entries(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    let Value::Array(entries) = arg(&args, 0) else {
        return Err(interp.type_error("Object.fromEntries requires an array of entries"));
    };
    let mut properties = PropertyMap::default();
    for entry in entries.borrow().iter() {
        let Value::Array(pair) = entry else {
            return Err(interp.type_error(format!(
                "Iterator value {} is not an entry object",
                entry.to_js_string()
            )));
        };
        let pair = pair.borrow();
        let key = pair.first().cloned().unwrap_or(Value::Undefined);
        properties.set(key.to_js_string(), pair.get(1).cloned().unwrap_or(Value::Undefined));
    }
    Ok(Value::new_object(properties))
}

fn object_has_own_property(_: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let key = arg(&args, 0).to_js_string();
    let found = match this {
        Value::Object(obj) => {
            let obj = obj.borrow();
            obj.properties.contains(&key) || (obj.is_error() && key == "message")
        }
        Value::Function(func) => func.properties.borrow().contains(&key),
        _ => false,
    };
    Ok(Value::Bool(found))
}

fn object_to_string(_: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    Ok(Value::from(this.to_js_string()))
}

// -- Function -------------------------------------------------------------

fn function_call(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let mut args = args.into_iter();
    let receiver = args.next().unwrap_or(Value::Undefined);
    interp.call_function(this, receiver, args.collect())
}

fn function_apply(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let call_args = match arg(&args, 1) {
        Value::Array(items) => items.borrow().to_vec(),
        Value::Undefined | Value::Null => Vec::new(),
        _ => return Err(interp.type_error("CreateListFromArrayLike called on non-object")),
    };
    interp.call_function(this, arg(&args, 0), call_args)
}

// -- Array ----------------------------------------------------------------

fn array_ctor(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    if let [Value::Number(n)] = args.as_slice() {
        if *n < 0.0 || n.fract() != 0.0 || n.is_nan() {
            return Err(interp.range_error("Invalid array length"));
        }
        interp.check_array_length(*n as usize)?;
        return Ok(Value::new_array(vec![Value::Undefined; *n as usize]));
    }
    Ok(Value::new_array(args))
}

fn array_is_array(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_))))
}

fn array_from(interp: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    let source = arg(&args, 0);
    let items: Vec<Value> = match &source {
        Value::Array(items) => items.borrow().to_vec(),
        Value::Str(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
        Value::Object(_) => {
            let len = interp.get_property(&source, "length")?.to_number();
            let len = if len.is_nan() || len < 0.0 { 0 } else { len as usize };
            interp.check_array_length(len)?;
            vec![Value::Undefined; len]
        }
        Value::Undefined | Value::Null => {
            return Err(interp.type_error(format!(
                "{} is not iterable",
                source.to_js_string()
            )));
        }
        _ => Vec::new(),
    };
    let mapper = arg(&args, 1);
    if !matches!(mapper, Value::Function(_)) {
        return Ok(Value::new_array(items));
    }
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        out.push(interp.call_function(&mapper, Value::Undefined, vec![item, Value::from(index)])?);
    }
    Ok(Value::new_array(out))
}

fn array_of(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::new_array(args))
}

fn array_push(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "push")?;
    let len = items.borrow().len() + args.len();
    interp.check_array_length(len)?;
    items.borrow_mut().extend(args);
    Ok(Value::from(len))
}

fn array_pop(interp: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "pop")?;
    let popped = items.borrow_mut().pop();
    Ok(popped.unwrap_or(Value::Undefined))
}

fn array_shift(interp: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "shift")?;
    let mut items = items.borrow_mut();
    if items.is_empty() {
        return Ok(Value::Undefined);
    }
    Ok(items.remove(0))
}

fn array_unshift(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "unshift")?;
    let len = items.borrow().len() + args.len();
    interp.check_array_length(len)?;
    items.borrow_mut().splice(0..0, args);
    Ok(Value::from(len))
}

fn array_slice(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "slice")?;
    let items = items.borrow();
    let start = relative_index(&arg(&args, 0), items.len(), 0);
    let end = relative_index(&arg(&args, 1), items.len(), items.len());
    let slice = if start < end {
        items[start..end].to_vec()
    } else {
        Vec::new()
    };
    Ok(Value::new_array(slice))
}

fn array_splice(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "splice")?;
    let len = items.borrow().len();
    let start = relative_index(&arg(&args, 0), len, 0);
    let delete_count = match args.len() {
        0 => 0,
        1 => len - start,
        _ => (to_integer(&args[1]).max(0.0) as usize).min(len - start),
    };
    let inserted: Vec<Value> = args.into_iter().skip(2).collect();
    interp.check_array_length(len - delete_count + inserted.len())?;
    let removed: Vec<Value> = items
        .borrow_mut()
        .splice(start..start + delete_count, inserted)
        .collect();
    Ok(Value::new_array(removed))
}

fn array_index_of(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "indexOf")?;
    let items = items.borrow();
    let target = arg(&args, 0);
    let from = relative_index(&arg(&args, 1), items.len(), 0);
    let found = items
        .iter()
        .skip(from)
        .position(|item| item.strict_equals(&target))
        .map_or(-1.0, |i| (i + from) as f64);
    Ok(Value::Number(found))
}

fn array_last_index_of(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "lastIndexOf")?;
    let target = arg(&args, 0);
    let found = items
        .borrow()
        .iter()
        .rposition(|item| item.strict_equals(&target))
        .map_or(-1.0, |i| i as f64);
    Ok(Value::Number(found))
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

fn array_includes(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "includes")?;
    let items = items.borrow();
    let target = arg(&args, 0);
    let from = relative_index(&arg(&args, 1), items.len(), 0);
    Ok(Value::Bool(
        items.iter().skip(from).any(|item| same_value_zero(item, &target)),
    ))
}

fn array_join(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "join")?;
    let separator = match arg(&args, 0) {
        Value::Undefined => ",".to_string(),
        other => other.to_js_string(),
    };
    let snapshot = items.borrow().to_vec();
    interp.charge(bulk_cost(snapshot.len()))?;
    let mut out = String::new();
    for (index, item) in snapshot.iter().enumerate() {
        if index > 0 {
            out.push_str(&separator);
        }
        if !item.is_nullish() {
            out.push_str(&item.to_js_string());
        }
        interp.check_string_length(out.len())?;
    }
    Ok(Value::from(out))
}

fn array_reverse(interp: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "reverse")?;
    items.borrow_mut().reverse();
    Ok(this.clone())
}

fn array_concat(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "concat")?;
    let mut out = items.borrow().to_vec();
    for value in args {
        match value {
            Value::Array(other) => out.extend(other.borrow().iter().cloned()),
            other => out.push(other),
        }
        interp.check_array_length(out.len())?;
    }
    Ok(Value::new_array(out))
}

/// Call `f(item, index, array)` for each element still present, stopping
/// early when `visit` returns `Some`.
fn each<T>(
    interp: &mut Interpreter,
    this: &Value,
    args: &[Value],
    method: &str,
    mut visit: impl FnMut(Value, usize, Value) -> Option<T>,
) -> Result<Option<T>, Interrupt> {
    let items = this_array(interp, this, method)?;
    let f = callback(interp, args)?;
    let receiver = arg(args, 1);
    let len = items.borrow().len();
    for index in 0..len {
        let Some(item) = element(&items, index) else {
            break;
        };
        let result = interp.call_function(
            &f,
            receiver.clone(),
            vec![item.clone(), Value::from(index), this.clone()],
        )?;
        if let Some(done) = visit(item, index, result) {
            return Ok(Some(done));
        }
    }
    Ok(None)
}

fn array_map(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let mut out = Vec::new();
    each(interp, this, &args, "map", |_, _, result| {
        out.push(result);
        None::<()>
    })?;
    Ok(Value::new_array(out))
}

fn array_filter(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let mut out = Vec::new();
    each(interp, this, &args, "filter", |item, _, result| {
        if result.is_truthy() {
            out.push(item);
        }
        None::<()>
    })?;
    Ok(Value::new_array(out))
}

fn array_for_each(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    each(interp, this, &args, "forEach", |_, _, _| None::<()>)?;
    Ok(Value::Undefined)
}

fn array_some(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let hit = each(interp, this, &args, "some", |_, _, result| result.is_truthy().then_some(()))?;
    Ok(Value::Bool(hit.is_some()))
}

fn array_every(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let miss = each(interp, this, &args, "every", |_, _, result| (!result.is_truthy()).then_some(()))?;
    Ok(Value::Bool(miss.is_none()))
}

fn array_find(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let found = each(interp, this, &args, "find", |item, _, result| result.is_truthy().then_some(item))?;
    Ok(found.unwrap_or(Value::Undefined))
}

fn array_find_index(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let found = each(interp, this, &args, "findIndex", |_, index, result| {
        result.is_truthy().then_some(index)
    })?;
    Ok(Value::Number(found.map_or(-1.0, |i| i as f64)))
}

fn array_reduce(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "reduce")?;
    let f = callback(interp, &args)?;
    let len = items.borrow().len();
    let mut index = 0;
    let mut acc = if args.len() >= 2 {
        args[1].clone()
    } else {
        index = 1;
        element(&items, 0)
            .ok_or_else(|| interp.type_error("Reduce of empty array with no initial value"))?
    };
    while index < len {
        let Some(item) = element(&items, index) else {
            break;
        };
        acc = interp.call_function(
            &f,
            Value::Undefined,
            vec![acc, item, Value::from(index), this.clone()],
        )?;
        index += 1;
    }
    Ok(acc)
}

fn sort_compare(interp: &mut Interpreter, a: &Value, b: &Value, compare: &Value) -> Result<Ordering, Interrupt> {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => return Ok(Ordering::Equal),
        (Value::Undefined, _) => return Ok(Ordering::Greater),
        (_, Value::Undefined) => return Ok(Ordering::Less),
        _ => {}
    }
    if !matches!(compare, Value::Function(_)) {
        return Ok(a.to_js_string().cmp(&b.to_js_string()));
    }
    let n = interp
        .call_function(compare, Value::Undefined, vec![a.clone(), b.clone()])?
        .to_number();
    Ok(if n < 0.0 {
        Ordering::Less
    } else if n > 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    })
}

/// Stable merge sort that tolerates inconsistent comparators and lets the
/// comparator fail.
fn merge_sort(interp: &mut Interpreter, mut items: Vec<Value>, compare: &Value) -> Result<Vec<Value>, Interrupt> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(interp, items, compare)?;
    let right = merge_sort(interp, right, compare)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(a), Some(b)) => sort_compare(interp, a, b, compare)? == Ordering::Greater,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        merged.extend(if take_right { right.next() } else { left.next() });
    }
    Ok(merged)
}

fn array_sort(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "sort")?;
    let compare = arg(&args, 0);
    if !matches!(compare, Value::Undefined | Value::Function(_)) {
        return Err(interp.type_error(
            "The comparison function must be either a function or undefined",
        ));
    }
    let snapshot = items.borrow().to_vec();
    interp.charge(bulk_cost(snapshot.len()))?;
    let sorted = merge_sort(interp, snapshot, &compare)?;
    **items.borrow_mut() = sorted;
    Ok(this.clone())
}

fn flatten_into(interp: &Interpreter, items: &[Value], depth: f64, out: &mut Vec<Value>) -> Result<(), Interrupt> {
    for item in items {
        match item {
            Value::Array(inner) if depth >= 1.0 => {
                let inner = inner.borrow().to_vec();
                flatten_into(interp, &inner, depth - 1.0, out)?;
            }
            other => out.push(other.clone()),
        }
        interp.check_array_length(out.len())?;
    }
    Ok(())
}

fn array_flat(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "flat")?;
    let depth = match arg(&args, 0) {
        Value::Undefined => 1.0,
        other => to_integer(&other).min(MAX_CONVERSION_DEPTH as f64),
    };
    let snapshot = items.borrow().to_vec();
    let mut out = Vec::new();
    flatten_into(interp, &snapshot, depth, &mut out)?;
    Ok(Value::new_array(out))
}

fn array_fill(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "fill")?;
    let value = arg(&args, 0);
    {
        let mut items = items.borrow_mut();
        let len = items.len();
        let start = relative_index(&arg(&args, 1), len, 0);
        let end = relative_index(&arg(&args, 2), len, len);
        for slot in items.iter_mut().take(end).skip(start) {
            *slot = value.clone();
        }
    }
    Ok(this.clone())
}

fn array_at(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let items = this_array(interp, this, "at")?;
    let items = items.borrow();
    let n = to_integer(&arg(&args, 0));
    let index = if n < 0.0 { items.len() as f64 + n } else { n };
    if index < 0.0 {
        return Ok(Value::Undefined);
    }
    Ok(items.get(index as usize).cloned().unwrap_or(Value::Undefined))
}

// -- String ---------------------------------------------------------------

fn string_ctor(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(match args.first() {
        Some(value) => Value::from(value.to_js_string()),
        None => Value::from(""),
    })
}

fn string_from_char_code(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    let text: String = args
        .iter()
        .filter_map(|code| char::from_u32(to_integer(code) as u32 & 0xFFFF))
        .collect();
    Ok(Value::from(text))
}

fn string_char_at(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "charAt")?;
    let index = to_integer(&arg(&args, 0));
    if index < 0.0 {
        return Ok(Value::from(""));
    }
    Ok(Value::from(
        s.chars().nth(index as usize).map(String::from).unwrap_or_default(),
    ))
}

fn string_char_code_at(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "charCodeAt")?;
    let index = to_integer(&arg(&args, 0));
    if index < 0.0 {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(
        s.chars().nth(index as usize).map_or(f64::NAN, |c| f64::from(c as u32)),
    ))
}

fn find_from(s: &str, needle: &str, from: usize) -> Option<usize> {
    let start = byte_offset(s, from);
    s[start..].find(needle).map(|b| char_count(&s[..start + b]))
}

fn string_index_of(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "indexOf")?;
    interp.charge(bulk_cost(s.len()))?;
    let needle = arg(&args, 0).to_js_string();
    let from = relative_index(&arg(&args, 1), char_count(&s), 0);
    Ok(Value::Number(
        find_from(&s, &needle, from).map_or(-1.0, |i| i as f64),
    ))
}

fn string_last_index_of(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "lastIndexOf")?;
    let needle = arg(&args, 0).to_js_string();
    Ok(Value::Number(
        s.rfind(needle.as_str()).map_or(-1.0, |b| char_count(&s[..b]) as f64),
    ))
}

fn string_includes(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "includes")?;
    interp.charge(bulk_cost(s.len()))?;
    let needle = arg(&args, 0).to_js_string();
    let from = relative_index(&arg(&args, 1), char_count(&s), 0);
    Ok(Value::Bool(find_from(&s, &needle, from).is_some()))
}

fn string_starts_with(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "startsWith")?;
    let needle = arg(&args, 0).to_js_string();
    let from = relative_index(&arg(&args, 1), char_count(&s), 0);
    Ok(Value::Bool(s[byte_offset(&s, from)..].starts_with(needle.as_str())))
}

fn string_ends_with(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "endsWith")?;
    let needle = arg(&args, 0).to_js_string();
    let len = char_count(&s);
    let end = relative_index(&arg(&args, 1), len, len);
    Ok(Value::Bool(s[..byte_offset(&s, end)].ends_with(needle.as_str())))
}

fn string_slice(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "slice")?;
    let len = char_count(&s);
    let start = relative_index(&arg(&args, 0), len, 0);
    let end = relative_index(&arg(&args, 1), len, len);
    Ok(Value::from(char_slice(&s, start, end)))
}

fn string_substring(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "substring")?;
    let len = char_count(&s);
    let clamp = |value: &Value, default: usize| match value {
        Value::Undefined => default,
        other => to_integer(other).clamp(0.0, len as f64) as usize,
    };
    let a = clamp(&arg(&args, 0), 0);
    let b = clamp(&arg(&args, 1), len);
    Ok(Value::from(char_slice(&s, a.min(b), a.max(b))))
}

fn string_to_upper_case(interp: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    Ok(Value::from(this_string(interp, this, "toUpperCase")?.to_uppercase()))
}

fn string_to_lower_case(interp: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    Ok(Value::from(this_string(interp, this, "toLowerCase")?.to_lowercase()))
}

fn string_trim(interp: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    Ok(Value::from(this_string(interp, this, "trim")?.trim()))
}

fn string_trim_start(interp: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    Ok(Value::from(this_string(interp, this, "trimStart")?.trim_start()))
}

fn string_trim_end(interp: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    Ok(Value::from(this_string(interp, this, "trimEnd")?.trim_end()))
}

fn string_split(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "split")?;
    interp.charge(bulk_cost(s.len()))?;
    let limit = match arg(&args, 1) {
        Value::Undefined => usize::MAX,
        other => to_integer(&other).max(0.0) as usize,
    };
    let parts: Vec<Value> = match arg(&args, 0) {
        Value::Undefined => vec![Value::Str(s)],
        separator => {
            let separator = separator.to_js_string();
            if separator.is_empty() {
                s.chars().take(limit).map(|c| Value::from(c.to_string())).collect()
            } else {
                s.split(separator.as_str()).take(limit).map(Value::from).collect()
            }
        }
    };
    interp.check_array_length(parts.len())?;
    Ok(Value::new_array(parts))
}

fn string_repeat(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "repeat")?;
    let count = arg(&args, 0).to_number();
    let count = if count.is_nan() { 0.0 } else { count.trunc() };
    if count < 0.0 || count.is_infinite() {
        return Err(interp.range_error(format!("Invalid count value: {}", number_to_string(count))));
    }
    let total = s.len().saturating_mul(count as usize);
    interp.check_string_length(total)?;
    interp.charge(bulk_cost(total))?;
    Ok(Value::from(s.repeat(count as usize)))
}

fn replace_matches(interp: &mut Interpreter, this: &Value, args: &[Value], all: bool) -> EvalResult {
    let s = this_string(interp, this, if all { "replaceAll" } else { "replace" })?;
    interp.charge(bulk_cost(s.len()))?;
    let pattern = arg(args, 0).to_js_string();
    let replacement = arg(args, 1);
    let matches: Vec<usize> = if all {
        s.match_indices(pattern.as_str()).map(|(b, _)| b).collect()
    } else {
        s.find(pattern.as_str()).into_iter().collect()
    };
    let mut out = String::with_capacity(s.len());
    let mut cursor = 0;
    for start in matches {
        out.push_str(&s[cursor..start]);
        let text = match &replacement {
            Value::Function(_) => interp
                .call_function(
                    &replacement,
                    Value::Undefined,
                    vec![
                        Value::from(pattern.as_str()),
                        Value::from(char_count(&s[..start])),
                        Value::Str(Rc::clone(&s)),
                    ],
                )?
                .to_js_string(),
            other => other.to_js_string(),
        };
        out.push_str(&text);
        interp.check_string_length(out.len())?;
        cursor = start + pattern.len();
    }
    out.push_str(&s[cursor..]);
    interp.check_string_length(out.len())?;
    Ok(Value::from(out))
}

fn string_replace(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    replace_matches(interp, this, &args, false)
}

fn string_replace_all(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    replace_matches(interp, this, &args, true)
}

fn padding(interp: &Interpreter, s: &str, args: &[Value]) -> Result<String, Interrupt> {
    let target = to_integer(&arg(args, 0)).max(0.0) as usize;
    let fill = match arg(args, 1) {
        Value::Undefined => " ".to_string(),
        other => other.to_js_string(),
    };
    let current = char_count(s);
    if target <= current || fill.is_empty() {
        return Ok(String::new());
    }
    interp.check_string_length(target)?;
    Ok(fill.chars().cycle().take(target - current).collect())
}

fn string_pad_start(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "padStart")?;
    let pad = padding(interp, &s, &args)?;
    Ok(Value::from(format!("{}{}", pad, s)))
}

fn string_pad_end(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "padEnd")?;
    let pad = padding(interp, &s, &args)?;
    Ok(Value::from(format!("{}{}", s, pad)))
}

fn string_concat(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let mut out = this_string(interp, this, "concat")?.to_string();
    for value in &args {
        out.push_str(&value.to_js_string());
        interp.check_string_length(out.len())?;
    }
    Ok(Value::from(out))
}

fn string_at(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let s = this_string(interp, this, "at")?;
    let n = to_integer(&arg(&args, 0));
    let index = if n < 0.0 { char_count(&s) as f64 + n } else { n };
    if index < 0.0 {
        return Ok(Value::Undefined);
    }
    Ok(s.chars()
        .nth(index as usize)
        .map_or(Value::Undefined, |c| Value::from(c.to_string())))
}

fn string_to_string(interp: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    Ok(Value::Str(this_string(interp, this, "toString")?))
}

// -- Number / Boolean -----------------------------------------------------

fn number_ctor(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
}

fn boolean_ctor(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::Bool(arg(&args, 0).is_truthy()))
}

fn number_is_integer(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::Bool(
        matches!(arg(&args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0),
    ))
}

fn number_is_finite(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite())))
}

fn number_is_nan(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_nan())))
}

fn global_is_nan(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::Bool(arg(&args, 0).to_number().is_nan()))
}

fn global_is_finite(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::Bool(arg(&args, 0).to_number().is_finite()))
}

fn parse_int(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    let text = arg(&args, 0).to_js_string();
    let mut s = text.trim_start();
    let negative = s.starts_with('-');
    if let Some(rest) = s.strip_prefix('-').or_else(|| s.strip_prefix('+')) {
        s = rest;
    }
    let mut radix = to_integer(&arg(&args, 1)) as u32;
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }
    let mut value = 0.0;
    let mut any = false;
    for c in s.chars() {
        match c.to_digit(radix) {
            Some(digit) => {
                value = value * f64::from(radix) + f64::from(digit);
                any = true;
            }
            None => break,
        }
    }
    if !any {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(if negative { -value } else { value }))
}

/// Longest prefix of `text` that reads as a decimal literal.
fn float_prefix(text: &str) -> f64 {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    if s[end..].starts_with("Infinity") {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    let digits = |from: usize| {
        bytes[from..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };
    let int_digits = digits(end);
    end += int_digits;
    let mut mantissa_digits = int_digits;
    if bytes.get(end) == Some(&b'.') {
        let frac_digits = digits(end + 1);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
            mantissa_digits += frac_digits;
        }
    }
    if mantissa_digits == 0 {
        return f64::NAN;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = digits(exp_end);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }
    s[..end].parse().unwrap_or(f64::NAN)
}

fn parse_float(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    Ok(Value::Number(float_prefix(&arg(&args, 0).to_js_string())))
}

fn this_number(interp: &Interpreter, this: &Value, method: &str) -> Result<f64, Interrupt> {
    match this {
        Value::Number(n) => Ok(*n),
        _ => Err(interp.type_error(format!(
            "Number.prototype.{} requires that 'this' be a Number",
            method
        ))),
    }
}

fn number_to_fixed(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    let n = this_number(interp, this, "toFixed")?;
    let digits = to_integer(&arg(&args, 0));
    if !(0.0..=100.0).contains(&digits) {
        return Err(interp.range_error("toFixed() digits argument must be between 0 and 100"));
    }
    if !n.is_finite() || n.abs() >= 1e21 {
        return Ok(Value::from(number_to_string(n)));
    }
    let n = if n == 0.0 { 0.0 } else { n };
    Ok(Value::from(format!("{:.*}", digits as usize, n)))
}

fn integer_to_radix(n: f64, radix: u32) -> String {
    let negative = n < 0.0;
    let mut value = n.abs().trunc();
    let mut digits = Vec::new();
    while value >= 1.0 {
        let digit = (value % f64::from(radix)) as u32;
        digits.push(char::from_digit(digit, radix).unwrap_or('0'));
        value = (value / f64::from(radix)).trunc();
    }
    if digits.is_empty() {
        digits.push('0');
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

fn number_to_string_method(interp: &mut Interpreter, this: &Value, args: Vec<Value>) -> EvalResult {
    if let Value::Bool(b) = this {
        return Ok(Value::from(b.to_string()));
    }
    let n = this_number(interp, this, "toString")?;
    let radix = match arg(&args, 0) {
        Value::Undefined => 10,
        other => to_integer(&other) as u32,
    };
    if !(2..=36).contains(&radix) {
        return Err(interp.range_error("toString() radix must be between 2 and 36"));
    }
    if radix == 10 || !n.is_finite() {
        return Ok(Value::from(number_to_string(n)));
    }
    Ok(Value::from(integer_to_radix(n, radix)))
}

fn number_value_of(interp: &mut Interpreter, this: &Value, _: Vec<Value>) -> EvalResult {
    Ok(Value::Number(this_number(interp, this, "valueOf")?))
}

// -- Error constructors ---------------------------------------------------

fn make_error(name: &str, args: &[Value]) -> EvalResult {
    let message = match arg(args, 0) {
        Value::Undefined => String::new(),
        other => other.to_js_string(),
    };
    Ok(Value::new_error(name, message))
}

fn error_ctor(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    make_error("Error", &args)
}

fn type_error_ctor(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    make_error("TypeError", &args)
}

fn range_error_ctor(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    make_error("RangeError", &args)
}

fn reference_error_ctor(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    make_error("ReferenceError", &args)
}

fn syntax_error_ctor(_: &mut Interpreter, _: &Value, args: Vec<Value>) -> EvalResult {
    make_error("SyntaxError", &args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::interpreter::tests::run;

    fn ok(expression: &str) -> String {
        run("", expression).unwrap_or_else(|e| panic!("{} failed: {}", expression, e))
    }

    #[test]
    fn test_math() {
        assert_eq!(ok("Math.max(1, 5, 3)"), "5");
        assert_eq!(ok("Math.min()"), "Infinity");
        assert_eq!(ok("Math.round(2.5) + Math.round(-2.5)"), "1");
        assert_eq!(ok("Math.floor(-1.5)"), "-2");
        assert_eq!(ok("Math.pow(2, 8)"), "256");
        assert_eq!(ok("Math.sign(-3)"), "-1");
        assert_eq!(ok("Math.random() < 1"), "true");
        assert_eq!(ok("Math.PI > 3.14"), "true");
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(ok("'Hello'.toUpperCase()"), "HELLO");
        assert_eq!(ok("'a,b,c'.split(',').length"), "3");
        assert_eq!(ok("'abc'.split('')"), "a,b,c");
        assert_eq!(ok("'  x '.trim()"), "x");
        assert_eq!(ok("'hello'.slice(-3)"), "llo");
        assert_eq!(ok("'hello'.substring(3, 1)"), "el");
        assert_eq!(ok("'banana'.indexOf('an', 2)"), "3");
        assert_eq!(ok("'banana'.lastIndexOf('an')"), "3");
        assert_eq!(ok("'ab'.repeat(3)"), "ababab");
        assert_eq!(ok("'5'.padStart(3, '0')"), "005");
        assert_eq!(ok("'a-b-c'.replace('-', '+')"), "a+b-c");
        assert_eq!(ok("'a-b-c'.replaceAll('-', '+')"), "a+b+c");
        assert_eq!(ok("'abc'.at(-1)"), "c");
        assert_eq!(ok("'héllo'.length"), "5");
        assert_eq!(ok("'racecar'.split('').reverse().join('') === 'racecar'"), "true");
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(ok("[1, 2, 3].map(x => x * 2)"), "2,4,6");
        assert_eq!(ok("[1, 2, 3, 4].filter(x => x % 2 === 0)"), "2,4");
        assert_eq!(ok("[1, 2, 3].reduce((a, b) => a + b, 0)"), "6");
        assert_eq!(ok("[1, 2, 3].reduce((a, b) => a + b)"), "6");
        assert_eq!(ok("[3, 1, 10, 2].sort()"), "1,10,2,3");
        assert_eq!(ok("[3, 1, 10, 2].sort((a, b) => a - b)"), "1,2,3,10");
        assert_eq!(ok("[1, [2, [3, [4]]]].flat(2)"), "1,2,3,4");
        assert_eq!(
            ok("[1, 2, 3].includes(2) && [NaN].indexOf(NaN) === -1 && [NaN].includes(NaN)"),
            "true"
        );
        assert_eq!(ok("[5, 6, 7].findIndex(x => x > 5)"), "1");
        assert_eq!(ok("[5, 6, 7].find(x => x > 10)"), "undefined");
        assert_eq!(ok("[1, 2].some(x => x > 1) && [1, 2].every(x => x > 0)"), "true");
        assert_eq!(ok("[1, null, 3].join('-')"), "1--3");
        assert_eq!(ok("[1, 2, 3].at(-1)"), "3");
        assert_eq!(ok("Array.from({ length: 3 }, (_, i) => i * i)"), "0,1,4");
        assert_eq!(ok("Array.isArray([]) && !Array.isArray('x')"), "true");
    }

    #[test]
    fn test_array_mutation() {
        let src = r#"
            const a = [1, 2, 3, 4, 5];
            const removed = a.splice(1, 2, 'x');
            a.push(6);
            a.unshift(0);
            const last = a.pop();
            const first = a.shift();
        "#;
        assert_eq!(
            run(src, "[a.join(''), removed.join(''), last, first].join(' ')").unwrap(),
            "1x45 23 6 0"
        );
    }

    #[test]
    fn test_sort_comparator_errors_propagate() {
        assert_eq!(
            run("", "[2, 1].sort(() => { throw new Error('cmp'); })"),
            Err("cmp".to_string())
        );
        assert_eq!(ok("[3, 1, 2].sort(() => 1).length"), "3");
    }

    #[test]
    fn test_object_statics() {
        let src = "const o = { b: 1, a: 2 };";
        assert_eq!(run(src, "Object.keys(o).join()").unwrap(), "b,a");
        assert_eq!(run(src, "Object.values(o).join()").unwrap(), "1,2");
        assert_eq!(run(src, "Object.entries(o)[0].join(':')").unwrap(), "b:1");
        assert_eq!(
            run(src, "Object.assign({}, o, { c: 3 }).c + Object.keys(o).length").unwrap(),
            "5"
        );
        assert_eq!(
            run("", "Object.keys(null)"),
            Err("Cannot convert undefined or null to object".to_string())
        );
        assert_eq!(ok("({ a: 1 }).hasOwnProperty('a')"), "true");
    }

    #[test]
    fn test_json() {
        assert_eq!(ok("JSON.stringify({ a: [1, 'x'], b: undefined })"), r#"{"a":[1,"x"]}"#);
        assert_eq!(ok("JSON.parse('[1, 2]').length"), "2");
        assert_eq!(ok("JSON.stringify([1], null, 2)"), "[\n  1\n]");
        let cyclic = run("const o = {}; o.self = o;", "JSON.stringify(o)");
        assert_eq!(cyclic, Err("Converting circular structure to JSON".to_string()));
        assert!(run("", "JSON.parse('{bad')").is_err());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(ok("parseInt('42px')"), "42");
        assert_eq!(ok("parseInt('ff', 16)"), "255");
        assert_eq!(ok("parseInt('abc')"), "NaN");
        assert_eq!(ok("parseFloat('3.14abc')"), "3.14");
        assert_eq!(ok("Number('12') + Number('')"), "12");
        assert_eq!(ok("String(123) + Boolean('')"), "123false");
        assert_eq!(ok("Number.isInteger(5) && !Number.isInteger(5.5)"), "true");
        assert_eq!(ok("isNaN('x')"), "true");
        assert_eq!(ok("(3.14159).toFixed(2)"), "3.14");
        assert_eq!(ok("(255).toString(16)"), "ff");
    }

    #[test]
    fn test_error_constructors() {
        assert_eq!(ok("new TypeError('bad').name"), "TypeError");
        assert_eq!(ok("String(new RangeError('x'))"), "RangeError: x");
        assert_eq!(ok("Error('plain').message"), "plain");
    }

    #[test]
    fn test_function_call_and_apply() {
        let src = "function greet(greeting) { return greeting + ' ' + this.name; }";
        assert_eq!(
            run(src, "greet.call({ name: 'Ada' }, 'Hi') + '/' + greet.apply({ name: 'Bo' }, ['Yo'])")
                .unwrap(),
            "Hi Ada/Yo Bo"
        );
    }

    #[test]
    fn test_float_prefix() {
        assert_eq!(float_prefix("  -1.5e3xyz"), -1500.0);
        assert_eq!(float_prefix(".5"), 0.5);
        assert!(float_prefix("e5").is_nan());
        assert_eq!(float_prefix("-Infinity"), f64::NEG_INFINITY);
    }
}

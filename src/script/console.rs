//! Diagnostic print entry point exposed to scripts as `console`
//!
//! Every interpreter owns one [`Console`]. What happens to a print call is
//! decided by the installed [`ConsoleSink`]; the default [`HostConsole`]
//! forwards to `tracing`. Capture swaps the sink for the duration of a run.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use super::json;
use super::value::Value;

/// Which `console` method produced a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleLevel {
    Log,
    Info,
    Debug,
    Warn,
    Error,
}

impl ConsoleLevel {
    pub fn method_name(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
        }
    }
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

/// Receiver of print calls made by scripts.
pub trait ConsoleSink {
    fn write(&self, level: ConsoleLevel, args: &[Value]);
}

/// Render one print call's arguments as a single line: each argument as
/// two-space indented JSON, or its string conversion when it has no JSON
/// form, joined by one space.
pub fn render_line(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match json::stringify(arg, "  ") {
            Ok(Some(text)) => text,
            _ => arg.to_js_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Forwards print calls to the host's `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostConsole;

impl ConsoleSink for HostConsole {
    fn write(&self, level: ConsoleLevel, args: &[Value]) {
        let line = render_line(args);
        match level {
            ConsoleLevel::Log | ConsoleLevel::Info => {
                info!(target: "praxis::console", method = %level, "{}", line)
            }
            ConsoleLevel::Debug => debug!(target: "praxis::console", method = %level, "{}", line),
            ConsoleLevel::Warn => warn!(target: "praxis::console", method = %level, "{}", line),
            ConsoleLevel::Error => error!(target: "praxis::console", method = %level, "{}", line),
        }
    }
}

/// Discards every print call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsole;

impl ConsoleSink for NullConsole {
    fn write(&self, _level: ConsoleLevel, _args: &[Value]) {}
}

/// The swappable entry point behind `console.*`.
///
/// Clones are handles to the same slot, so a sink installed through one clone
/// is seen by all of them.
#[derive(Clone)]
pub struct Console {
    sink: Rc<RefCell<Rc<dyn ConsoleSink>>>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new(Rc::new(HostConsole))
    }
}

impl Console {
    pub fn new(sink: Rc<dyn ConsoleSink>) -> Self {
        Self {
            sink: Rc::new(RefCell::new(sink)),
        }
    }

    pub fn emit(&self, level: ConsoleLevel, args: &[Value]) {
        let sink = Rc::clone(&self.sink.borrow());
        sink.write(level, args);
    }

    /// Install a new sink, returning the one it replaced.
    pub fn replace(&self, sink: Rc<dyn ConsoleSink>) -> Rc<dyn ConsoleSink> {
        std::mem::replace(&mut *self.sink.borrow_mut(), sink)
    }

    pub fn sink(&self) -> Rc<dyn ConsoleSink> {
        Rc::clone(&self.sink.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::PropertyMap;

    #[derive(Default)]
    struct Lines(RefCell<Vec<String>>);

    impl ConsoleSink for Lines {
        fn write(&self, level: ConsoleLevel, args: &[Value]) {
            self.0
                .borrow_mut()
                .push(format!("{}:{}", level, render_line(args)));
        }
    }

    #[test]
    fn test_render_line_quotes_strings_and_indents() {
        let obj = Value::new_object(
            [("a".to_string(), Value::from(1.0))]
                .into_iter()
                .collect::<PropertyMap>(),
        );
        assert_eq!(
            render_line(&[Value::from("hi"), Value::from(2.0)]),
            "\"hi\" 2"
        );
        assert_eq!(render_line(&[obj]), "{\n  \"a\": 1\n}");
        assert_eq!(render_line(&[Value::Undefined]), "undefined");
    }

    #[test]
    fn test_render_line_falls_back_for_unserializable_values() {
        let cyclic = Value::new_object(PropertyMap::default());
        if let Value::Object(obj) = &cyclic {
            obj.borrow_mut().set("self", cyclic.clone());
        }
        let func = Value::native("shout", |_, _, _| Ok(Value::Undefined));
        let listed = Value::new_array(vec![Value::from(1.0), func.clone()]);

        assert_eq!(render_line(&[cyclic.clone()]), "[object Object]");
        assert_eq!(render_line(&[func]), "function shout() { [native code] }");
        assert_eq!(render_line(&[listed]), "[\n  1,\n  null\n]");

        if let Value::Object(obj) = &cyclic {
            obj.borrow_mut().properties.clear();
        }
    }

    #[test]
    fn test_replace_swaps_sink() {
        let console = Console::new(Rc::new(NullConsole));
        let lines = Rc::new(Lines::default());
        let previous = console.replace(lines.clone());
        console.emit(ConsoleLevel::Warn, &[Value::from(true)]);
        console.replace(previous);
        console.emit(ConsoleLevel::Log, &[Value::from(false)]);
        assert_eq!(*lines.0.borrow(), vec!["warn:true".to_string()]);
    }

    #[test]
    fn test_clones_share_the_sink() {
        let console = Console::new(Rc::new(NullConsole));
        let handle = console.clone();
        let lines = Rc::new(Lines::default());
        handle.replace(lines.clone());
        console.emit(ConsoleLevel::Error, &[Value::from("x")]);
        assert_eq!(*lines.0.borrow(), vec!["error:\"x\"".to_string()]);
    }
}

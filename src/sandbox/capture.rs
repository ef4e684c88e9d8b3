//! Console capture for one run
//!
//! [`OutputCapture::begin`] installs a [`Recorder`] as the console sink and
//! returns a guard that puts the previous sink back when it is dropped or
//! finished, whichever comes first.

use std::cell::RefCell;
use std::rc::Rc;

use crate::script::{render_line, Console, ConsoleLevel, ConsoleSink, Value};

/// Records print calls as lines and optionally forwards them to the sink it
/// replaced.
pub struct Recorder {
    original: Rc<dyn ConsoleSink>,
    forward: bool,
    max_lines: usize,
    max_bytes: usize,
    buffer: RefCell<Buffer>,
}

#[derive(Default)]
struct Buffer {
    lines: Vec<String>,
    bytes: usize,
    dropped: usize,
}

impl Recorder {
    fn push(&self, line: String, always: bool) {
        let mut buffer = self.buffer.borrow_mut();
        let fits = buffer.lines.len() < self.max_lines
            && buffer.bytes.saturating_add(line.len()) <= self.max_bytes;
        if always || fits {
            buffer.bytes = buffer.bytes.saturating_add(line.len());
            buffer.lines.push(line);
        } else {
            buffer.dropped += 1;
        }
    }

    fn take_lines(&self) -> Vec<String> {
        let mut buffer = self.buffer.borrow_mut();
        let mut lines = std::mem::take(&mut buffer.lines);
        if buffer.dropped > 0 {
            lines.push(format!("... output truncated ({} more lines)", buffer.dropped));
            buffer.dropped = 0;
        }
        lines
    }
}

impl ConsoleSink for Recorder {
    fn write(&self, level: ConsoleLevel, args: &[Value]) {
        self.push(render_line(args), false);
        if self.forward {
            self.original.write(level, args);
        }
    }
}

/// Entry point for capturing a console.
pub struct OutputCapture;

impl OutputCapture {
    /// Swap `console`'s sink for a recorder keeping at most `max_lines`
    /// lines and `max_bytes` of text. A line that would cross either bound
    /// is counted in the truncation line instead. With `forward`, every call
    /// also reaches the previous sink.
    pub fn begin(console: &Console, max_lines: usize, max_bytes: usize, forward: bool) -> CaptureGuard {
        let recorder = Rc::new(Recorder {
            original: console.sink(),
            forward,
            max_lines,
            max_bytes,
            buffer: RefCell::new(Buffer::default()),
        });
        let previous = console.replace(recorder.clone());
        CaptureGuard {
            console: console.clone(),
            recorder,
            previous: Some(previous),
        }
    }
}

/// Restores the original console sink on drop.
pub struct CaptureGuard {
    console: Console,
    recorder: Rc<Recorder>,
    previous: Option<Rc<dyn ConsoleSink>>,
}

impl CaptureGuard {
    /// Record a failure line as if the script had called
    /// `console.log("Execution Error:", message)`. Kept even when the
    /// capture limits have been reached.
    pub fn record_failure(&self, message: &str) {
        let args = [Value::from("Execution Error:"), Value::from(message)];
        self.recorder.push(render_line(&args), true);
        if self.recorder.forward {
            self.recorder.original.write(ConsoleLevel::Log, &args);
        }
    }

    /// Restore the original sink and return the captured lines.
    pub fn finish(mut self) -> Vec<String> {
        self.restore();
        self.recorder.take_lines()
    }

    fn restore(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.console.replace(previous);
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Tally(RefCell<Vec<String>>);

    impl ConsoleSink for Tally {
        fn write(&self, level: ConsoleLevel, args: &[Value]) {
            self.0.borrow_mut().push(format!("{} {}", level, render_line(args)));
        }
    }

    #[test]
    fn test_records_and_forwards() {
        let original = Rc::new(Tally::default());
        let console = Console::new(original.clone());

        let guard = OutputCapture::begin(&console, 10, 1024, true);
        console.emit(ConsoleLevel::Log, &[Value::from("a"), Value::from(1.0)]);
        console.emit(ConsoleLevel::Warn, &[Value::Undefined]);
        let lines = guard.finish();

        assert_eq!(lines, vec!["\"a\" 1".to_string(), "undefined".to_string()]);
        assert_eq!(
            *original.0.borrow(),
            vec!["log \"a\" 1".to_string(), "warn undefined".to_string()]
        );
    }

    #[test]
    fn test_without_forwarding() {
        let original = Rc::new(Tally::default());
        let console = Console::new(original.clone());

        let guard = OutputCapture::begin(&console, 10, 1024, false);
        console.emit(ConsoleLevel::Log, &[Value::from(true)]);
        assert_eq!(guard.finish(), vec!["true".to_string()]);
        assert!(original.0.borrow().is_empty());
    }

    #[test]
    fn test_drop_restores_original_sink() {
        let original = Rc::new(Tally::default());
        let console = Console::new(original.clone());
        {
            let _guard = OutputCapture::begin(&console, 10, 1024, false);
            console.emit(ConsoleLevel::Log, &[Value::from("captured")]);
        }
        console.emit(ConsoleLevel::Log, &[Value::from("after")]);
        assert_eq!(*original.0.borrow(), vec!["log \"after\"".to_string()]);
    }

    #[test]
    fn test_truncation_line() {
        let console = Console::new(Rc::new(Tally::default()));
        let guard = OutputCapture::begin(&console, 2, 1024, false);
        for i in 0..5 {
            console.emit(ConsoleLevel::Log, &[Value::from(i as f64)]);
        }
        guard.record_failure("boom");
        assert_eq!(
            guard.finish(),
            vec![
                "0".to_string(),
                "1".to_string(),
                "\"Execution Error:\" \"boom\"".to_string(),
                "... output truncated (3 more lines)".to_string(),
            ]
        );
    }

    #[test]
    fn test_byte_budget_truncates() {
        let console = Console::new(Rc::new(Tally::default()));
        let guard = OutputCapture::begin(&console, 100, 10, false);
        let long = Value::from("x".repeat(6));
        for _ in 0..4 {
            console.emit(ConsoleLevel::Log, std::slice::from_ref(&long));
        }
        console.emit(ConsoleLevel::Log, &[Value::from(1.0)]);
        assert_eq!(
            guard.finish(),
            vec![
                "\"xxxxxx\"".to_string(),
                "1".to_string(),
                "... output truncated (3 more lines)".to_string(),
            ]
        );
    }

    #[test]
    fn test_failure_line_is_forwarded_as_log() {
        let original = Rc::new(Tally::default());
        let console = Console::new(original.clone());

        let guard = OutputCapture::begin(&console, 10, 1024, true);
        guard.record_failure("boom");
        assert_eq!(guard.finish(), vec!["\"Execution Error:\" \"boom\"".to_string()]);
        assert_eq!(
            *original.0.borrow(),
            vec!["log \"Execution Error:\" \"boom\"".to_string()]
        );
    }
}

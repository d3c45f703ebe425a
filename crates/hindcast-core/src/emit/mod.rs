//! Text output: the sink abstraction and the event formatter.
//!
//! The emitter never talks to a device directly; it calls `write_text`,
//! `set_style` and `reset_style` on an opaque [`TextSink`]. Concrete sinks
//! are the terminal (with or without color), a UTF-16 text file, and an
//! in-memory string used by the test suite.

pub mod text;

use std::io::Write;

pub use text::TextEmitter;

/// Style palette used by the emitter. Sinks map these to whatever their
/// device supports, or ignore them entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle
{
    Gray,
    Green,
    BrightGreen,
    Cyan,
    BrightCyan,
    Yellow,
    BrightYellow,
    Red,
    BrightRed,
    Magenta,
    BrightMagenta,
}

/// Destination of formatted event text.
pub trait TextSink
{
    /// Append `text` in the currently selected style.
    fn write_text(&mut self, text: &str);

    /// Select a style for subsequent writes.
    fn set_style(&mut self, style: TextStyle);

    /// Return to the unstyled default.
    fn reset_style(&mut self);
}

/// Terminal sink writing to stdout, with optional ANSI color.
pub struct TerminalSink
{
    colorize: bool,
    current: Option<TextStyle>,
}

impl TerminalSink
{
    /// `colorize` false gives the `--bland` rendition: same text, no escape
    /// codes.
    #[must_use]
    pub fn new(colorize: bool) -> Self
    {
        Self {
            colorize,
            current: None,
        }
    }

    fn console_style(style: TextStyle) -> console::Style
    {
        let base = console::Style::new();
        match style {
            TextStyle::Gray => base.black().bright(),
            TextStyle::Green => base.green(),
            TextStyle::BrightGreen => base.green().bright(),
            TextStyle::Cyan => base.cyan(),
            TextStyle::BrightCyan => base.cyan().bright(),
            TextStyle::Yellow => base.yellow(),
            TextStyle::BrightYellow => base.yellow().bright(),
            TextStyle::Red => base.red(),
            TextStyle::BrightRed => base.red().bright(),
            TextStyle::Magenta => base.magenta(),
            TextStyle::BrightMagenta => base.magenta().bright(),
        }
    }
}

impl TextSink for TerminalSink
{
    fn write_text(&mut self, text: &str)
    {
        let mut stdout = std::io::stdout();
        let rendered = match (self.colorize, self.current) {
            (true, Some(style)) => Self::console_style(style).apply_to(text).to_string(),
            _ => text.to_string(),
        };
        let _ = stdout.write_all(rendered.as_bytes());
        let _ = stdout.flush();
    }

    fn set_style(&mut self, style: TextStyle)
    {
        self.current = Some(style);
    }

    fn reset_style(&mut self)
    {
        self.current = None;
    }
}

/// File sink producing a UTF-16LE text log (with a byte-order mark).
///
/// Styles are ignored; files are never colorized.
pub struct Utf16FileSink<W: Write>
{
    stream: W,
}

impl<W: Write> Utf16FileSink<W>
{
    /// Wrap a fresh stream; the BOM is written immediately.
    pub fn new(mut stream: W) -> std::io::Result<Self>
    {
        stream.write_all(&0xFEFFu16.to_le_bytes())?;
        Ok(Self { stream })
    }
}

impl<W: Write> TextSink for Utf16FileSink<W>
{
    fn write_text(&mut self, text: &str)
    {
        for unit in text.encode_utf16() {
            if self.stream.write_all(&unit.to_le_bytes()).is_err() {
                return;
            }
        }
    }

    fn set_style(&mut self, _style: TextStyle) {}

    fn reset_style(&mut self) {}
}

/// In-memory sink capturing plain text; used by tests to compare live and
/// replayed output.
///
/// Clones share one buffer, so a test can keep a handle while the emitter
/// that owns the other clone is boxed away behind the observer interface.
#[derive(Debug, Default, Clone)]
pub struct StringSink
{
    buffer: std::rc::Rc<std::cell::RefCell<String>>,
}

impl StringSink
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Everything written so far.
    #[must_use]
    pub fn contents(&self) -> String
    {
        self.buffer.borrow().clone()
    }
}

impl TextSink for StringSink
{
    fn write_text(&mut self, text: &str)
    {
        self.buffer.borrow_mut().push_str(text);
    }

    fn set_style(&mut self, _style: TextStyle) {}

    fn reset_style(&mut self) {}
}

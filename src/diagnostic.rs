use core::ffi::CStr;
use core::fmt;

/// Kext name printed at the start of every line. Override at build time
/// with `KEXTKIT_NAME`.
pub const NAME: &str = match option_env!("KEXTKIT_NAME") {
    Some(name) => name,
    None => "kextkit",
};

/// Longest line handed to the console, terminator included. Longer
/// messages are cut.
pub const LINE_MAX: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "DBG",
            Level::Info => "INF",
            Level::Error => "ERR",
        }
    }
}

/// A NUL-terminated line assembled on the stack.
pub struct LineBuf {
    buf: [u8; LINE_MAX],
    len: usize,
}

impl Default for LineBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuf {
    pub const fn new() -> Self {
        Self {
            buf: [0; LINE_MAX],
            len: 0,
        }
    }

    pub fn as_cstr(&mut self) -> &CStr {
        self.buf[self.len] = 0;
        // An interior NUL from a formatted argument just ends the line early.
        CStr::from_bytes_until_nul(&self.buf[..=self.len]).unwrap_or(c"")
    }
}

impl fmt::Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // Keep one byte for the terminator; truncation is not an error.
        let room = LINE_MAX - 1 - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

/// Format and emit one line at `level`.
pub fn emit(level: Level, args: fmt::Arguments<'_>) {
    use fmt::Write;

    let mut line = LineBuf::new();
    let _ = write!(line, "{} [{}] ", NAME, level.tag());
    let _ = line.write_fmt(args);
    crate::platform::log_line(line.as_cstr());
}

macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::diagnostic::emit($crate::diagnostic::Level::Info, format_args!($($arg)*))
    };
}

macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::diagnostic::emit($crate::diagnostic::Level::Error, format_args!($($arg)*))
    };
}

/// Compiled out of release builds.
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::diagnostic::emit($crate::diagnostic::Level::Debug, format_args!($($arg)*))
        }
    };
}

pub(crate) use {log_debug, log_error, log_info};

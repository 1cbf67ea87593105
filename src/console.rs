//! Console output and kernel logging for Chan_R
//!
//! On bare-metal ARM the console writes to the PL011 UART of the QEMU virt
//! machine. Hosted builds keep the output in a ring buffer instead, so the
//! crate can be exercised from ordinary tests.
//!
//! Kernel diagnostics go through the `log` facade; [`init_logger`] installs
//! [`KernelLogger`], which formats each record onto the console.

use core::fmt::{self, Write};
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

/// Bytes kept by the hosted console before the oldest are dropped
pub const CONSOLE_BUFFER_SIZE: usize = 4096;

/// Longest formatted log line; longer records are truncated
const LOG_LINE_SIZE: usize = 256;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod uart {
    // QEMU virt machine UART base
    const UART_BASE: usize = 0x0900_0000;

    pub fn putc(c: u8) {
        let ptr = UART_BASE as *mut u8;
        // SAFETY: the PL011 data register is mapped at this address on the
        // target board and accepts byte writes at any time.
        unsafe { ptr.write_volatile(c) }
    }
}

/// Console writer
pub struct Console {
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    buffer: heapless::Deque<u8, CONSOLE_BUFFER_SIZE>,
}

impl Console {
    pub const fn new() -> Self {
        Console {
            #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
            buffer: heapless::Deque::new(),
        }
    }

    /// Write a byte to the console
    pub fn write_byte(&mut self, byte: u8) {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        uart::putc(byte);

        #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
        {
            if self.buffer.is_full() {
                self.buffer.pop_front();
            }
            let _ = self.buffer.push_back(byte);
        }
    }

    /// Write a string, expanding newlines for serial terminals
    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }

    pub fn clear(&mut self) {
        #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
        self.buffer.clear();
    }

    /// Buffered output, oldest first (hosted builds only)
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    pub fn contents(&self) -> alloc::string::String {
        let bytes: alloc::vec::Vec<u8> = self.buffer.iter().copied().collect();
        alloc::string::String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

// ============================================================================
// Logger
// ============================================================================

/// `log` backend writing to the console
pub struct KernelLogger {
    level: LevelFilter,
}

impl KernelLogger {
    fn tag(level: Level) -> &'static str {
        match level {
            Level::Error => "ERROR",
            Level::Warn => " WARN",
            Level::Info => " INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // Formatted before taking the console lock
            let mut line: heapless::String<LOG_LINE_SIZE> = heapless::String::new();
            let _ = write!(
                line,
                "{} {}: {}",
                Self::tag(record.level()),
                record.target(),
                record.args()
            );
            let mut console = CONSOLE.lock();
            console.write_str(&line);
            console.write_str("\n");
        }
    }

    fn flush(&self) {}
}

static LOGGER: Once<KernelLogger> = Once::new();

/// Install the kernel logger at `level`
///
/// Only the first call installs the logger; later calls just move the
/// maximum level.
pub fn init_logger(level: LevelFilter) {
    let logger = LOGGER.call_once(|| KernelLogger { level: LevelFilter::Trace });
    if log::set_logger(logger).is_ok() {
        CONSOLE.lock().clear();
    }
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_write() {
        let mut console = Console::new();
        console.write_str("Hello, Chan_R!");
        assert!(console.contents().contains("Hello, Chan_R!"));
    }

    #[test]
    fn test_console_formatting() {
        let mut console = Console::new();
        write!(&mut console, "Test {}", 42).unwrap();
        assert_eq!(console.contents(), "Test 42");
    }

    #[test]
    fn test_newline_expansion() {
        let mut console = Console::new();
        console.write_str("a\nb");
        assert_eq!(console.contents(), "a\r\nb");
    }

    #[test]
    fn test_ring_drops_oldest() {
        let mut console = Console::new();
        for _ in 0..CONSOLE_BUFFER_SIZE {
            console.write_byte(b'x');
        }
        console.write_byte(b'y');
        let contents = console.contents();
        assert_eq!(contents.len(), CONSOLE_BUFFER_SIZE);
        assert!(contents.ends_with('y'));
    }

    #[test]
    fn test_logger_filters_by_level() {
        let logger = KernelLogger {
            level: LevelFilter::Info,
        };
        let debug = Metadata::builder().level(Level::Debug).build();
        let warn = Metadata::builder().level(Level::Warn).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&warn));
        assert_eq!(KernelLogger::tag(Level::Warn), " WARN");
    }
}

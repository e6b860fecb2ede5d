//! 宿主环境下的日志实现，把 `log` 的记录带颜色地打到 stderr

use std::io::Write;

use anstyle::{AnsiColor, Reset};
use klocks::{Lazy, Once};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// 决定日志级别的环境变量
pub const LOG_ENV: &str = "DEVPAGER_LOG";

/// a simple logger
struct SimpleLogger {
    level: LevelFilter,
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => AnsiColor::Red,
            Level::Warn => AnsiColor::BrightYellow,
            Level::Info => AnsiColor::Blue,
            Level::Debug => AnsiColor::Green,
            Level::Trace => AnsiColor::BrightBlack,
        };
        let thread = std::thread::current();
        let mut stderr = std::io::stderr().lock();
        // 日志本身写不出去时没有别的地方可以报告了，直接忽略
        let _ = writeln!(
            stderr,
            "{}[{:>5}]{} {}: {}",
            color.render_fg(),
            record.level(),
            Reset.render(),
            thread.name().unwrap_or("<unnamed>"),
            record.args(),
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn parse_level(level: Option<&str>) -> LevelFilter {
    match level {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// initiate logger，级别由环境变量 [`LOG_ENV`] 决定，默认关闭
pub fn init() {
    static LEVEL: Lazy<LevelFilter> =
        Lazy::new(|| parse_level(std::env::var(LOG_ENV).ok().as_deref()));
    init_with_level(*LEVEL);
}

/// 以指定级别初始化。只有第一次调用生效，之后的调用会被忽略
pub fn init_with_level(level: LevelFilter) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let logger = Box::leak(Box::new(SimpleLogger { level }));
        // 其他人已经装了 logger 的话就用别人的
        if log::set_logger(logger).is_ok() {
            log::set_max_level(level);
        }
    });
}

#[cfg(test)]
mod tests {
    use log::LevelFilter;

    use super::parse_level;

    #[test]
    fn parses_levels() {
        assert_eq!(parse_level(Some("TRACE")), LevelFilter::Trace);
        assert_eq!(parse_level(Some("WARN")), LevelFilter::Warn);
        assert_eq!(parse_level(Some("verbose")), LevelFilter::Off);
        assert_eq!(parse_level(None), LevelFilter::Off);
    }
}

//! 日志接口
//!
//! 各组件不直接依赖全局 logger，而是持有一个 `LogSink`。
//! 默认实现 `LogFacade` 转发到 `log` 宏，测试中用 `MemorySink` 收集消息。

use std::sync::Mutex;

/// 日志级别
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// 注入式日志接收端
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }
}

/// 转发到 `log` crate
#[derive(Clone, Debug)]
pub struct LogFacade {
    target: &'static str,
}

impl LogFacade {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for LogFacade {
    fn default() -> Self {
        Self::new("mmd_runtime")
    }
}

impl LogSink for LogFacade {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => log::debug!(target: self.target, "{}", message),
            LogLevel::Info => log::info!(target: self.target, "{}", message),
            LogLevel::Warn => log::warn!(target: self.target, "{}", message),
        }
    }
}

/// 丢弃所有消息
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// 内存收集（测试用）
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(LogLevel, String)> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// 收集到的警告数量
    pub fn warning_count(&self) -> usize {
        self.records()
            .iter()
            .filter(|(level, _)| *level == LogLevel::Warn)
            .count()
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push((level, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_counts_warnings() {
        let sink = MemorySink::new();
        sink.info("loaded");
        sink.warn("bone missing");
        sink.warn("morph missing");
        assert_eq!(sink.warning_count(), 2);
        assert_eq!(sink.records()[0], (LogLevel::Info, "loaded".to_string()));
    }

    #[test]
    fn facade_forwards_without_panicking() {
        let _ = env_logger::builder().is_test(true).try_init();
        let sink = LogFacade::default();
        sink.debug("debug");
        sink.warn("warn");
    }
}

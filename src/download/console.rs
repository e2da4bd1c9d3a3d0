//! 引擎诊断输出适配：调试信息只进 tracing，警告与错误带级别前缀打印到标准输出。

use crate::engine::Logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

pub fn format_line(severity: Severity, msg: &str) -> String {
    format!("{}: {}", severity.label(), msg)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn debug(&self, msg: &str) {
        tracing::debug!(target: "engine", "{msg}");
    }

    fn warning(&self, msg: &str) {
        println!("{}", format_line(Severity::Warning, msg));
    }

    fn error(&self, msg: &str) {
        println!("{}", format_line(Severity::Error, msg));
    }
}

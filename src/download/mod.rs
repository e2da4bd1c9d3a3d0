//! 下载流程模块入口。
//!
//! 子模块：
//! - `request`：命令行参数 → 下载请求
//! - `options`：下载请求 → 引擎配置（格式、后处理、输出模板）
//! - `guard`：已存在文件跳过钩子
//! - `console`：引擎诊断输出
//! - `orchestrator`：下载主流程编排

pub mod console;
pub mod guard;
pub mod options;
pub mod orchestrator;
pub mod request;

//! AegisGate Common - 跨模块共享的数据结构与错误类型
//!
//! 该模块提供 AegisGate 项目中所有组件共享的数据结构和错误处理机制，
//! 包括策略意图、标签选择器、后端对象模型以及统一的错误类型。

pub mod error;
pub mod models;

/// 重新导出常用类型，方便使用
pub use error::{Error, LimitKind, Result, ValidationError};
pub use models::backend::*;
pub use models::intent::*;
pub use models::selector::*;
pub use models::workload::*;

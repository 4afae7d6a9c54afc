//! 数据模型模块
//!
//! 该模块定义了 AegisGate 使用的核心数据模型：策略意图、标签选择器、工作负载清单以及
//! 编译生成的后端对象，并提供序列化/反序列化功能。

pub mod backend;
pub mod intent;
pub mod selector;
pub mod workload;

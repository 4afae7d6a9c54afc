//! AegisGate 策略编译器
//!
//! 该模块把零信任策略意图编译为网络策略后端的对象模型（安全组、防火墙规则与跨作用域共享），
//! 并把编译结果与已发布状态协调为最小的原子应用集合。清单通过 kube-rs 从 Kubernetes 读取。

pub mod cli;
pub mod compiler;
pub mod config;
pub mod crd;
pub mod inventory;
pub mod sync;
pub mod topology;
pub mod utils;

pub use cli::Cli;
pub use compiler::{CompiledPolicy, PolicyCompiler};
pub use config::{CompilerConfig, ConfigManager, NamingConfig, TopologyKind};
pub use crd::ZeroTrustPolicy;
pub use inventory::{InventorySnapshot, ScopeDirectory, WorkloadLookup};
pub use sync::{ApplyBatch, ObjectStores, PolicyReconciler, Publisher};

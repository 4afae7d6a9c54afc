//! 命令行入口
//!
//! `aegisgate` 以 dry-run 方式编译一条 `ZeroTrustPolicy`：清单来自 YAML 文件或在线集群，
//! 应用集合由 [`DryRunPublisher`] 记录后以 JSON 输出。

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::compiler::PolicyCompiler;
use crate::config::{CompilerConfig, ConfigManager};
use crate::crd::ZeroTrustPolicy;
use crate::inventory::InventorySnapshot;
use crate::sync::{ApplyBatch, DryRunPublisher, ObjectStores, PolicyReconciler};

/// AegisGate 策略编译器
#[derive(Parser, Debug)]
#[command(name = "aegisgate", version, about = "将零信任策略编译为后端对象并输出应用集合")]
pub struct Cli {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// ZeroTrustPolicy 资源文件
    #[arg(short, long)]
    pub policy: PathBuf,

    /// 清单快照文件（YAML）
    #[arg(short, long, conflicts_with = "live")]
    pub inventory: Option<PathBuf>,

    /// 从当前 kubeconfig 指向的集群拉取清单
    #[arg(long)]
    pub live: bool,
}

impl Cli {
    /// 加载配置；未指定文件时使用默认配置
    pub fn load_config(&self) -> Result<CompilerConfig> {
        match &self.config {
            Some(path) => {
                let path = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;
                Ok(ConfigManager::new(path)?.get_config().clone())
            }
            None => Ok(CompilerConfig::default()),
        }
    }

    /// 编译策略并返回已发布的应用集合
    pub async fn execute(&self, config: &CompilerConfig) -> Result<ApplyBatch> {
        let policy = std::fs::read_to_string(&self.policy)
            .with_context(|| format!("无法读取策略文件: {:?}", self.policy))?;
        let policy: ZeroTrustPolicy = serde_yaml::from_str(&policy).context("策略文件格式错误")?;
        let intent = policy.to_intent().context("策略校验失败")?;

        let snapshot = Arc::new(self.load_inventory(config).await?);
        let compiler = PolicyCompiler::new(config, snapshot.clone(), snapshot);
        let reconciler = PolicyReconciler::new(
            compiler,
            ObjectStores::in_memory(),
            Arc::new(DryRunPublisher::new()),
        );

        let batch = reconciler
            .reconcile(&intent)
            .await
            .with_context(|| format!("策略 {} 编译失败", intent.owner))?;
        info!("策略 {} 编译完成，共 {} 个对象", intent.owner, batch.len());
        Ok(batch)
    }

    async fn load_inventory(&self, config: &CompilerConfig) -> Result<InventorySnapshot> {
        if self.live {
            let client = kube::Client::try_default()
                .await
                .context("无法创建 Kubernetes 客户端")?;
            return InventorySnapshot::fetch(client, config.lookup_timeout(), config.tenant.clone())
                .await
                .context("拉取集群清单失败");
        }

        let snapshot = match &self.inventory {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("无法读取清单文件: {:?}", path))?;
                serde_yaml::from_str::<InventorySnapshot>(&content).context("清单文件格式错误")?
            }
            None => InventorySnapshot::default(),
        };
        Ok(snapshot.with_tenant_defaults(config.tenant.clone()))
    }
}

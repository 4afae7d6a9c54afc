//! 配置管理模块
//!
//! 该模块负责加载编译器配置，支持 YAML/JSON 格式，并允许通过 `AEGISGATE_` 前缀的环境变量覆盖。
//! 命名配置（标签作用域名等）随拓扑模式切换，作为显式参数传入编译器，不使用全局可变状态。

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// 部署拓扑
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyKind {
    /// 单作用域部署
    SingleScope,
    /// 多租户（组织/项目/VPC）部署
    MultiTenant,
}

/// 命名配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// 集群标签作用域
    pub cluster_scope: String,
    /// 命名空间标签作用域
    pub namespace_scope: String,
    /// 策略名称标签作用域
    pub policy_name_scope: String,
    /// 策略 UID 标签作用域
    pub policy_uid_scope: String,
    /// 规则哈希标签作用域
    pub rule_hash_scope: String,
    /// 组角色标签作用域
    pub group_type_scope: String,
    /// 地址集组归属键标签作用域
    pub address_set_scope: String,
    /// Pod 标记标签作用域
    pub pod_marker_scope: String,
    /// 虚拟机标记标签作用域
    pub vm_marker_scope: String,
    /// ID 与显示名的最大长度
    pub max_name_length: usize,
    /// 截断后附加的哈希长度
    pub hash_length: usize,
}

impl NamingConfig {
    /// 按拓扑选择标签作用域名
    pub fn for_topology(kind: TopologyKind) -> Self {
        let (policy_name_scope, policy_uid_scope) = match kind {
            TopologyKind::SingleScope => (
                "aegisgate/security_policy_name",
                "aegisgate/security_policy_uid",
            ),
            TopologyKind::MultiTenant => (
                "aegisgate/network_policy_name",
                "aegisgate/network_policy_uid",
            ),
        };

        Self {
            cluster_scope: "aegisgate/cluster".to_string(),
            namespace_scope: "aegisgate/namespace".to_string(),
            policy_name_scope: policy_name_scope.to_string(),
            policy_uid_scope: policy_uid_scope.to_string(),
            rule_hash_scope: "aegisgate/rule_hash".to_string(),
            group_type_scope: "aegisgate/group_type".to_string(),
            address_set_scope: "aegisgate/address_set_for".to_string(),
            pod_marker_scope: "aegisgate/pod".to_string(),
            vm_marker_scope: "aegisgate/vm".to_string(),
            max_name_length: 255,
            hash_length: 8,
        }
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self::for_topology(TopologyKind::SingleScope)
    }
}

/// 多租户默认上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantDefaults {
    pub org_id: String,
    pub project_id: String,
}

impl Default for TenantDefaults {
    fn default() -> Self {
        Self {
            org_id: "default".to_string(),
            project_id: "default".to_string(),
        }
    }
}

/// 编译器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// 集群名称
    pub cluster: String,
    /// 部署拓扑
    pub topology: TopologyKind,
    /// 单作用域拓扑下的策略域
    pub domain: String,
    /// 多租户默认上下文
    pub tenant: TenantDefaults,
    /// 命名配置；未设置时按拓扑选择
    pub naming: Option<NamingConfig>,
    /// 清单查询超时（秒）
    pub lookup_timeout_seconds: u64,
    /// 日志级别
    pub log_level: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            cluster: "default".to_string(),
            topology: TopologyKind::SingleScope,
            domain: "default".to_string(),
            tenant: TenantDefaults::default(),
            naming: None,
            lookup_timeout_seconds: 30,
            log_level: "info".to_string(),
        }
    }
}

impl CompilerConfig {
    /// 实际生效的命名配置
    pub fn naming(&self) -> NamingConfig {
        self.naming
            .clone()
            .unwrap_or_else(|| NamingConfig::for_topology(self.topology))
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_seconds)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.cluster.trim().is_empty() {
            return Err(anyhow!("集群名称不能为空"));
        }
        let naming = self.naming();
        if naming.max_name_length < 64 {
            return Err(anyhow!(
                "名称最大长度 {} 过小，至少为 64",
                naming.max_name_length
            ));
        }
        if naming.hash_length == 0 || naming.hash_length > 64 {
            return Err(anyhow!("哈希长度 {} 无效", naming.hash_length));
        }
        if self.lookup_timeout_seconds == 0 {
            return Err(anyhow!("查询超时必须大于 0"));
        }
        Ok(())
    }
}

/// 配置管理器
pub struct ConfigManager {
    /// 当前配置
    config: CompilerConfig,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_path: &str) -> Result<Self> {
        let config_path = PathBuf::from(config_path);

        let config = Self::load_config(&config_path)
            .context(format!("无法加载配置文件: {:?}", config_path))?;

        info!(
            "已加载配置: 集群 {}, 拓扑 {:?}",
            config.cluster, config.topology
        );

        Ok(Self { config })
    }

    /// 加载配置文件
    fn load_config(config_path: &Path) -> Result<CompilerConfig> {
        let config_file = config_path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;

        // 确定配置文件格式
        let format = match config_path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
        };

        let config = Config::builder()
            .add_source(File::with_name(config_file).format(format))
            .add_source(Environment::with_prefix("AEGISGATE").separator("__"))
            .build()
            .context("构建配置失败")?;

        let compiler_config = config
            .try_deserialize::<CompilerConfig>()
            .context("配置格式错误")?;
        compiler_config.validate()?;

        debug!("从 {:?} 加载配置成功", config_path);
        Ok(compiler_config)
    }

    /// 获取完整配置
    pub fn get_config(&self) -> &CompilerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_naming_swaps_with_topology() {
        let single = NamingConfig::for_topology(TopologyKind::SingleScope);
        let multi = NamingConfig::for_topology(TopologyKind::MultiTenant);
        assert_ne!(single.policy_uid_scope, multi.policy_uid_scope);
        assert_eq!(single.cluster_scope, multi.cluster_scope);
    }

    #[test]
    fn test_validate() {
        let mut config = CompilerConfig::default();
        assert!(config.validate().is_ok());

        config.cluster = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = CompilerConfig::default();
        let mut naming = config.naming();
        naming.max_name_length = 10;
        config.naming = Some(naming);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_yaml_config() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "cluster: prod-east\ntopology: multi-tenant\n\
             tenant:\n  org_id: acme\n  project_id: payments\n"
        )
        .unwrap();

        let manager = ConfigManager::new(file.path().to_str().unwrap()).unwrap();
        let config = manager.get_config();
        assert_eq!(config.cluster, "prod-east");
        assert_eq!(config.topology, TopologyKind::MultiTenant);
        assert_eq!(config.tenant.project_id, "payments");
        assert_eq!(config.lookup_timeout_seconds, 30);
        assert_eq!(
            config.naming().policy_uid_scope,
            "aegisgate/network_policy_uid"
        );
    }

    #[test]
    fn test_unsupported_format() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(ConfigManager::new(file.path().to_str().unwrap()).is_err());
    }
}

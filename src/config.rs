use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::correlator::PortRoles;
use crate::decoder::DecoderOptions;

/// 探针配置，从 TOML 文件读取，缺省字段使用默认值
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 抓包网络接口
    pub interface: String,
    /// BPF 过滤器
    pub bpf_filter: String,
    pub snaplen: i32,
    /// 负载包含该字符串的帧直接丢弃
    pub payload_filter: Option<String>,
    /// 是否开启 IPv4 分片重组
    pub reassembly: bool,
    pub fragment_timeout_secs: u64,
    pub workers: usize,
    /// 每个 worker 的队列长度
    pub queue_depth: usize,
    /// NG 控制协议端口
    pub ng_port: Option<u16>,
    /// 日志（syslog）端口
    pub log_port: Option<u16>,
    /// 为空时使用系统主机名
    pub hostname: Option<String>,
    pub log_level: String,
    /// 缓存和分片清理间隔
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "any".to_string(),
            bpf_filter: "udp or tcp".to_string(),
            snaplen: 65535,
            payload_filter: None,
            reassembly: true,
            fragment_timeout_secs: 30,
            workers: 4,
            queue_depth: 1024,
            ng_port: None,
            log_port: None,
            hostname: None,
            log_level: "info".to_string(),
            sweep_interval_secs: 10,
        }
    }
}

impl Config {
    /// 读取配置文件；没有给出路径时使用默认配置。
    /// 环境变量 `SIPPROBE_INTERFACE` 会覆盖网络接口。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("配置文件 {} 格式错误", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(interface) = std::env::var("SIPPROBE_INTERFACE") {
            let interface = interface.trim();
            if !interface.is_empty() {
                config.interface = interface.to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers 必须大于 0");
        }
        if self.queue_depth == 0 {
            bail!("queue_depth 必须大于 0");
        }
        if self.interface.is_empty() {
            bail!("interface 不能为空");
        }
        Ok(())
    }

    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            payload_filter: self.payload_filter.clone(),
            reassembly: self.reassembly,
            fragment_timeout: Duration::from_secs(self.fragment_timeout_secs),
        }
    }

    pub fn port_roles(&self) -> PortRoles {
        PortRoles {
            ng_port: self.ng_port,
            log_port: self.log_port,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

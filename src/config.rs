#![allow(non_snake_case)]

//! 应用配置模块
//!
//! 凭据和调优参数都来自配置文件，启动时加载一次，
//! 显式传入各组件；运行过程中不再读取任何环境

use crate::logging::LogConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
    WebDav,
}

/// 一个已认证存储系统的接入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub typ: StorageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessKey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secretKey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webdavEndpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl StorageConfig {
    /// 本地目录类型的存储系统
    pub fn local(path: &str) -> Self {
        Self {
            typ: StorageType::Local,
            path: Some(path.to_string()),
            bucket: None,
            region: None,
            accessKey: None,
            secretKey: None,
            endpoint: None,
            prefix: None,
            webdavEndpoint: None,
            username: None,
            password: None,
            root: None,
        }
    }
}

/// 传输调优配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// 最大并发传输数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
    /// 最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 下载后是否校验内容哈希（后端提供时）
    #[serde(default = "default_verify_checksum")]
    pub verify_checksum: bool,
}

fn default_max_concurrent() -> usize {
    4 // 默认并行数为4
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_verify_checksum() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_delay_ms(),
            verify_checksum: default_verify_checksum(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorConfig {
    /// 命名存储系统，引用中的 system 段对应这里的 key
    #[serde(default)]
    pub systems: HashMap<String, StorageConfig>,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl MirrorConfig {
    /// 从指定文件加载配置
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("解析配置文件失败: {:?}", path))
    }

    /// 加载配置；未指定路径且默认位置不存在时使用默认配置
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// 默认配置文件位置
    pub fn default_path() -> PathBuf {
        crate::dirs::config_dir()
            .map(|p| p.join("mirrortools"))
            .unwrap_or_else(|| PathBuf::from(".mirrortools"))
            .join("config.json")
    }
}

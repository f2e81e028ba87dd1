//! 远程引用解析
//!
//! 引用格式: `<system>://<path>`，system 对应配置中的存储系统名

use crate::error::MirrorError;
use regex::Regex;

/// 解析后的远程引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    /// 存储系统名（配置中的 key）
    pub system: String,
    /// 系统命名空间内的路径，已规范化，空串表示根
    pub path: String,
}

impl RemoteRef {
    /// 解析引用字符串，不发起任何远程调用
    pub fn parse(input: &str) -> Result<Self, MirrorError> {
        let re = Regex::new(r"^([a-z][a-z0-9-]*)://(.*)$").unwrap();

        let captures = re
            .captures(input)
            .ok_or_else(|| MirrorError::InvalidReference(input.to_string()))?;

        let system = captures[1].to_string();
        let raw_path = &captures[2];

        let decoded = urlencoding::decode(raw_path)
            .map_err(|_| MirrorError::InvalidReference(input.to_string()))?;

        let mut parts = Vec::new();
        for part in decoded.split('/') {
            match part {
                "" | "." => continue,
                // 拒绝逃逸出系统命名空间的路径
                ".." => return Err(MirrorError::InvalidReference(input.to_string())),
                p => parts.push(p),
            }
        }

        Ok(Self {
            system,
            path: parts.join("/"),
        })
    }

    /// 是否指向系统根目录
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// 路径最后一段；根引用返回 None
    pub fn basename(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.path.rsplit('/').next()
        }
    }
}

impl std::fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.system, self.path)
    }
}

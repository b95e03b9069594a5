use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::cache::DEFAULT_MAX_AGE;

/// 設定ファイルの置き場所(設定ディレクトリからの相対パス)。
const CONFIG_FILE: &str = "standup/config.json";

/// アプリケーションの設定。
///
/// 設定ファイルの値を環境変数で上書きする。
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub toggl_api_token: Option<String>,
    pub devops_organization: Option<String>,
    pub devops_project: Option<String>,
    pub devops_token: Option<String>,
    pub cache_max_age_secs: u64,
    /// 作業時間の調整結果を追記するファイル。未設定ならログに出す。
    pub export_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            toggl_api_token: None,
            devops_organization: None,
            devops_project: None,
            devops_token: None,
            cache_max_age_secs: DEFAULT_MAX_AGE.as_secs(),
            export_path: None,
        }
    }
}

/// Azure DevOpsへの接続情報。
pub struct DevOpsSettings<'a> {
    pub organization: &'a str,
    pub project: &'a str,
    pub token: &'a str,
}

impl Config {
    /// 既定の設定ファイル(存在すれば)と環境変数から設定を読み込む。
    pub fn load() -> Result<Self> {
        let config = match dirs::config_dir().map(|dir| dir.join(CONFIG_FILE)) {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        config.with_env(|name| std::env::var(name).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Reading config from {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// 環境変数の値で上書きする。
    ///
    /// # Arguments
    ///
    /// * `lookup` - 環境変数名から値を引く関数
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TOGGL_API_TOKEN") {
            self.toggl_api_token = Some(token);
        }
        if let Some(organization) = lookup("DEVOPS_ORGANIZATION") {
            self.devops_organization = Some(organization);
        }
        if let Some(project) = lookup("DEVOPS_PROJECT") {
            self.devops_project = Some(project);
        }
        if let Some(token) = lookup("DEVOPS_TOKEN") {
            self.devops_token = Some(token);
        }
        if let Some(secs) = lookup("STANDUP_CACHE_MAX_AGE_SECS") {
            self.cache_max_age_secs = secs
                .parse()
                .with_context(|| format!("STANDUP_CACHE_MAX_AGE_SECS is not a number: {}", secs))?;
        }
        if let Some(path) = lookup("STANDUP_EXPORT_PATH") {
            self.export_path = Some(PathBuf::from(path));
        }

        Ok(self)
    }

    pub fn toggl_api_token(&self) -> Result<&str> {
        self.toggl_api_token
            .as_deref()
            .context("TOGGL_API_TOKEN must be set")
    }

    pub fn devops(&self) -> Result<DevOpsSettings<'_>> {
        Ok(DevOpsSettings {
            organization: self
                .devops_organization
                .as_deref()
                .context("DEVOPS_ORGANIZATION must be set")?,
            project: self
                .devops_project
                .as_deref()
                .context("DEVOPS_PROJECT must be set")?,
            token: self
                .devops_token
                .as_deref()
                .context("DEVOPS_TOKEN must be set")?,
        })
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }
}

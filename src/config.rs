use crate::types::{EnhanceMode, Provider};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub enhance: EnhanceConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// サーバー接続設定
///
/// # デフォルト値
///
/// - `ws_url`: "ws://127.0.0.1:3005/api/v1/ws"
/// - `api_base_url`: "http://127.0.0.1:3005/api/v1"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

/// オーディオ入力設定
///
/// マイクデバイスからの入力に関する設定。
///
/// # デフォルト値
///
/// - `device_id`: "default" (システムのデフォルトデバイス)
/// - `sample_rate`: 24000 Hz (リアルタイムプロバイダの既定値)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

/// 録音セッション設定
///
/// # デフォルト値
///
/// - `provider`: "realtime"
/// - `frame_samples`: 24000 サンプル (24kHzで約1秒)
/// - `stop_grace_ms`: 500 ms (最終フレーム処理待ちの猶予)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

/// ジョブAPI設定
///
/// # デフォルト値
///
/// - `poll_interval_ms`: 1500 ms
/// - `request_timeout_seconds`: 30 秒
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

/// AIエンハンス設定
///
/// # デフォルト値
///
/// - `default_mode`: "readability"
/// - `auto_enhance`: true (セッション終了時に自動実行)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnhanceConfig {
    #[serde(default = "default_enhance_mode")]
    pub default_mode: EnhanceMode,
    #[serde(default = "default_auto_enhance")]
    pub auto_enhance: bool,
}

/// 出力設定
///
/// # デフォルト値
///
/// - `log_level`: "info"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default functions
fn default_ws_url() -> String {
    "ws://127.0.0.1:3005/api/v1/ws".to_string()
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:3005/api/v1".to_string()
}

fn default_device_id() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    24000 // リアルタイムプロバイダのネゴシエート既定値
}

fn default_provider() -> Provider {
    Provider::Realtime
}

fn default_frame_samples() -> usize {
    24000 // 24kHzで約1秒分
}

fn default_stop_grace_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_enhance_mode() -> EnhanceMode {
    EnhanceMode::Readability
}

fn default_auto_enhance() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            audio: AudioConfig::default(),
            recording: RecordingConfig::default(),
            jobs: JobsConfig::default(),
            enhance: EnhanceConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            sample_rate: default_sample_rate(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            frame_samples: default_frame_samples(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            default_mode: default_enhance_mode(),
            auto_enhance: default_auto_enhance(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Arguments
    ///
    /// * `path` - 設定ファイルのパス
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use rt_dictate::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// デフォルト値を持つ設定ファイルを生成する。
    /// 既存のファイルは上書きされる。
    ///
    /// # Errors
    ///
    /// ファイルの書き込みに失敗した場合にエラーを返す。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    /// ファイルが存在しない場合はエラーにならず、デフォルト設定を返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use rt_dictate::config::Config;
    /// let config = Config::load_or_default("config.toml").unwrap();
    /// ```
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }
}

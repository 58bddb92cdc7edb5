//! rt-dictate - リアルタイム口述筆記クライアント
//!
//! このクレートは、マイク入力の音声を文字起こしサーバーへ送信し、
//! 文字起こし結果とAIエンハンス結果を受信するクライアントを提供します。
//!
//! # 主な機能
//!
//! - **リアルタイム文字起こし**: WebSocket経由で音声フレームをストリーミング送信し、テキストのデルタを逐次受信
//! - **バッチ文字起こし**: 録音をWAVファイルとしてアップロードし、ジョブ完了までポーリング
//! - **自動再接続**: 接続断から1秒間隔で無制限に再接続
//! - **AIエンハンス**: 可読性向上・誤字修正（ストリーミング）と自由質問（単発）
//! - **ジョブ管理**: 一覧・検索・リトライ・削除
//!
//! # アーキテクチャ
//!
//! ```text
//! [Microphone] → [FrameChunker] → [SocketHandle] ⇄ [Server (WebSocket)]
//!                      │                 │
//!                      │            [ServerMessage]
//!                      ↓                 ↓
//!                [WAV encode]       [Recorder] → [UiEvent] → [Presenter]
//!                      │                 │
//!                      ↓                 ↓
//!                 [JobsClient]     [EnhanceClient]
//!                      │                 │
//!                      └──── HTTP API ───┘
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use rt_dictate::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod chunker;
pub mod config;
pub mod enhance;
pub mod jobs;
pub mod mic;
pub mod pcm;
pub mod presenter;
pub mod recorder;
pub mod socket;
pub mod types;

use serde::{Deserialize, Serialize};

/// 16ビット整数型のオーディオサンプル
///
/// PCM形式の音声データを表現するための型エイリアス。
/// -32768 から 32767 の範囲の値を取る。
pub type SampleI16 = i16;

/// 文字起こしプロバイダ
///
/// リアルタイムストリーミングとバッチアップロードのどちらで
/// 文字起こしを行うかを指定する。
///
/// # Examples
///
/// ```
/// # use rt_dictate::types::Provider;
/// let provider = Provider::Realtime; // WebSocketストリーミング
/// let provider = Provider::Batch;    // WAVアップロード + ポーリング
/// ```
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// リアルタイムストリーミング（WebSocket経由）
    Realtime,

    /// バッチ処理（WAVファイルをアップロードしてジョブをポーリング）
    Batch,
}

/// ソケット接続の論理ステータス
///
/// サーバーから `status` メッセージで通知される。
/// `Idle` は「ソケットは開いているがプロバイダ側セッションが
/// 存在しない」状態を意味する。
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SocketStatus {
    /// 切断中
    Disconnected,
    /// 接続ネゴシエーション中
    Connecting,
    /// 接続済みだがセッションなし
    Idle,
    /// セッションアクティブ
    Connected,
}

impl SocketStatus {
    /// 新しいストリーミングセッションを開始できる状態かどうか
    ///
    /// セッション開始は `Idle` または `Connected` のときのみ許可される。
    pub fn can_start_session(&self) -> bool {
        matches!(self, SocketStatus::Idle | SocketStatus::Connected)
    }
}

/// クライアントからサーバーへの制御メッセージ
///
/// JSONテキストフレームとして送信される。
/// 音声データ本体は制御メッセージではなく生のバイナリフレームで送る。
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 録音セッション開始
    StartRecording {
        /// 使用するプロバイダ
        provider: Provider,
    },

    /// 録音セッション終了（発話終端の通知）
    StopRecording,
}

/// サーバーからクライアントへのメッセージ
///
/// `type` フィールドでタグ付けされたJSONとして受信する。
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 接続ステータス通知
    Status {
        /// 新しいステータス
        status: SocketStatus,
    },

    /// 文字起こしテキストのデルタ
    Text {
        /// テキスト断片
        content: String,
        /// true の場合は表示中のテキストを置き換える
        #[serde(rename = "isNewResponse", default)]
        is_new_response: bool,
    },

    /// AI応答テキストのデルタ
    ModelResponse {
        /// テキスト断片
        content: String,
        /// true の場合は表示中のテキストを置き換える
        #[serde(rename = "isNewResponse", default)]
        is_new_response: bool,
    },

    /// 構造化された文字起こし結果
    StructuredResult {
        /// 結果ペイロード
        result: StructuredResult,
    },

    /// サーバー側エラー
    Error {
        /// エラーメッセージ
        content: String,
    },
}

/// 話者毎の発話セグメント
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SpeechSegment {
    /// 話者ラベル
    #[serde(default)]
    pub speaker: String,

    /// 開始時刻（サーバー定義のフォーマット）
    #[serde(default)]
    pub start_time: String,

    /// 終了時刻（サーバー定義のフォーマット）
    #[serde(default)]
    pub end_time: String,

    /// 発話内容
    #[serde(default)]
    pub content: String,
}

/// 構造化された文字起こし結果
///
/// リアルタイムセッションの最終結果、およびバッチジョブの
/// 完了結果の両方でこの形式が使われる。
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StructuredResult {
    /// タイトル
    #[serde(default)]
    pub title: String,

    /// 発話セグメントの配列
    #[serde(default)]
    pub speech_segments: Vec<SpeechSegment>,

    /// 全体の要約
    #[serde(default)]
    pub summary: String,

    /// 可読性向上済みテキスト（存在する場合のみ）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readability: Option<String>,
}

impl StructuredResult {
    /// セグメント内容を連結したプレーンテキストの書き起こしを取得
    pub fn transcript_text(&self) -> String {
        self.speech_segments
            .iter()
            .map(|seg| seg.content.as_str())
            .filter(|content| !content.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 文字起こしジョブのステータス
///
/// サーバー側で遷移する。`Completed` / `Failed` が終端状態で、
/// 終端以降は明示的なリトライなしには遷移しない。
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 処理待ち
    Pending,
    /// 処理中
    Processing,
    /// 完了（終端）
    Completed,
    /// 失敗（終端、リトライ可能）
    Failed,
}

impl JobStatus {
    /// 終端状態かどうか
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// 文字起こしジョブ
///
/// サーバーが所有するジョブレコードの読み取り専用スナップショット。
/// クライアントはポーリングでこれを更新する。
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TranscriptionJob {
    /// ジョブID
    pub id: String,

    /// 現在のステータス
    pub status: JobStatus,

    /// タイトル（完了後に設定される）
    #[serde(default)]
    pub title: Option<String>,

    /// 要約（完了後に設定される）
    #[serde(default)]
    pub summary: Option<String>,

    /// 作成日時（ISO 8601）
    #[serde(default)]
    pub created_at: String,

    /// 更新日時（ISO 8601）
    #[serde(default)]
    pub updated_at: String,

    /// 失敗時のエラーメッセージ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// 完了時の結果ペイロード
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StructuredResult>,
}

/// AIエンハンスのモード
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnhanceMode {
    /// 可読性向上（ストリーミング応答）
    Readability,
    /// 事実確認（ストリーミング応答）
    Correctness,
    /// 自由質問（単発応答）
    Ask,
}

impl EnhanceMode {
    /// APIエンドポイントのパス
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            EnhanceMode::Readability => "readability",
            EnhanceMode::Correctness => "correctness",
            EnhanceMode::Ask => "ask_ai",
        }
    }

    /// 応答をストリーミングで受信するモードかどうか
    pub fn is_streaming(&self) -> bool {
        !matches!(self, EnhanceMode::Ask)
    }
}

/// プレゼンテーション層へ通知するイベント
///
/// コアコンポーネントはUIを直接操作せず、このイベントを
/// 発行するだけに留める。JSON形式でシリアライズして
/// 標準出力に出力される。
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiEvent {
    /// 接続ステータスの変化
    Status {
        /// 新しいステータス
        status: SocketStatus,
    },

    /// 文字起こしテキストの更新
    ///
    /// `replace` が true の場合は表示を置き換え、経過時間表示を
    /// リセットする。false の場合は末尾に追記する。
    Transcript { content: String, replace: bool },

    /// エンハンス結果テキストの更新
    Enhancement { content: String, replace: bool },

    /// エンハンス完了
    EnhancementDone {
        /// 完了したモード
        mode: EnhanceMode,
    },

    /// Ask モードの回答（単発）
    Answer { content: String },

    /// 構造化結果
    StructuredResult { result: StructuredResult },

    /// ジョブのスナップショット（ポーリング毎に発行）
    Job { job: TranscriptionJob },

    /// ユーザーに提示すべきエラー
    Error { message: String },
}

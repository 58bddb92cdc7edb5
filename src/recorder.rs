use crate::chunker::FrameChunker;
use crate::config::Config;
use crate::enhance::EnhanceClient;
use crate::jobs::JobsClient;
use crate::mic::Microphone;
use crate::pcm;
use crate::socket::SocketHandle;
use crate::types::{
    ClientMessage, EnhanceMode, JobStatus, Provider, SampleI16, ServerMessage, SocketStatus,
    UiEvent,
};
use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// 進行中（または終了処理中）の録音セッション
struct RecordingSession {
    provider: Provider,
    started_at: chrono::DateTime<chrono::Local>,
    /// false になった後も、自動エンハンスが確定するまでセッションは残る
    active: bool,
    auto_enhance_fired: bool,
}

impl RecordingSession {
    fn new(provider: Provider) -> Self {
        Self {
            provider,
            started_at: chrono::Local::now(),
            active: true,
            auto_enhance_fired: false,
        }
    }
}

/// 録音コントローラ
///
/// マイク、フレーム分割、ソケット送信、ジョブ登録、自動エンハンスを
/// ひとつの状態機械としてまとめる。マイクは最初のセッション開始時に
/// 一度だけ開き、以降は pause / resume で使い回す。
pub struct Recorder {
    provider: Provider,
    audio: crate::config::AudioConfig,
    stop_grace: Duration,
    auto_enhance: bool,
    default_enhance_mode: EnhanceMode,

    mic: Option<Microphone>,
    audio_tx: mpsc::Sender<Vec<SampleI16>>,
    chunker: FrameChunker,
    batch_buffer: Vec<SampleI16>,

    transcript: String,
    session: Option<RecordingSession>,
    active_job_id: Option<String>,
    poll_handle: Option<JoinHandle<()>>,

    socket: SocketHandle,
    jobs: JobsClient,
    enhance: EnhanceClient,
    event_tx: mpsc::Sender<UiEvent>,
}

impl Recorder {
    pub fn new(
        config: &Config,
        socket: SocketHandle,
        jobs: JobsClient,
        enhance: EnhanceClient,
        event_tx: mpsc::Sender<UiEvent>,
        audio_tx: mpsc::Sender<Vec<SampleI16>>,
    ) -> Self {
        Self {
            provider: config.recording.provider,
            audio: config.audio.clone(),
            stop_grace: Duration::from_millis(config.recording.stop_grace_ms),
            auto_enhance: config.enhance.auto_enhance,
            default_enhance_mode: config.enhance.default_mode,
            mic: None,
            audio_tx,
            chunker: FrameChunker::new(&config.recording),
            batch_buffer: Vec::new(),
            transcript: String::new(),
            session: None,
            active_job_id: None,
            poll_handle: None,
            socket,
            jobs,
            enhance,
            event_tx,
        }
    }

    /// 録音中かどうか
    pub fn is_recording(&self) -> bool {
        self.session.as_ref().map(|s| s.active).unwrap_or(false)
    }

    /// セッションも後処理も残っていないかどうか
    pub fn is_settled(&self) -> bool {
        self.session.is_none()
            && !self.enhance.is_busy()
            && self
                .poll_handle
                .as_ref()
                .map(|h| h.is_finished())
                .unwrap_or(true)
    }

    /// 蓄積された文字起こしテキスト
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// 録音を開始
    ///
    /// すでに録音中の場合は何もしない。リアルタイムプロバイダでは
    /// ソケットがセッション開始可能になるまで待ってから開始する。
    pub async fn start(&mut self) -> Result<()> {
        if self.is_recording() {
            log::debug!("すでに録音中のため開始要求を無視");
            return Ok(());
        }

        // マイクは初回のみ開き、以降はキャッシュを使う
        if self.mic.is_none() {
            let mic = Microphone::open(&self.audio, self.audio_tx.clone())
                .context("マイクの初期化に失敗")?;
            self.mic = Some(mic);
        }

        self.transcript.clear();
        self.active_job_id = None;

        match self.provider {
            Provider::Realtime => {
                self.socket
                    .wait_until_ready()
                    .await
                    .context("ソケットの準備待ちに失敗")?;
                self.chunker.reset();
                self.socket.send(ClientMessage::StartRecording {
                    provider: self.provider,
                })?;
            }
            Provider::Batch => {
                self.batch_buffer.clear();
            }
        }

        if let Some(mic) = &self.mic {
            mic.resume()?;
        }

        self.session = Some(RecordingSession::new(self.provider));
        log::info!("録音を開始しました (プロバイダ: {:?})", self.provider);
        Ok(())
    }

    /// 録音を停止
    ///
    /// リアルタイム: 端数フレームを送ってから猶予時間を置き、
    /// 発話終端を通知する。セッションは最終結果と idle 通知が
    /// 届くまで残る。
    ///
    /// バッチ: 蓄積サンプルをWAV化してジョブ登録し、バックグラウンドで
    /// ポーリングを開始する。
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_recording() {
            log::debug!("録音中でないため停止要求を無視");
            return Ok(());
        }

        if let Some(mic) = &self.mic {
            mic.pause()?;
        }

        let provider = self
            .session
            .as_ref()
            .map(|s| s.provider)
            .unwrap_or(self.provider);

        if let Some(session) = &mut self.session {
            session.active = false;
            let elapsed = chrono::Local::now() - session.started_at;
            log::info!(
                "録音を停止しました (時間: {:.1}秒)",
                elapsed.num_milliseconds() as f64 / 1000.0
            );
        }

        match provider {
            Provider::Realtime => {
                if let Some(frame) = self.chunker.flush() {
                    self.socket.send_frame(frame);
                }
                // 最終フレームがサーバーに届くまでの猶予
                tokio::time::sleep(self.stop_grace).await;
                self.socket.send(ClientMessage::StopRecording)?;
                // セッションは idle 通知の受信まで残す（自動エンハンス用）
            }
            Provider::Batch => {
                self.session = None;
                let samples = std::mem::take(&mut self.batch_buffer);
                if samples.is_empty() {
                    log::warn!("録音サンプルが空のためジョブ登録をスキップ");
                    return Ok(());
                }
                self.submit_batch(samples).await?;
            }
        }

        Ok(())
    }

    /// WAV化してジョブ登録し、終端までのポーリングを開始
    async fn submit_batch(&mut self, samples: Vec<SampleI16>) -> Result<()> {
        let wav = pcm::encode_wav(&samples, self.audio.sample_rate)?;
        let filename = chrono::Local::now()
            .format("rec_%Y-%m-%d_%H-%M-%S.wav")
            .to_string();

        let job = self.jobs.submit(wav, &filename).await?;
        self.active_job_id = Some(job.id.clone());
        let _ = self.event_tx.send(UiEvent::Job { job: job.clone() }).await;

        let jobs = self.jobs.clone();
        let event_tx = self.event_tx.clone();
        let job_id = job.id;

        self.poll_handle = Some(tokio::spawn(async move {
            let tick_tx = event_tx.clone();
            let result = jobs
                .poll_until_terminal(&job_id, move |job| {
                    let _ = tick_tx.try_send(UiEvent::Job { job: job.clone() });
                })
                .await;

            match result {
                Ok(job) => match job.status {
                    JobStatus::Completed => {
                        if let Some(result) = job.result {
                            let _ = event_tx.try_send(UiEvent::Transcript {
                                content: result.transcript_text(),
                                replace: true,
                            });
                            let _ = event_tx.try_send(UiEvent::StructuredResult { result });
                        }
                    }
                    JobStatus::Failed => {
                        let _ = event_tx.try_send(UiEvent::Error {
                            message: format!(
                                "文字起こしジョブ {} が失敗: {}",
                                job.id,
                                job.error.unwrap_or_else(|| "不明なエラー".to_string())
                            ),
                        });
                    }
                    _ => {}
                },
                Err(e) => {
                    let _ = event_tx.try_send(UiEvent::Error {
                        message: format!("ジョブのポーリングに失敗: {}", e),
                    });
                }
            }
        }));

        Ok(())
    }

    /// プロバイダを切り替え
    ///
    /// 録音中の場合は先に停止する。
    pub async fn set_provider(&mut self, provider: Provider) -> Result<()> {
        if self.is_recording() {
            log::info!("プロバイダ切り替えのため録音を停止します");
            self.stop().await?;
        }
        self.provider = provider;
        log::info!("プロバイダを切り替え: {:?}", provider);
        Ok(())
    }

    /// マイクからのサンプルバッチを処理
    pub fn on_samples(&mut self, samples: Vec<SampleI16>) {
        if !self.is_recording() {
            // pause 直後に残りのコールバックが届くことがある
            return;
        }

        match self.provider {
            Provider::Realtime => {
                for frame in self.chunker.push(&samples) {
                    self.socket.send_frame(frame);
                }
            }
            Provider::Batch => {
                self.batch_buffer.extend_from_slice(&samples);
            }
        }
    }

    /// サーバーからのメッセージを処理
    pub async fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Text {
                content,
                is_new_response,
            } => {
                if is_new_response {
                    self.transcript = content.clone();
                } else {
                    self.transcript.push_str(&content);
                }
                let _ = self
                    .event_tx
                    .send(UiEvent::Transcript {
                        content,
                        replace: is_new_response,
                    })
                    .await;
            }
            ServerMessage::ModelResponse {
                content,
                is_new_response,
            } => {
                let _ = self
                    .event_tx
                    .send(UiEvent::Enhancement {
                        content,
                        replace: is_new_response,
                    })
                    .await;
            }
            ServerMessage::Status { status } => {
                let _ = self.event_tx.send(UiEvent::Status { status }).await;
                if status == SocketStatus::Idle {
                    self.on_session_settled();
                }
            }
            ServerMessage::StructuredResult { result } => {
                if self.transcript.is_empty() {
                    self.transcript = result.transcript_text();
                }
                let _ = self
                    .event_tx
                    .send(UiEvent::StructuredResult { result })
                    .await;
            }
            ServerMessage::Error { content } => {
                let _ = self
                    .event_tx
                    .send(UiEvent::Error { message: content })
                    .await;
            }
        }
    }

    /// リアルタイムセッションの終了確定（idle 観測）時の処理
    ///
    /// 自動エンハンスはセッション毎にちょうど1回だけ実行する。
    fn on_session_settled(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };
        if session.active || session.provider != Provider::Realtime {
            return;
        }

        if self.auto_enhance && !session.auto_enhance_fired && !self.transcript.is_empty() {
            session.auto_enhance_fired = true;
            log::info!("自動エンハンスを開始 ({:?})", self.default_enhance_mode);
            self.enhance.run(
                self.default_enhance_mode,
                self.transcript.clone(),
                true,
                self.active_job_id.clone(),
            );
        }

        self.session = None;
    }

    /// バックグラウンド処理（エンハンス・ポーリング）の完了を待つ
    pub async fn finish(&mut self) {
        self.enhance.wait().await;
        if let Some(handle) = self.poll_handle.take() {
            let _ = handle.await;
        }
    }

    /// バックグラウンド処理を中断して破棄
    pub fn abort_background(&mut self) {
        self.enhance.abort();
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
    }
}

use crate::jobs::JobsClient;
use crate::types::{EnhanceMode, UiEvent};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// ask_ai エンドポイントのレスポンス
#[derive(Debug, Deserialize)]
struct AskResponse {
    answer: String,
}

/// AIエンハンスリクエスタ
///
/// 可読性向上・誤字修正はストリーミングで受信しながら逐次表示、
/// 質問（ask）は単発のJSON応答を待つ。同時に実行できるリクエストは
/// 1つだけで、新しいリクエストは実行中のものを中断して置き換える。
pub struct EnhanceClient {
    base_url: String,
    client: reqwest::Client,
    event_tx: mpsc::Sender<UiEvent>,
    jobs: Option<JobsClient>,
    inflight: Option<JoinHandle<()>>,
}

impl EnhanceClient {
    pub fn new(
        base_url: &str,
        event_tx: mpsc::Sender<UiEvent>,
        jobs: Option<JobsClient>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            event_tx,
            jobs,
            inflight: None,
        }
    }

    /// エンハンスを開始（シングルフライト）
    ///
    /// 実行中のリクエストがあれば中断して捨てる。以前のリクエストの
    /// 残りのストリーミングチャンクが後から届くことはない。
    ///
    /// `auto` が true の場合（セッション終了時の自動実行）、失敗は
    /// ログに出すだけでUIイベントにはしない。明示的な実行の失敗は
    /// エラーイベントとして報告する。
    pub fn run(&mut self, mode: EnhanceMode, text: String, auto: bool, job_id: Option<String>) {
        if let Some(prev) = self.inflight.take() {
            if !prev.is_finished() {
                log::info!("実行中のエンハンスを中断して新しいリクエストを開始します");
            }
            prev.abort();
        }

        if text.trim().is_empty() {
            log::debug!("エンハンス対象のテキストが空のためスキップ");
            return;
        }

        let url = format!("{}/{}", self.base_url, mode.endpoint_path());
        let client = self.client.clone();
        let event_tx = self.event_tx.clone();
        let jobs = self.jobs.clone();

        self.inflight = Some(tokio::spawn(async move {
            let result = if mode.is_streaming() {
                stream_enhancement(&client, &url, &text, &event_tx).await
            } else {
                ask(&client, &url, &text, &event_tx).await
            };

            match result {
                Ok(enhanced) => {
                    let _ = event_tx.send(UiEvent::EnhancementDone { mode }).await;

                    // ストリーミング系の結果はジョブに紐付けて保存する。
                    // 保存失敗で表示結果は巻き戻さない。
                    if mode.is_streaming() {
                        if let (Some(jobs), Some(job_id)) = (jobs, job_id) {
                            if let Err(e) = jobs.save_enhancement(&job_id, mode, &enhanced).await {
                                log::warn!("エンハンス結果の保存に失敗: {}", e);
                            }
                        }
                    }
                }
                Err(e) => {
                    if auto {
                        log::warn!("自動エンハンスに失敗: {}", e);
                    } else {
                        log::error!("エンハンスに失敗: {}", e);
                        let _ = event_tx
                            .send(UiEvent::Error {
                                message: format!("エンハンスに失敗: {}", e),
                            })
                            .await;
                    }
                }
            }
        }));
    }

    /// 実行中のリクエストを中断
    pub fn abort(&mut self) {
        if let Some(handle) = self.inflight.take() {
            handle.abort();
        }
    }

    /// 実行中のリクエストの完了を待つ
    pub async fn wait(&mut self) {
        if let Some(handle) = self.inflight.take() {
            let _ = handle.await;
        }
    }

    /// リクエストが実行中かどうか
    pub fn is_busy(&self) -> bool {
        self.inflight
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

/// ストリーミングエンハンス（readability / correctness）
///
/// 応答ボディをチャンク毎に受信し、最初のチャンクは置き換え、
/// 以降は追記としてUIへ流す。全文を連結して返す。
async fn stream_enhancement(
    client: &reqwest::Client,
    url: &str,
    text: &str,
    event_tx: &mpsc::Sender<UiEvent>,
) -> Result<String> {
    let response = client
        .post(url)
        .json(&serde_json::json!({ "text": text }))
        .send()
        .await
        .context("エンハンスリクエスト失敗")?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("エンハンス失敗: {} - {}", status, error_text);
    }

    let mut stream = response.bytes_stream();
    let mut full = String::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut first = true;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("ストリーミング応答の読み取り失敗")?;
        pending.extend_from_slice(&chunk);

        // チャンク境界がUTF-8の途中で切れることがあるため、
        // デコードできた分だけ先に流す
        let valid_len = match std::str::from_utf8(&pending) {
            Ok(s) => s.len(),
            Err(e) => e.valid_up_to(),
        };
        if valid_len == 0 {
            continue;
        }

        let piece = String::from_utf8_lossy(&pending[..valid_len]).into_owned();
        pending.drain(..valid_len);
        full.push_str(&piece);

        let _ = event_tx
            .send(UiEvent::Enhancement {
                content: piece,
                replace: first,
            })
            .await;
        first = false;
    }

    if !pending.is_empty() {
        log::warn!("応答末尾に不完全なUTF-8シーケンス ({} bytes)", pending.len());
    }

    Ok(full)
}

/// 単発の質問リクエスト（ask_ai）
async fn ask(
    client: &reqwest::Client,
    url: &str,
    text: &str,
    event_tx: &mpsc::Sender<UiEvent>,
) -> Result<String> {
    let response = client
        .post(url)
        .json(&serde_json::json!({ "text": text }))
        .send()
        .await
        .context("質問リクエスト失敗")?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("質問失敗: {} - {}", status, error_text);
    }

    let parsed: AskResponse = response.json().await.context("回答のパース失敗")?;

    let _ = event_tx
        .send(UiEvent::Answer {
            content: parsed.answer.clone(),
        })
        .await;

    Ok(parsed.answer)
}

use crate::config::JobsConfig;
use crate::types::{EnhanceMode, TranscriptionJob};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use tokio::time::Duration;

/// ジョブ登録APIのレスポンス
#[derive(Debug, Deserialize)]
struct EnqueueResponse {
    job: TranscriptionJob,
}

/// 検索結果の1件
#[derive(Clone, Debug, Deserialize, serde::Serialize)]
pub struct SearchHit {
    pub job_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

/// ジョブステータス取得の抽象
///
/// ポーリングループを実HTTPから切り離してテスト可能にするための
/// 共通トレイト。
#[async_trait]
pub trait JobFetcher: Send + Sync {
    /// ジョブの現在のスナップショットを取得
    async fn fetch(&self, job_id: &str) -> Result<TranscriptionJob>;
}

/// 文字起こしジョブAPIクライアント
///
/// WAVファイルのアップロード、ステータスポーリング、リトライ、
/// 一覧・検索・削除を担当する。
#[derive(Clone)]
pub struct JobsClient {
    base_url: String,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl JobsClient {
    pub fn new(base_url: &str, config: &JobsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("ジョブAPI HTTPクライアント作成失敗")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// WAVファイルをアップロードしてジョブを作成
    ///
    /// 成功時は `pending` 状態のジョブが返る。失敗（非2xx応答を含む）は
    /// 明示的な登録エラーとして返し、握り潰さない。
    pub async fn submit(&self, wav_data: Vec<u8>, filename: &str) -> Result<TranscriptionJob> {
        let part = multipart::Part::bytes(wav_data)
            .file_name(filename.to_string())
            .mime_str("audio/wav")?;

        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("transcription_jobs"))
            .multipart(form)
            .send()
            .await
            .context("ジョブ登録リクエスト失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("ジョブ登録失敗: {} - {}", status, error_text);
        }

        let enqueued: EnqueueResponse = response
            .json()
            .await
            .context("ジョブ登録レスポンスのパース失敗")?;

        log::info!("文字起こしジョブを登録: {}", enqueued.job.id);
        Ok(enqueued.job)
    }

    /// 失敗したジョブをリトライ
    ///
    /// サーバーはジョブを `pending` として再投入する（同じIDが
    /// 再利用されることが多い）。呼び出し側は返されたジョブIDで
    /// 改めてポーリングループに入る。
    pub async fn retry(&self, job_id: &str) -> Result<TranscriptionJob> {
        let response = self
            .client
            .post(self.url(&format!("transcription_jobs/{}/retry", job_id)))
            .send()
            .await
            .context("ジョブリトライリクエスト失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("ジョブリトライ失敗: {} - {}", status, error_text);
        }

        let enqueued: EnqueueResponse = response
            .json()
            .await
            .context("リトライレスポンスのパース失敗")?;

        log::info!("ジョブをリトライ: {}", enqueued.job.id);
        Ok(enqueued.job)
    }

    /// ジョブ一覧を取得
    pub async fn list(&self) -> Result<Vec<TranscriptionJob>> {
        let response = self
            .client
            .get(self.url("transcription_jobs"))
            .send()
            .await
            .context("ジョブ一覧リクエスト失敗")?;

        if !response.status().is_success() {
            anyhow::bail!("ジョブ一覧取得失敗: {}", response.status());
        }

        response.json().await.context("ジョブ一覧のパース失敗")
    }

    /// ジョブを削除
    pub async fn delete(&self, job_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("transcription_jobs/{}", job_id)))
            .send()
            .await
            .context("ジョブ削除リクエスト失敗")?;

        if !response.status().is_success() {
            anyhow::bail!("ジョブ削除失敗: {}", response.status());
        }

        log::info!("ジョブを削除: {}", job_id);
        Ok(())
    }

    /// 文字起こし結果を全文検索
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(self.url("transcriptions/search"))
            .query(&[("q", query)])
            .send()
            .await
            .context("検索リクエスト失敗")?;

        if !response.status().is_success() {
            anyhow::bail!("検索失敗: {}", response.status());
        }

        let parsed: SearchResponse = response.json().await.context("検索結果のパース失敗")?;
        Ok(parsed.results)
    }

    /// エンハンス済みテキストをジョブに紐付けて保存
    ///
    /// 表示済みの結果に対するサイドチャンネル保存。失敗しても
    /// 表示内容はロールバックしない（呼び出し側が報告のみ行う）。
    pub async fn save_enhancement(
        &self,
        job_id: &str,
        mode: EnhanceMode,
        text: &str,
    ) -> Result<()> {
        let body = serde_json::json!({
            "mode": mode,
            "text": text,
        });

        let response = self
            .client
            .post(self.url(&format!("transcription_jobs/{}/enhancement", job_id)))
            .json(&body)
            .send()
            .await
            .context("エンハンス結果の保存リクエスト失敗")?;

        if !response.status().is_success() {
            anyhow::bail!("エンハンス結果の保存失敗: {}", response.status());
        }

        Ok(())
    }

    /// 終端状態になるまでポーリング
    ///
    /// 設定された間隔（既定1.5秒）でステータスを取得し、取得の度に
    /// オブザーバーを呼ぶ。`completed` / `failed` に到達したら
    /// そのジョブを返す。
    ///
    /// ポーリング回数に上限はなくタイムアウトもない。`processing` の
    /// まま進まないジョブは永遠にポーリングし続ける（個人用ツールと
    /// しての意図的なトレードオフ。既知の設計上の制限）。
    pub async fn poll_until_terminal<F>(
        &self,
        job_id: &str,
        on_tick: F,
    ) -> Result<TranscriptionJob>
    where
        F: FnMut(&TranscriptionJob) + Send,
    {
        poll_with_fetcher(self, job_id, self.poll_interval, on_tick).await
    }
}

#[async_trait]
impl JobFetcher for JobsClient {
    async fn fetch(&self, job_id: &str) -> Result<TranscriptionJob> {
        let response = self
            .client
            .get(self.url(&format!("transcription_jobs/{}", job_id)))
            .send()
            .await
            .context("ジョブ取得リクエスト失敗")?;

        if !response.status().is_success() {
            anyhow::bail!("ジョブ取得失敗: {}", response.status());
        }

        response.json().await.context("ジョブのパース失敗")
    }
}

/// ポーリングループ本体
///
/// 取得エラーは警告を出して次の周期に持ち越す（ネットワーク断で
/// ループを殺さない）。
pub async fn poll_with_fetcher<F>(
    fetcher: &dyn JobFetcher,
    job_id: &str,
    interval: Duration,
    mut on_tick: F,
) -> Result<TranscriptionJob>
where
    F: FnMut(&TranscriptionJob) + Send,
{
    loop {
        match fetcher.fetch(job_id).await {
            Ok(job) => {
                on_tick(&job);
                if job.status.is_terminal() {
                    log::info!("ジョブ {} が終端状態に到達: {:?}", job.id, job.status);
                    return Ok(job);
                }
            }
            Err(e) => {
                log::warn!("ジョブ {} のステータス取得に失敗: {}", job_id, e);
            }
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobStatus, StructuredResult};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// テスト用のスクリプト化されたフェッチャ
    struct ScriptedFetcher {
        responses: Mutex<Vec<TranscriptionJob>>,
    }

    impl ScriptedFetcher {
        fn new(mut responses: Vec<TranscriptionJob>) -> Self {
            responses.reverse(); // pop で先頭から返す
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl JobFetcher for ScriptedFetcher {
        async fn fetch(&self, _job_id: &str) -> Result<TranscriptionJob> {
            let mut responses = self.responses.lock().unwrap();
            responses.pop().context("スクリプトが尽きた")
        }
    }

    fn job_with_status(status: JobStatus) -> TranscriptionJob {
        TranscriptionJob {
            id: "job-1".to_string(),
            status,
            title: None,
            summary: None,
            created_at: "2025-01-02T14:30:15".to_string(),
            updated_at: "2025-01-02T14:30:15".to_string(),
            error: None,
            result: None,
        }
    }

    #[tokio::test]
    async fn test_poll_until_terminal_observer_ticks() {
        // pending → processing → completed の3回ポーリング
        let mut completed = job_with_status(JobStatus::Completed);
        completed.result = Some(StructuredResult {
            title: "会議".to_string(),
            summary: "要約テキスト".to_string(),
            ..Default::default()
        });

        let fetcher = ScriptedFetcher::new(vec![
            job_with_status(JobStatus::Pending),
            job_with_status(JobStatus::Processing),
            completed,
        ]);

        let mut ticks: Vec<JobStatus> = Vec::new();
        let terminal = poll_with_fetcher(&fetcher, "job-1", Duration::from_millis(1), |job| {
            ticks.push(job.status);
        })
        .await
        .unwrap();

        // オブザーバーはポーリング毎にちょうど1回呼ばれる
        assert_eq!(
            ticks,
            vec![
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::Completed
            ]
        );
        assert_eq!(terminal.status, JobStatus::Completed);
        assert_eq!(terminal.result.unwrap().summary, "要約テキスト");
    }

    #[tokio::test]
    async fn test_poll_until_terminal_failed_surfaces_error() {
        let mut failed = job_with_status(JobStatus::Failed);
        failed.error = Some("backend exploded".to_string());

        let fetcher = ScriptedFetcher::new(vec![
            job_with_status(JobStatus::Pending),
            failed,
        ]);

        let terminal = poll_with_fetcher(&fetcher, "job-1", Duration::from_millis(1), |_| {})
            .await
            .unwrap();

        assert_eq!(terminal.status, JobStatus::Failed);
        assert_eq!(terminal.error.as_deref(), Some("backend exploded"));
    }

    /// リトライAPIを模したテストサーバー
    ///
    /// POST（リトライ）には pending として再投入されたジョブを、
    /// GET（ポーリング）には completed のジョブを返す。
    async fn retry_test_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    let head = String::from_utf8_lossy(&buf[..n]);

                    let body = if head.starts_with("POST") {
                        r#"{"job":{"id":"j1","status":"pending","created_at":"2025-01-02T14:30:15","updated_at":"2025-01-02T14:40:00"}}"#
                    } else {
                        r#"{"id":"j1","status":"completed","created_at":"2025-01-02T14:30:15","updated_at":"2025-01-02T14:41:10","result":{"title":"再処理","speech_segments":[],"summary":"リトライ後の要約"}}"#
                    };
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_retry_reenters_poll_loop_to_completion() {
        let base_url = retry_test_server().await;
        let mut config = JobsConfig::default();
        config.poll_interval_ms = 10;
        let client = JobsClient::new(&base_url, &config).unwrap();

        // リトライで pending として再投入される
        let job = client.retry("j1").await.unwrap();
        assert_eq!(job.id, "j1");
        assert_eq!(job.status, JobStatus::Pending);

        // 返されたIDで通常のポーリングに入り、終端まで追跡できる
        let mut ticks = 0usize;
        let terminal = client
            .poll_until_terminal(&job.id, |_| {
                ticks += 1;
            })
            .await
            .unwrap();

        assert!(ticks >= 1);
        assert_eq!(terminal.status, JobStatus::Completed);
        assert_eq!(terminal.result.unwrap().summary, "リトライ後の要約");
    }

    #[test]
    fn test_url_building() {
        let client = JobsClient::new("http://localhost:3005/api/v1/", &JobsConfig::default())
            .unwrap();
        assert_eq!(
            client.url("transcription_jobs"),
            "http://localhost:3005/api/v1/transcription_jobs"
        );
        assert_eq!(
            client.url("transcription_jobs/abc/retry"),
            "http://localhost:3005/api/v1/transcription_jobs/abc/retry"
        );
    }
}

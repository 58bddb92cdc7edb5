use anyhow::{Context, Result};
use env_logger::Env;
use rt_dictate::config::Config;
use rt_dictate::enhance::EnhanceClient;
use rt_dictate::jobs::JobsClient;
use rt_dictate::mic::Microphone;
use rt_dictate::presenter::{JsonPresenter, Presenter};
use rt_dictate::recorder::Recorder;
use rt_dictate::{presenter, socket};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// 終了時にセッション確定・自動エンハンスを待つ最大時間
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // デバイス一覧表示モード
    if args.len() > 1 && args[1] == "--show-devices" {
        Microphone::list_devices()?;
        return Ok(());
    }

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            &args[2]
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    // 設定ファイルのパス（ジョブ操作モードでも使う）
    let config_path = if args.len() > 1 && !args[1].starts_with("--") {
        args[1].clone()
    } else {
        "config.toml".to_string()
    };

    // 設定を読み込み
    let config = Config::load_or_default(&config_path)?;

    // ロガーを初期化
    env_logger::Builder::from_env(
        Env::default().default_filter_or(config.output.log_level.as_str()),
    )
    .format_timestamp(None)
    .init();

    // ジョブ操作モード
    if args.len() > 1 && args[1].starts_with("--") {
        let jobs = JobsClient::new(&config.server.api_base_url, &config.jobs)?;
        match args[1].as_str() {
            "--jobs" => {
                for job in jobs.list().await? {
                    println!("{}", serde_json::to_string(&job)?);
                }
                return Ok(());
            }
            "--search" => {
                let query = args.get(2).context("--search には検索語が必要です")?;
                for hit in jobs.search(query).await? {
                    println!("{}", serde_json::to_string(&hit)?);
                }
                return Ok(());
            }
            "--retry" => {
                let job_id = args.get(2).context("--retry にはジョブIDが必要です")?;
                let job = jobs.retry(job_id).await?;
                // 再投入後は通常のポーリングループに戻り、終端まで追跡する
                let terminal = jobs
                    .poll_until_terminal(&job.id, |snapshot| {
                        if let Ok(json) = serde_json::to_string(snapshot) {
                            println!("{}", json);
                        }
                    })
                    .await?;
                if let Some(error) = &terminal.error {
                    log::error!("リトライしたジョブ {} が失敗: {}", terminal.id, error);
                }
                return Ok(());
            }
            "--delete" => {
                let job_id = args.get(2).context("--delete にはジョブIDが必要です")?;
                jobs.delete(job_id).await?;
                println!("削除しました: {}", job_id);
                return Ok(());
            }
            other => {
                anyhow::bail!(
                    "不明なオプション: {} (--show-devices / --generate-config / --jobs / --search / --retry / --delete)",
                    other
                );
            }
        }
    }

    log::info!("rt-dictate を起動します");
    log::info!("設定: {:?}", config);

    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    // イベント・音声チャンネル
    let (event_tx, event_rx) = mpsc::channel(256);
    let (audio_tx, mut audio_rx) = mpsc::channel(64);

    // ソケットセッションを開始（接続・再接続はバックグラウンドで進む）
    let (socket, mut inbound_rx) = socket::connect(config.server.ws_url.clone());

    let jobs = JobsClient::new(&config.server.api_base_url, &config.jobs)?;
    let enhance = EnhanceClient::new(
        &config.server.api_base_url,
        event_tx.clone(),
        Some(jobs.clone()),
    );

    // 表示タスクを起動
    let presenter: Arc<dyn Presenter> = Arc::new(JsonPresenter);
    let presenter_task = presenter::spawn_presenter(presenter, event_rx);

    // 録音コントローラ（cpal のストリームが Send でないため main のタスクに置く）
    let mut recorder = Recorder::new(&config, socket, jobs, enhance, event_tx, audio_tx);

    recorder.start().await.context("録音の開始に失敗")?;
    log::info!("録音を開始しました (Ctrl+C で停止)");

    // メインループ: 音声とサーバーメッセージを処理しながら停止を待つ
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            Some(samples) = audio_rx.recv() => {
                recorder.on_samples(samples);
            }
            Some(message) = inbound_rx.recv() => {
                recorder.handle_message(message).await;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                // タイムアウト: ループを継続して running をチェック
            }
        }
    }

    // 停止処理
    log::info!("停止処理を開始します...");
    recorder.stop().await?;

    // 最終結果と自動エンハンスの確定を待つ（上限つき）
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while !recorder.is_settled() {
        if Instant::now() >= deadline {
            log::warn!("終了処理がタイムアウトしたため残りの処理を中断します");
            recorder.abort_background();
            break;
        }
        tokio::select! {
            Some(message) = inbound_rx.recv() => {
                recorder.handle_message(message).await;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
    recorder.finish().await;

    // イベントチャンネルを閉じて表示タスクを終わらせる
    drop(recorder);
    drop(inbound_rx);
    let _ = presenter_task.await;

    log::info!("rt-dictate を終了しました");

    Ok(())
}

use crate::types::UiEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// UIイベントの出力先
///
/// コアコンポーネントは表示方法を知らず、このトレイト越しに
/// イベントを渡すだけにする。
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn present(&self, event: UiEvent);
}

/// 1イベント1行のJSONとして標準出力へ流すプレゼンタ
///
/// エディタ連携やパイプ先のスクリプトがそのままパースできる形式。
pub struct JsonPresenter;

#[async_trait]
impl Presenter for JsonPresenter {
    async fn present(&self, event: UiEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => println!("{}", json),
            Err(e) => log::error!("UIイベントのシリアライズに失敗: {}", e),
        }
    }
}

/// イベントチャンネルを消費してプレゼンタへ流すタスクを起動
///
/// 送信側がすべてドロップされたらタスクは終了する。
pub fn spawn_presenter(
    presenter: Arc<dyn Presenter>,
    mut event_rx: mpsc::Receiver<UiEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            presenter.present(event).await;
        }
        log::debug!("イベントチャンネルがクローズされたため表示タスクを終了");
    })
}

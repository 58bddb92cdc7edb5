use crate::pcm;
use crate::types::{ClientMessage, SampleI16, ServerMessage, SocketStatus};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// 切断後に再接続を試みるまでの待ち時間
///
/// バックオフなしの固定遅延。個人用ツールの信頼性モデルとして
/// 無制限リトライを採用している（意図的な仕様）。
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// 送信キューの容量（フレーム数）
const OUTBOUND_CAPACITY: usize = 4096;

/// 受信キューの容量（メッセージ数）
const INBOUND_CAPACITY: usize = 256;

/// 送信キューに積むメッセージ
enum Outbound {
    /// JSON制御メッセージ
    Control(ClientMessage),
    /// 生PCMのバイナリフレーム
    Frame(Vec<SampleI16>),
}

/// ソケットセッションへのハンドル
///
/// 接続本体は専用タスクが所有し、ハンドル経由で送信と
/// ステータス参照のみを行う。クローン可能。
#[derive(Clone)]
pub struct SocketHandle {
    outbound_tx: mpsc::Sender<Outbound>,
    status_rx: watch::Receiver<SocketStatus>,
}

impl SocketHandle {
    /// 制御メッセージを送信
    ///
    /// 送信はファイアアンドフォーゲット。キューが満杯の場合は
    /// エラーを返す。
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound_tx
            .try_send(Outbound::Control(message))
            .context("制御メッセージの送信キュー投入に失敗")
    }

    /// 音声フレームをバイナリで送信
    ///
    /// 切断中に失われたフレームは再送されない（at-most-once）。
    pub fn send_frame(&self, samples: Vec<SampleI16>) {
        if let Err(e) = self.outbound_tx.try_send(Outbound::Frame(samples)) {
            log::warn!("音声フレームの送信キュー投入に失敗: {}", e);
        }
    }

    /// 現在の論理ステータス
    pub fn status(&self) -> SocketStatus {
        *self.status_rx.borrow()
    }

    /// ステータス監視チャンネルを取得
    pub fn status_rx(&self) -> watch::Receiver<SocketStatus> {
        self.status_rx.clone()
    }

    /// ステータスが `Idle` になるまで待機
    pub async fn wait_for_idle(&self) -> Result<()> {
        let mut rx = self.status_rx.clone();
        rx.wait_for(|s| *s == SocketStatus::Idle)
            .await
            .context("ソケットセッションタスクが終了済み")?;
        Ok(())
    }

    /// セッション開始可能なステータスになるまで待機
    pub async fn wait_until_ready(&self) -> Result<()> {
        let mut rx = self.status_rx.clone();
        rx.wait_for(|s| s.can_start_session())
            .await
            .context("ソケットセッションタスクが終了済み")?;
        Ok(())
    }
}

/// ソケットセッションを開始
///
/// 接続を所有するタスクをひとつ起動し、(ハンドル, 受信チャンネル) を
/// 返す。接続が切れた場合は1秒後にちょうど1回の再接続が
/// スケジュールされ、これをプロセス終了まで無制限に繰り返す。
pub fn connect(url: String) -> (SocketHandle, mpsc::Receiver<ServerMessage>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (status_tx, status_rx) = watch::channel(SocketStatus::Disconnected);

    tokio::spawn(session_loop(url, outbound_rx, inbound_tx, status_tx));

    (
        SocketHandle {
            outbound_tx,
            status_rx,
        },
        inbound_rx,
    )
}

/// 接続・再接続ループ
///
/// 受信側がドロップされたらループを抜けてタスクを終了する。
async fn session_loop(
    url: String,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    inbound_tx: mpsc::Sender<ServerMessage>,
    status_tx: watch::Sender<SocketStatus>,
) {
    loop {
        set_status(&status_tx, &inbound_tx, SocketStatus::Connecting).await;

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                log::info!("WebSocket接続を確立: {}", url);
                run_connection(ws, &mut outbound_rx, &inbound_tx, &status_tx).await;
                log::warn!("WebSocket接続が切断されました");
            }
            Err(e) => {
                log::warn!("WebSocket接続に失敗: {}", e);
            }
        }

        set_status(&status_tx, &inbound_tx, SocketStatus::Disconnected).await;

        // 切断中に積まれたフレームは破棄する（再接続をまたぐ再送はしない）
        let mut dropped = 0usize;
        while outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            log::warn!("切断中の送信データ {} 件を破棄しました", dropped);
        }

        if inbound_tx.is_closed() {
            log::debug!("受信側がクローズされたためセッションタスクを終了");
            return;
        }

        log::info!("{}秒後に再接続します", RECONNECT_DELAY.as_secs());
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// 確立済みの1接続を処理
///
/// 戻った時点で接続は失われている。呼び出し側が再接続を行う。
async fn run_connection(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    inbound_tx: &mpsc::Sender<ServerMessage>,
    status_tx: &watch::Sender<SocketStatus>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            cmd = outbound_rx.recv() => {
                match cmd {
                    Some(Outbound::Control(message)) => {
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                log::error!("制御メッセージのシリアライズに失敗: {}", e);
                                continue;
                            }
                        };
                        log::debug!("制御メッセージ送信: {}", json);
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            log::warn!("制御メッセージの送信に失敗: {}", e);
                            return;
                        }
                    }
                    Some(Outbound::Frame(samples)) => {
                        let bytes = pcm::frame_bytes(&samples);
                        log::debug!("音声フレーム送信: {} サンプル ({} バイト)", samples.len(), bytes.len());
                        if let Err(e) = sink.send(Message::Binary(bytes)).await {
                            log::warn!("音声フレームの送信に失敗: {}", e);
                            return;
                        }
                    }
                    None => {
                        log::debug!("送信キューがクローズされました");
                        return;
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_inbound_text(&text, inbound_tx, status_tx).await {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        log::debug!("サーバーからクローズフレームを受信");
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong等は無視（Pongはライブラリが自動応答）
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket受信エラー: {}", e);
                        return;
                    }
                    None => {
                        return;
                    }
                }
            }
        }
    }
}

/// 受信テキストフレームを処理
///
/// 受信側チャンネルがクローズ済みの場合は false を返す。
async fn handle_inbound_text(
    text: &str,
    inbound_tx: &mpsc::Sender<ServerMessage>,
    status_tx: &watch::Sender<SocketStatus>,
) -> bool {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("不明なサーバーメッセージを無視: {} ({})", text, e);
            return true;
        }
    };

    match &message {
        ServerMessage::Status { status } => {
            let _ = status_tx.send(*status);
        }
        ServerMessage::Error { content } => {
            // エラー受信時はプロバイダ側セッションが終了したものとして
            // ステータスを idle に戻す
            log::error!("サーバーエラー: {}", content);
            let _ = status_tx.send(SocketStatus::Idle);
        }
        _ => {}
    }

    inbound_tx.send(message).await.is_ok()
}

/// ローカル遷移のステータスを更新し、受信側にも通知する
async fn set_status(
    status_tx: &watch::Sender<SocketStatus>,
    inbound_tx: &mpsc::Sender<ServerMessage>,
    status: SocketStatus,
) {
    let changed = {
        let current = *status_tx.borrow();
        current != status
    };
    let _ = status_tx.send(status);
    if changed {
        let _ = inbound_tx.send(ServerMessage::Status { status }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provider;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn bind_test_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, format!("ws://{}", addr))
    }

    async fn recv_status(
        inbound_rx: &mut mpsc::Receiver<ServerMessage>,
        expected: SocketStatus,
    ) {
        loop {
            let msg = timeout(TEST_TIMEOUT, inbound_rx.recv())
                .await
                .expect("メッセージ受信がタイムアウト")
                .expect("受信チャンネルがクローズ");
            if let ServerMessage::Status { status } = msg {
                if status == expected {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_inbound_status_and_control_roundtrip() {
        let (listener, url) = bind_test_server().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                r#"{"type":"status","status":"idle"}"#.to_string(),
            ))
            .await
            .unwrap();

            // クライアントからの制御メッセージを待つ
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return text,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected frame: {:?}", other),
                }
            }
        });

        let (handle, mut inbound_rx) = connect(url);

        recv_status(&mut inbound_rx, SocketStatus::Idle).await;
        assert_eq!(handle.status(), SocketStatus::Idle);

        handle
            .send(ClientMessage::StartRecording {
                provider: Provider::Realtime,
            })
            .unwrap();

        let received = timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&received).unwrap();
        assert_eq!(parsed["type"], "start_recording");
        assert_eq!(parsed["provider"], "realtime");
    }

    #[tokio::test]
    async fn test_binary_frame_little_endian() {
        let (listener, url) = bind_test_server().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(Message::Binary(bytes))) => return bytes,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected frame: {:?}", other),
                }
            }
        });

        let (handle, mut inbound_rx) = connect(url);
        recv_status(&mut inbound_rx, SocketStatus::Connecting).await;

        // 接続確立を待ってから送信（切断中のフレームは破棄されるため）
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.send_frame(vec![0x0102, -1]);

        let bytes = timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0xFF, 0xFF]);
    }

    #[tokio::test]
    async fn test_reconnect_after_close() {
        let (listener, url) = bind_test_server().await;

        let server = tokio::spawn(async move {
            // 1回目の接続: すぐに切断する
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                r#"{"type":"status","status":"idle"}"#.to_string(),
            ))
            .await
            .unwrap();
            drop(ws);

            // 2回目の接続が来れば再接続がスケジュールされた証拠
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                r#"{"type":"status","status":"idle"}"#.to_string(),
            ))
            .await
            .unwrap();
            // クライアントが受信するまで接続を維持
            let _ = ws.next().await;
        });

        let (handle, mut inbound_rx) = connect(url);

        // 1回目: idle まで到達
        recv_status(&mut inbound_rx, SocketStatus::Idle).await;

        // 切断 → disconnected → connecting → 再接続後に再び idle
        recv_status(&mut inbound_rx, SocketStatus::Disconnected).await;
        recv_status(&mut inbound_rx, SocketStatus::Connecting).await;
        recv_status(&mut inbound_rx, SocketStatus::Idle).await;
        assert_eq!(handle.status(), SocketStatus::Idle);

        drop(inbound_rx);
        let _ = timeout(TEST_TIMEOUT, server).await;
    }

    #[tokio::test]
    async fn test_server_error_forces_idle() {
        let (listener, url) = bind_test_server().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                r#"{"type":"status","status":"connected"}"#.to_string(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                r#"{"type":"error","content":"provider failure"}"#.to_string(),
            ))
            .await
            .unwrap();
            // クライアントが処理するまで接続を維持
            let _ = ws.next().await;
        });

        let (handle, mut inbound_rx) = connect(url);

        recv_status(&mut inbound_rx, SocketStatus::Connected).await;

        // エラーメッセージは呼び出し側へ転送され、ステータスは idle に戻る
        loop {
            let msg = timeout(TEST_TIMEOUT, inbound_rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let ServerMessage::Error { content } = msg {
                assert_eq!(content, "provider failure");
                break;
            }
        }
        assert_eq!(handle.status(), SocketStatus::Idle);
    }

    #[tokio::test]
    async fn test_wait_for_idle() {
        let (listener, url) = bind_test_server().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            ws.send(Message::Text(
                r#"{"type":"status","status":"idle"}"#.to_string(),
            ))
            .await
            .unwrap();
            let _ = ws.next().await;
        });

        let (handle, _inbound_rx) = connect(url);
        timeout(TEST_TIMEOUT, handle.wait_for_idle())
            .await
            .expect("idle 待機がタイムアウト")
            .unwrap();
        assert_eq!(handle.status(), SocketStatus::Idle);
    }
}

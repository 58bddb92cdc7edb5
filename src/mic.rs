use crate::config::AudioConfig;
use crate::pcm;
use crate::types::SampleI16;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use tokio::sync::mpsc;

/// マイクからのモノラル音声キャプチャ
///
/// デバイスは一度だけ取得してキャッシュし、録音セッションを
/// またいで再利用する。マイクが使えない環境では `open` が
/// 明示的なエラーで失敗する。
pub struct Microphone {
    stream: cpal::Stream,
}

impl Microphone {
    /// マイクを取得してキャプチャストリームを構築
    ///
    /// エンコード済みのPCMサンプルが `audio_tx` に送られる。
    /// ストリームは一時停止状態で返されるため、`resume()` を
    /// 呼ぶまでキャプチャは始まらない。
    ///
    /// # Errors
    ///
    /// マイクデバイスが存在しない、または入力設定が取得できない
    /// 場合にエラーを返す（キャプチャ不可はセッション開始に対して
    /// 致命的なエラーとして扱う）。
    pub fn open(config: &AudioConfig, audio_tx: mpsc::Sender<Vec<SampleI16>>) -> Result<Self> {
        let host = cpal::default_host();

        // デバイスを取得
        let device = if config.device_id == "default" {
            host.default_input_device()
                .context("マイク入力デバイスが見つかりません")?
        } else {
            host.input_devices()
                .context("入力デバイス一覧の取得に失敗")?
                .find(|d| d.name().ok().as_deref() == Some(&config.device_id))
                .with_context(|| format!("デバイスが見つかりません: {}", config.device_id))?
        };

        log::info!("入力デバイス: {:?}", device.name());

        let default_config = device
            .default_input_config()
            .context("デフォルト入力設定が取得できません")?;

        log::info!(
            "デバイス設定: {:?}, {}Hz, {}ch",
            default_config.sample_format(),
            default_config.sample_rate().0,
            default_config.channels()
        );

        // モノラル固定のストリーム設定
        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &stream_config, audio_tx)?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &stream_config, audio_tx)?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &stream_config, audio_tx)?
            }
            cpal::SampleFormat::I32 => {
                Self::build_stream::<i32>(&device, &stream_config, audio_tx)?
            }
            _ => anyhow::bail!("サポートされていないサンプルフォーマット"),
        };

        Ok(Self { stream })
    }

    /// キャプチャストリームを構築
    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        audio_tx: mpsc::Sender<Vec<SampleI16>>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + Sample + Send + 'static,
        <T as Sample>::Float: Into<f32>,
    {
        let data_callback = move |data: &[T], _info: &cpal::InputCallbackInfo| {
            let floats: Vec<f32> = data
                .iter()
                .map(|&sample| sample.to_float_sample().into())
                .collect();
            let encoded = pcm::encode_samples(&floats);

            // 非同期送信（オーディオスレッドをブロックしない）
            match audio_tx.try_send(encoded) {
                Ok(_) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("音声キューへの送信失敗: バッファ満杯");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::warn!("音声キューへの送信失敗: チャンネルクローズ");
                }
            }
        };

        let error_callback = move |err| {
            log::error!("キャプチャストリームエラー: {}", err);
        };

        let stream = device
            .build_input_stream(config, data_callback, error_callback, None)
            .context("入力ストリームの構築に失敗")?;

        // 取得直後は一時停止しておく
        stream.pause().context("ストリームの一時停止に失敗")?;

        Ok(stream)
    }

    /// キャプチャを再開
    pub fn resume(&self) -> Result<()> {
        self.stream.play().context("キャプチャの再開に失敗")?;
        log::info!("マイクキャプチャを開始しました");
        Ok(())
    }

    /// キャプチャを一時停止
    ///
    /// デバイスは保持したまま、サンプルの供給だけを止める。
    pub fn pause(&self) -> Result<()> {
        self.stream.pause().context("キャプチャの一時停止に失敗")?;
        log::info!("マイクキャプチャを停止しました");
        Ok(())
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> Result<()> {
        let host = cpal::default_host();
        println!("利用可能な入力デバイス:");
        println!();

        for (idx, device) in host
            .input_devices()
            .context("入力デバイス一覧の取得に失敗")?
            .enumerate()
        {
            let name = device.name()?;
            println!("  [{}] {}", idx, name);

            device.supported_input_configs()?.for_each(|config_range| {
                println!(
                    "      フォーマット: {:?}, {}-{}Hz, {}ch",
                    config_range.sample_format(),
                    config_range.min_sample_rate().0,
                    config_range.max_sample_rate().0,
                    config_range.channels()
                );
            });
            println!();
        }

        Ok(())
    }
}

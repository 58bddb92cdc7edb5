use crate::types::SampleI16;
use anyhow::{Context, Result};
use std::io::Cursor;

/// 浮動小数点サンプルを16ビットPCMにエンコード
///
/// [-1.0, 1.0] の範囲にクランプした後スケーリングし、
/// [-32768, 32767] に収める。出力長は常に入力長と等しい。
///
/// # Examples
///
/// ```
/// # use rt_dictate::pcm::encode_samples;
/// let encoded = encode_samples(&[0.0, 1.0, -1.0]);
/// assert_eq!(encoded, vec![0, 32767, -32768]);
/// ```
pub fn encode_samples(samples: &[f32]) -> Vec<SampleI16> {
    samples
        .iter()
        .map(|&s| {
            let scaled = (s.clamp(-1.0, 1.0) * 32768.0).round();
            scaled.clamp(i16::MIN as f32, i16::MAX as f32) as SampleI16
        })
        .collect()
}

/// PCMサンプルをリトルエンディアンのバイト列に変換
///
/// WebSocketのバイナリフレームとして送信する形式。
pub fn frame_bytes(samples: &[SampleI16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// PCMサンプルをWAVコンテナにエンコード
///
/// モノラル16ビットPCMの標準的なWAVファイルを生成する。
/// 44バイトのヘッダ（RIFF/WAVE/fmt/data）に続いてサンプルデータが
/// 並ぶため、全体のバイト長は `44 + サンプル数 × 2` になる。
/// バッチアップロード用のファイル形式としてサーバーと互換。
pub fn encode_wav(samples: &[SampleI16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("WAVライター作成失敗")?;

        for &sample in samples {
            writer.write_sample(sample).context("WAV書き込み失敗")?;
        }

        writer.finalize().context("WAV finalize失敗")?;
    }

    Ok(cursor.into_inner())
}

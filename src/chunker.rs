use crate::config::RecordingConfig;
use crate::types::SampleI16;

/// リアルタイム送信用のフレーム分割バッファ
///
/// エンコード済みサンプルを蓄積し、固定サイズに達する毎に
/// ちょうどそのサイズのフレームを切り出す。残りは次のフレームへ
/// 持ち越す。セッション終了時のみ `flush()` で端数フレームを送る。
pub struct FrameChunker {
    frame_samples: usize,
    buffer: Vec<SampleI16>,
}

impl FrameChunker {
    pub fn new(config: &RecordingConfig) -> Self {
        Self {
            frame_samples: config.frame_samples,
            buffer: Vec::new(),
        }
    }

    /// フレームサイズを直接指定して作成
    pub fn with_frame_samples(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            buffer: Vec::new(),
        }
    }

    /// サンプルを追加し、完成したフレームを取り出す
    ///
    /// 閾値未満のフレームは決して返さない。1回の追加で複数フレームが
    /// 完成する場合は到着順にすべて返す。
    pub fn push(&mut self, samples: &[SampleI16]) -> Vec<Vec<SampleI16>> {
        self.buffer.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_samples {
            let frame: Vec<SampleI16> = self.buffer.drain(..self.frame_samples).collect();
            frames.push(frame);
        }

        frames
    }

    /// 残っているサンプルを最終フレームとして取り出す
    ///
    /// セッション終了時に呼び出し側（録音コントローラ）が明示的に
    /// 呼ぶ。空の場合は `None` を返し、フレームは送らない。
    pub fn flush(&mut self) -> Option<Vec<SampleI16>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// バッファを破棄して空にする
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// バッファ内のサンプル数
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// バッファが空かどうか
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_frame_below_threshold() {
        let mut chunker = FrameChunker::with_frame_samples(24000);
        let frames = chunker.push(&vec![1i16; 23999]);
        assert!(frames.is_empty());
        assert_eq!(chunker.len(), 23999);
    }

    #[test]
    fn test_exact_frame_size() {
        let mut chunker = FrameChunker::with_frame_samples(24000);
        let frames = chunker.push(&vec![1i16; 24000]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 24000);
        assert!(chunker.is_empty());
    }

    #[test]
    fn test_remainder_carried_over() {
        // 30000サンプル → 24000のフレーム1つ + 残り6000
        let mut chunker = FrameChunker::with_frame_samples(24000);
        let frames = chunker.push(&vec![1i16; 30000]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 24000);
        assert_eq!(chunker.len(), 6000);

        // stop 時のフラッシュで残りが出る
        let last = chunker.flush().unwrap();
        assert_eq!(last.len(), 6000);
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut chunker = FrameChunker::with_frame_samples(100);
        let frames = chunker.push(&vec![1i16; 350]);
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert_eq!(frame.len(), 100);
        }
        assert_eq!(chunker.len(), 50);
    }

    #[test]
    fn test_fifo_ordering_across_batches() {
        // 順番の異なる値を複数回に分けて追加し、出力が到着順であることを確認
        let mut chunker = FrameChunker::with_frame_samples(4);
        let mut all: Vec<i16> = Vec::new();

        let mut emitted: Vec<i16> = Vec::new();
        for batch in [&[1i16, 2, 3][..], &[4, 5][..], &[6, 7, 8, 9, 10][..]] {
            all.extend_from_slice(batch);
            for frame in chunker.push(batch) {
                assert_eq!(frame.len(), 4);
                emitted.extend(frame);
            }
        }
        if let Some(rest) = chunker.flush() {
            emitted.extend(rest);
        }

        assert_eq!(emitted, all);
    }

    #[test]
    fn test_flush_empty_returns_none() {
        let mut chunker = FrameChunker::with_frame_samples(24000);
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn test_reset_discards_buffer() {
        let mut chunker = FrameChunker::with_frame_samples(24000);
        chunker.push(&vec![1i16; 100]);
        chunker.reset();
        assert!(chunker.is_empty());
        assert!(chunker.flush().is_none());
    }
}

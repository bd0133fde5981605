//! サンプルテーブル（stsc / stts / ctts / stsz / stss）に対する検索処理をまとめたモジュール
//!
//! いずれの関数もデコード済みのテーブルを参照するだけで、状態を持たない。
//! サンプル番号とチャンク番号は MP4 の慣例に従って 1 始まりで、0 は常に
//! [`ErrorKind::OutOfBounds`](crate::ErrorKind::OutOfBounds) エラーとなる。
use std::num::NonZeroU32;

use crate::{
    Error, Result,
    boxes::{CttsEntry, StscEntry, StszBox, SttsEntry},
};

/// チャンクの位置情報
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkInfo {
    /// チャンク番号（1 始まり）
    pub chunk: NonZeroU32,

    /// チャンク内の最初のサンプルの番号（1 始まり）
    pub first_sample: u32,

    /// チャンク内のサンプル数
    pub sample_count: u32,

    /// チャンク内のサンプルが参照するサンプルエントリーのインデックス
    pub sample_description_index: NonZeroU32,
}

impl ChunkInfo {
    /// チャンク内の最後のサンプルの番号
    ///
    /// `u32` の範囲を超える場合は `u32::MAX` に丸められる
    pub fn last_sample(&self) -> u32 {
        self.first_sample
            .saturating_add(self.sample_count.saturating_sub(1))
    }
}

#[track_caller]
fn check_sample_number(sample: u32) -> Result<()> {
    if sample == 0 {
        return Err(Error::out_of_bounds(
            "Sample numbers start at 1, but 0 was given",
        ));
    }
    Ok(())
}

/// `sample` 番目のサンプルを含むチャンクを探す
///
/// 最後のランは無限に続くものとして扱うため、トラック全体のサンプル数を超える番号の検査は呼び出し側で行う必要がある。
/// 1 チャンクあたりのサンプル数が 0 のランは読み飛ばされる。
pub fn chunk_for_sample(runs: &[StscEntry], sample: u32) -> Result<ChunkInfo> {
    check_sample_number(sample)?;

    // 1 始まりのサンプル番号をそのまま累積する
    let mut run_first_sample = 1u64;
    for (i, run) in runs.iter().enumerate() {
        let next_first_chunk = match runs.get(i + 1) {
            Some(next) if next.first_chunk <= run.first_chunk => {
                return Err(Error::invalid_data(format!(
                    "stsc first_chunk values must be strictly increasing: {} is followed by {}",
                    run.first_chunk, next.first_chunk
                )));
            }
            Some(next) => Some(next.first_chunk.get()),
            None => None,
        };
        if run.sample_per_chunk == 0 {
            continue;
        }

        let per_chunk = u64::from(run.sample_per_chunk);
        let run_samples =
            next_first_chunk.map(|next| u64::from(next - run.first_chunk.get()) * per_chunk);
        if run_samples.is_none_or(|n| u64::from(sample) < run_first_sample.saturating_add(n)) {
            let index = (u64::from(sample) - run_first_sample) / per_chunk;
            let chunk = u64::from(run.first_chunk.get()) + index;
            let chunk = u32::try_from(chunk)
                .ok()
                .and_then(NonZeroU32::new)
                .ok_or_else(|| {
                    Error::out_of_bounds(format!("Chunk number for sample {sample} overflows"))
                })?;
            return Ok(ChunkInfo {
                chunk,
                first_sample: (run_first_sample + index * per_chunk) as u32,
                sample_count: run.sample_per_chunk,
                sample_description_index: run.sample_description_index,
            });
        }
        run_first_sample = run_first_sample.saturating_add(run_samples.unwrap_or(0));
    }

    Err(Error::out_of_bounds(format!(
        "Sample {sample} is not covered by the chunk table"
    )))
}

/// `[start, end]` の閉区間に含まれるサンプルを持つチャンクを順に返す
///
/// 最初のチャンクの `first_sample` は `start` に切り詰められない。
/// `end < start` の場合は空のリストが返される。
pub fn chunks_for_range(runs: &[StscEntry], start: u32, end: u32) -> Result<Vec<ChunkInfo>> {
    check_sample_number(start)?;
    let mut chunks = Vec::new();
    if end < start {
        return Ok(chunks);
    }

    let mut info = chunk_for_sample(runs, start)?;
    loop {
        let next = u64::from(info.first_sample) + u64::from(info.sample_count);
        chunks.push(info);
        if next > u64::from(end) {
            break;
        }
        info = chunk_for_sample(runs, next as u32)?;
    }
    Ok(chunks)
}

/// `sample` 番目のサンプルのデコード時刻と尺を返す
pub fn decode_time(runs: &[SttsEntry], sample: u32) -> Result<(u64, u32)> {
    check_sample_number(sample)?;

    let mut remaining = sample - 1;
    let mut time = 0u64;
    for run in runs {
        if remaining < run.sample_count {
            let time = time + u64::from(remaining) * u64::from(run.sample_delta);
            return Ok((time, run.sample_delta));
        }
        time = time
            .checked_add(u64::from(run.sample_count) * u64::from(run.sample_delta))
            .ok_or_else(|| Error::invalid_data("Decode time overflows in stts"))?;
        remaining -= run.sample_count;
    }

    Err(Error::out_of_bounds(format!(
        "Sample {sample} is beyond the time-to-sample table"
    )))
}

/// 開始時刻が `time` 以上となる最小のサンプル番号を返す
///
/// `time` がサンプルの開始時刻と一致する場合はそのサンプルが、
/// 二つのサンプルの開始時刻の間にある場合は後ろのサンプルが選ばれる。
/// 該当するサンプルが存在しない場合は [`ErrorKind::OutOfBounds`](crate::ErrorKind::OutOfBounds) エラーとなる。
pub fn sample_at_time(runs: &[SttsEntry], time: u64) -> Result<u32> {
    let mut run_start = 0u64;
    let mut run_first_sample = 1u64;
    for run in runs.iter().filter(|r| r.sample_count > 0) {
        let delta = u64::from(run.sample_delta);
        let count = u64::from(run.sample_count);
        if time <= run_start {
            return to_sample_number(run_first_sample);
        }
        if delta > 0 && time <= run_start.saturating_add((count - 1) * delta) {
            return to_sample_number(run_first_sample + (time - run_start).div_ceil(delta));
        }
        run_start = run_start.saturating_add(count * delta);
        run_first_sample += count;
    }

    Err(Error::out_of_bounds(format!(
        "No sample starts at or after time {time}"
    )))
}

fn to_sample_number(n: u64) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::out_of_bounds(format!("Sample number {n} overflows")))
}

/// 全サンプル数を返す
pub fn sample_count(runs: &[SttsEntry]) -> u64 {
    runs.iter().map(|r| u64::from(r.sample_count)).sum()
}

/// 全サンプルの尺の合計を返す
///
/// `u64` の範囲を超える場合は `u64::MAX` に丸められる
pub fn total_duration(runs: &[SttsEntry]) -> u64 {
    runs.iter()
        .map(|r| u64::from(r.sample_count) * u64::from(r.sample_delta))
        .fold(0, u64::saturating_add)
}

/// `sample` 番目のサンプルのコンポジション時刻オフセットを返す
///
/// テーブルが存在しない場合は常に 0 となる
pub fn composition_offset(runs: Option<&[CttsEntry]>, sample: u32) -> Result<i32> {
    check_sample_number(sample)?;
    let Some(runs) = runs else {
        return Ok(0);
    };

    let mut remaining = sample - 1;
    for run in runs {
        if remaining < run.sample_count {
            return Ok(run.sample_offset);
        }
        remaining -= run.sample_count;
    }
    Err(Error::out_of_bounds(format!(
        "Sample {sample} is beyond the composition offset table"
    )))
}

/// `sample` 番目のサンプルのサイズを返す
pub fn sample_size(sizes: &StszBox, sample: u32) -> Result<u32> {
    check_sample_number(sample)?;
    match sizes {
        StszBox::Fixed {
            sample_size,
            sample_count,
        } if sample <= *sample_count => Ok(sample_size.get()),
        StszBox::Variable { entry_sizes } if sample as usize <= entry_sizes.len() => {
            Ok(entry_sizes[sample as usize - 1])
        }
        _ => Err(Error::out_of_bounds(format!(
            "Sample {sample} is beyond the sample size table ({} samples)",
            sizes.sample_count()
        ))),
    }
}

/// `[start, end]` の閉区間のサンプルのサイズの合計を返す
///
/// `end < start` の場合は 0 となる
pub fn total_size(sizes: &StszBox, start: u32, end: u32) -> Result<u64> {
    check_sample_number(start)?;
    if end < start {
        return Ok(0);
    }
    if end > sizes.sample_count() {
        return Err(Error::out_of_bounds(format!(
            "Sample {end} is beyond the sample size table ({} samples)",
            sizes.sample_count()
        )));
    }

    Ok(match sizes {
        StszBox::Fixed { sample_size, .. } => {
            u64::from(sample_size.get()) * u64::from(end - start + 1)
        }
        StszBox::Variable { entry_sizes } => entry_sizes[start as usize - 1..end as usize]
            .iter()
            .map(|&s| u64::from(s))
            .sum(),
    })
}

/// `sample` 番目のサンプルが同期サンプルかどうかを判定する
///
/// 同期サンプルのリストが存在しない場合は、全てのサンプルが同期サンプルとして扱われる
pub fn is_sync_sample(sync_samples: Option<&[NonZeroU32]>, sample: u32) -> Result<bool> {
    check_sample_number(sample)?;
    let Some(list) = sync_samples else {
        return Ok(true);
    };
    Ok(list
        .binary_search_by_key(&sample, |n| n.get())
        .is_ok())
}

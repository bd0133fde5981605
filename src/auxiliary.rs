//! MP4 の仕様とは直接は関係がない、実装上便利な補助的なコンポーネントを集めたモジュール
use std::num::NonZeroU32;

use crate::{
    Either, Error, Result, SampleFlags,
    boxes::StblBox,
    fragment::Sample,
    sample_table,
};

/// [`StblBox`] をラップして、フラグメント化されていないトラックのサンプル情報を取り出せるようにするための構造体
///
/// サンプル番号は 1 始まりで、存在しない番号を指定した場合は
/// [`ErrorKind::OutOfBounds`](crate::ErrorKind::OutOfBounds) エラーとなる。
#[derive(Debug)]
pub struct SampleTableAccessor<'a> {
    track_id: u32,
    stbl_box: &'a StblBox,
    sample_count: u32,
}

impl<'a> SampleTableAccessor<'a> {
    /// 引数で渡された [`StblBox`] 用の [`SampleTableAccessor`] インスタンスを生成する
    ///
    /// stts と stsz のサンプル数が一致しない場合はエラーとなる
    pub fn new(track_id: u32, stbl_box: &'a StblBox) -> Result<Self> {
        let stts_count = sample_table::sample_count(&stbl_box.stts_box.entries);
        let stsz_count = u64::from(stbl_box.stsz_box.sample_count());
        if stts_count != stsz_count {
            return Err(Error::invalid_data(format!(
                "Sample count mismatch: stts={stts_count}, stsz={stsz_count}"
            )));
        }

        Ok(Self {
            track_id,
            stbl_box,
            sample_count: stbl_box.stsz_box.sample_count(),
        })
    }

    /// トラック内のサンプルの数を取得する
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// トラック内のチャンクの数を取得する
    pub fn chunk_count(&self) -> u32 {
        match &self.stbl_box.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.len() as u32,
            Either::B(b) => b.chunk_offsets.len() as u32,
        }
    }

    fn check(&self, sample: u32) -> Result<()> {
        if sample == 0 || sample > self.sample_count {
            return Err(Error::out_of_bounds(format!(
                "Sample {sample} does not exist (track {} has {} samples)",
                self.track_id, self.sample_count
            )));
        }
        Ok(())
    }

    /// 指定されたサンプルの尺を取得する
    pub fn sample_duration(&self, sample: u32) -> Result<u32> {
        self.check(sample)?;
        sample_table::decode_time(&self.stbl_box.stts_box.entries, sample).map(|(_, d)| d)
    }

    /// 指定されたサンプルのデータサイズ（バイト数）を取得する
    pub fn sample_size(&self, sample: u32) -> Result<u32> {
        sample_table::sample_size(&self.stbl_box.stsz_box, sample)
    }

    /// 指定されたサンプルが同期サンプルかどうかを判定する
    pub fn is_sync_sample(&self, sample: u32) -> Result<bool> {
        self.check(sample)?;
        let list = self
            .stbl_box
            .stss_box
            .as_ref()
            .map(|b| b.sample_numbers.as_slice());
        sample_table::is_sync_sample(list, sample)
    }

    /// 指定されたサンプルのコンポジション時刻オフセットを取得する
    pub fn composition_offset(&self, sample: u32) -> Result<i32> {
        self.check(sample)?;
        let runs = self.stbl_box.ctts_box.as_ref().map(|b| b.entries.as_slice());
        sample_table::composition_offset(runs, sample)
    }

    /// 指定されたチャンクのファイル内でのバイト位置を返す
    pub fn chunk_offset(&self, chunk: NonZeroU32) -> Result<u64> {
        let i = chunk.get() as usize - 1;
        let offset = match &self.stbl_box.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.get(i).map(|&v| u64::from(v)),
            Either::B(b) => b.chunk_offsets.get(i).copied(),
        };
        offset.ok_or_else(|| {
            Error::out_of_bounds(format!(
                "Chunk {chunk} does not exist ({} chunks)",
                self.chunk_count()
            ))
        })
    }

    /// 指定されたサンプルの位置と時刻を解決する
    pub fn sample(&self, sample: u32) -> Result<Sample> {
        self.check(sample)?;
        let chunk = sample_table::chunk_for_sample(&self.stbl_box.stsc_box.entries, sample)?;
        let chunk_offset = self.chunk_offset(chunk.chunk)?;
        let preceding = sample_table::total_size(
            &self.stbl_box.stsz_box,
            chunk.first_sample,
            sample - 1,
        )?;
        let offset = chunk_offset.checked_add(preceding).ok_or_else(|| {
            Error::invalid_data(format!("Offset of sample {sample} overflows"))
        })?;
        let (decode_time, duration) =
            sample_table::decode_time(&self.stbl_box.stts_box.entries, sample)?;
        self.build(
            sample,
            decode_time,
            duration,
            offset,
            chunk.sample_description_index,
        )
    }

    /// 指定した時刻以降で最初に始まるサンプルの番号を返す
    pub fn sample_at_time(&self, time: u64) -> Result<u32> {
        sample_table::sample_at_time(&self.stbl_box.stts_box.entries, time)
    }

    fn build(
        &self,
        sample: u32,
        decode_time: u64,
        duration: u32,
        offset: u64,
        sample_description_index: NonZeroU32,
    ) -> Result<Sample> {
        let is_sync = self.is_sync_sample(sample)?;
        Ok(Sample {
            track_id: self.track_id,
            sample_number: sample,
            decode_time,
            composition_time_offset: self.composition_offset(sample)?,
            duration,
            offset,
            size: self.sample_size(sample)?,
            flags: if is_sync {
                SampleFlags::sync_sample()
            } else {
                SampleFlags::non_sync_sample()
            },
            is_sync,
            sample_description_index: sample_description_index.get(),
            data: None,
        })
    }

    /// 全てのサンプルを先頭から順に返すイテレーターを返す
    ///
    /// チャンクとデコード時刻を順に辿るため、[`SampleTableAccessor::sample()`] を繰り返し呼ぶよりも効率がよい
    pub fn samples(&self) -> Samples<'_, 'a> {
        Samples {
            accessor: self,
            next: 1,
            chunk: None,
            offset: 0,
            previous_size: 0,
            decode_time: 0,
        }
    }
}

/// [`SampleTableAccessor::samples()`] が返すイテレーター
#[derive(Debug)]
pub struct Samples<'b, 'a> {
    accessor: &'b SampleTableAccessor<'a>,
    next: u32,
    chunk: Option<sample_table::ChunkInfo>,
    offset: u64,
    previous_size: u32,
    decode_time: u64,
}

impl Samples<'_, '_> {
    fn next_sample(&mut self) -> Result<Sample> {
        let sample = self.next;
        let stbl = self.accessor.stbl_box;

        let chunk = match self.chunk {
            Some(c) if sample <= c.last_sample() => {
                self.offset = self
                    .offset
                    .checked_add(u64::from(self.previous_size))
                    .ok_or_else(|| {
                        Error::invalid_data(format!("Offset of sample {sample} overflows"))
                    })?;
                c
            }
            _ => {
                let c = sample_table::chunk_for_sample(&stbl.stsc_box.entries, sample)?;
                self.offset = self.accessor.chunk_offset(c.chunk)?;
                self.chunk = Some(c);
                c
            }
        };
        let duration = self.accessor.sample_duration(sample)?;
        let resolved = self.accessor.build(
            sample,
            self.decode_time,
            duration,
            self.offset,
            chunk.sample_description_index,
        )?;

        self.previous_size = resolved.size;
        self.decode_time = self
            .decode_time
            .checked_add(u64::from(duration))
            .ok_or_else(|| Error::invalid_data("Decode time overflows"))?;
        self.next += 1;
        Ok(resolved)
    }
}

impl Iterator for Samples<'_, '_> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.accessor.sample_count {
            return None;
        }
        let result = self.next_sample();
        if result.is_err() {
            // 以降のサンプルも解決できないので打ち切る
            self.next = self.accessor.sample_count + 1;
        }
        Some(result)
    }
}

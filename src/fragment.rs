//! moof ボックスの情報から、フラグメント内の各サンプルのバイト位置とデコード時刻を求めるモジュール
//!
//! サンプルのデータ位置は以下の優先順位で決まる基準位置に、trun の data_offset を加えたものとなる:
//! 1. tfhd の base_data_offset
//! 2. tfhd に default-base-is-moof フラグがある場合は moof の先頭
//! 3. 最初の traf では moof の先頭、以降の traf では直前の traf のデータの終端
//!
//! data_offset を持たない trun は、最初の trun なら基準位置から、そうでなければ直前の trun の終端から始まる。
use std::collections::BTreeMap;

use crate::{
    Error, Result, SampleFlags,
    boxes::{MoofBox, MvexBox, RootBox, TfhdBox, TrafBox, TrexBox, TrunSample},
};

/// mdat ボックスのペイロード部分のストリーム内での範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PayloadRegion {
    /// ペイロードの開始位置
    pub start: u64,

    /// ペイロードのバイト数
    pub size: u64,
}

impl PayloadRegion {
    /// ペイロードの終端位置（この位置は含まない）
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    /// `[offset, offset + size)` がペイロード内に収まっているかどうか
    pub fn contains(&self, offset: u64, size: u64) -> bool {
        offset >= self.start && offset.saturating_add(size) <= self.end()
    }
}

/// trun のサンプルで省略された値を補うためのデフォルト値
///
/// tfhd に値があればそれを、なければ trex の値を使う
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrackDefaults {
    pub sample_description_index: u32,
    pub sample_duration: u32,
    pub sample_size: u32,
    pub sample_flags: SampleFlags,
}

impl TrackDefaults {
    /// trex と tfhd の値を合成する
    pub fn resolve(trex: Option<&TrexBox>, tfhd: &TfhdBox) -> Self {
        let base = trex.map_or_else(Self::default, |trex| Self {
            sample_description_index: trex.default_sample_description_index,
            sample_duration: trex.default_sample_duration,
            sample_size: trex.default_sample_size,
            sample_flags: trex.default_sample_flags,
        });
        Self {
            sample_description_index: tfhd
                .sample_description_index
                .unwrap_or(base.sample_description_index),
            sample_duration: tfhd
                .default_sample_duration
                .unwrap_or(base.sample_duration),
            sample_size: tfhd.default_sample_size.unwrap_or(base.sample_size),
            sample_flags: tfhd.default_sample_flags.unwrap_or(base.sample_flags),
        }
    }
}

/// 位置と時刻が確定したサンプル
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// トラック ID
    pub track_id: u32,

    /// サンプル番号（1 始まり）
    ///
    /// フラグメント内のサンプルの場合は、トラックフラグメント内での番号となる
    pub sample_number: u32,

    /// デコード時刻（トラックのタイムスケール単位）
    pub decode_time: u64,

    /// デコード時刻から表示時刻へのオフセット
    pub composition_time_offset: i32,

    /// 尺（トラックのタイムスケール単位）
    pub duration: u32,

    /// ストリーム先頭からのデータの開始位置
    pub offset: u64,

    /// データのバイト数
    pub size: u32,

    /// サンプルフラグ
    pub flags: SampleFlags,

    /// 同期サンプル（キーフレーム）かどうか
    pub is_sync: bool,

    /// 参照するサンプルエントリーのインデックス（1 始まり）
    pub sample_description_index: u32,

    /// サンプルのデータ
    ///
    /// [`SampleAccessor`](crate::stream::SampleAccessor) 経由で取得した場合のみ値が入る
    #[cfg_attr(feature = "serde", serde(skip))]
    pub data: Option<Vec<u8>>,
}

impl Sample {
    /// 表示時刻を返す
    ///
    /// `i64` に収まらない場合は飽和する
    pub fn presentation_time(&self) -> i64 {
        i64::try_from(self.decode_time)
            .unwrap_or(i64::MAX)
            .saturating_add(i64::from(self.composition_time_offset))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RunLayout {
    data_start: u64,
    first_sample: u32,
    first_decode_time: u64,
}

/// フラグメント内の一つのトラック分の情報（traf ボックスに対応）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackFragment {
    /// トラック ID
    pub track_id: u32,

    /// サンプルの値を補うデフォルト値
    pub defaults: TrackDefaults,

    /// 最初のサンプルのデコード時刻
    pub base_decode_time: u64,

    /// tfdt ボックスによってデコード時刻が明示されていたかどうか
    ///
    /// 偽の場合は、同じトラックの直前のフラグメントの終端時刻から継続している
    pub has_explicit_decode_time: bool,

    /// 元になった traf ボックス
    pub traf: TrafBox,

    runs: Vec<RunLayout>,
    sample_count: u32,
    data_end: u64,
    end_decode_time: u64,
}

impl TrackFragment {
    fn new(
        traf: TrafBox,
        trex: Option<&TrexBox>,
        base_data_offset: u64,
        base_decode_time: u64,
    ) -> Result<Self> {
        let defaults = TrackDefaults::resolve(trex, &traf.tfhd_box);

        let mut runs = Vec::with_capacity(traf.trun_boxes.len());
        let mut next_data_start = base_data_offset;
        let mut next_sample = 1u32;
        let mut decode_time = base_decode_time;
        for (i, trun) in traf.trun_boxes.iter().enumerate() {
            let data_start = match trun.data_offset {
                Some(offset) => base_data_offset.checked_add_signed(i64::from(offset)),
                None if i == 0 => Some(base_data_offset),
                None => Some(next_data_start),
            }
            .ok_or_else(|| {
                Error::invalid_data(format!(
                    "trun data_offset points before the stream start (track {})",
                    traf.tfhd_box.track_id
                ))
            })?;
            runs.push(RunLayout {
                data_start,
                first_sample: next_sample,
                first_decode_time: decode_time,
            });

            // 後続のサンプル走査はここで検証した範囲に収まる
            let mut data_end = data_start;
            for sample in &trun.samples {
                data_end = data_end
                    .checked_add(u64::from(sample.size.unwrap_or(defaults.sample_size)))
                    .ok_or_else(|| {
                        Error::invalid_data(format!(
                            "Sample data end overflows (track {})",
                            traf.tfhd_box.track_id
                        ))
                    })?;
                decode_time = decode_time
                    .checked_add(u64::from(
                        sample.duration.unwrap_or(defaults.sample_duration),
                    ))
                    .ok_or_else(|| {
                        Error::invalid_data(format!(
                            "Sample decode time overflows (track {})",
                            traf.tfhd_box.track_id
                        ))
                    })?;
            }
            next_data_start = data_end;
            next_sample = u32::try_from(trun.samples.len())
                .ok()
                .and_then(|n| next_sample.checked_add(n))
                .ok_or_else(|| Error::invalid_data("Too many samples in a track fragment"))?;
        }

        Ok(Self {
            track_id: traf.tfhd_box.track_id,
            defaults,
            base_decode_time,
            has_explicit_decode_time: traf.tfdt_box.is_some(),
            runs,
            sample_count: next_sample - 1,
            data_end: next_data_start,
            end_decode_time: decode_time,
            traf,
        })
    }

    /// サンプル数を返す
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// 次のフラグメントへ引き継がれるデコード時刻（最後のサンプルの終端時刻）を返す
    pub fn end_decode_time(&self) -> u64 {
        self.end_decode_time
    }

    fn resolve_sample(
        &self,
        run: &RunLayout,
        index_in_run: usize,
        raw: &TrunSample,
        first_sample_flags: Option<SampleFlags>,
        offset: u64,
        decode_time: u64,
    ) -> Sample {
        let flags = match first_sample_flags {
            Some(flags) if index_in_run == 0 => flags,
            _ => raw.flags.unwrap_or(self.defaults.sample_flags),
        };
        Sample {
            track_id: self.track_id,
            sample_number: run.first_sample + index_in_run as u32,
            decode_time,
            composition_time_offset: raw.composition_time_offset.unwrap_or(0),
            duration: raw.duration.unwrap_or(self.defaults.sample_duration),
            offset,
            size: raw.size.unwrap_or(self.defaults.sample_size),
            flags,
            is_sync: !flags.sample_is_non_sync_sample(),
            sample_description_index: self.defaults.sample_description_index,
            data: None,
        }
    }

    /// `sample_number` 番目（1 始まり）のサンプルを返す
    pub fn sample(&self, sample_number: u32) -> Result<Sample> {
        if sample_number == 0 || sample_number > self.sample_count {
            return Err(Error::out_of_bounds(format!(
                "Sample {sample_number} does not exist in track {} ({} samples)",
                self.track_id, self.sample_count
            )));
        }

        let run_index = self
            .runs
            .partition_point(|r| r.first_sample <= sample_number)
            - 1;
        let run = &self.runs[run_index];
        let trun = &self.traf.trun_boxes[run_index];
        let target = (sample_number - run.first_sample) as usize;

        let mut offset = run.data_start;
        let mut decode_time = run.first_decode_time;
        for raw in &trun.samples[..target] {
            offset += u64::from(raw.size.unwrap_or(self.defaults.sample_size));
            decode_time += u64::from(raw.duration.unwrap_or(self.defaults.sample_duration));
        }
        Ok(self.resolve_sample(
            run,
            target,
            &trun.samples[target],
            trun.first_sample_flags,
            offset,
            decode_time,
        ))
    }

    /// サンプルを先頭から順に返すイテレーターを返す
    ///
    /// 各サンプルの位置と時刻はイテレーターが進むたびに計算される
    pub fn samples(&self) -> Samples<'_> {
        Samples {
            track: self,
            run_index: 0,
            index_in_run: 0,
            offset: self.runs.first().map_or(0, |r| r.data_start),
            decode_time: self.base_decode_time,
        }
    }
}

/// [`TrackFragment::samples()`] が返すイテレーター
#[derive(Debug)]
pub struct Samples<'a> {
    track: &'a TrackFragment,
    run_index: usize,
    index_in_run: usize,
    offset: u64,
    decode_time: u64,
}

impl Iterator for Samples<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let run = self.track.runs.get(self.run_index)?;
            let trun = &self.track.traf.trun_boxes[self.run_index];
            if self.index_in_run == 0 {
                self.offset = run.data_start;
                self.decode_time = run.first_decode_time;
            }

            let Some(raw) = trun.samples.get(self.index_in_run) else {
                self.run_index += 1;
                self.index_in_run = 0;
                continue;
            };

            let sample = self.track.resolve_sample(
                run,
                self.index_in_run,
                raw,
                trun.first_sample_flags,
                self.offset,
                self.decode_time,
            );
            self.offset += u64::from(sample.size);
            self.decode_time += u64::from(sample.duration);
            self.index_in_run += 1;
            return Some(sample);
        }
    }
}

/// moof と mdat の組に対応するフラグメント
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fragment {
    /// mfhd ボックスのシーケンス番号
    pub sequence_number: u32,

    /// moof ボックスの開始位置
    pub moof_offset: u64,

    /// moof ボックスのサイズ
    pub moof_size: u64,

    /// mdat ボックスのペイロードの範囲
    pub payload: PayloadRegion,

    /// トラックごとの情報（traf ボックスの出現順）
    pub tracks: Vec<TrackFragment>,

    /// このフラグメントの前に現れた styp / sidx / emsg / prft ボックス
    pub boundary_boxes: Vec<RootBox>,
}

impl Fragment {
    /// moof ボックスからフラグメントを組み立てる
    ///
    /// `decode_times` はトラック ID ごとの直前のフラグメントの終端時刻で、
    /// tfdt を持たない traf のデコード時刻の起点として使われた後、このフラグメントの終端時刻で更新される。
    pub fn new(
        moof: MoofBox,
        moof_offset: u64,
        moof_size: u64,
        payload: PayloadRegion,
        mvex: Option<&MvexBox>,
        decode_times: &mut BTreeMap<u32, u64>,
    ) -> Result<Self> {
        let sequence_number = moof.mfhd_box.sequence_number;
        let mut tracks = Vec::with_capacity(moof.traf_boxes.len());
        let mut previous_data_end = None;

        for traf in moof.traf_boxes {
            let track_id = traf.tfhd_box.track_id;
            let trex = mvex.and_then(|m| m.trex_boxes.iter().find(|t| t.track_id == track_id));
            if trex.is_none() {
                tracing::warn!(track_id, "no trex box for track; using zero defaults");
            }

            let tfhd = &traf.tfhd_box;
            let base_data_offset = if let Some(offset) = tfhd.base_data_offset {
                offset
            } else if tfhd.default_base_is_moof {
                moof_offset
            } else {
                previous_data_end.unwrap_or(moof_offset)
            };
            let base_decode_time = match &traf.tfdt_box {
                Some(tfdt) => tfdt.base_media_decode_time,
                None => decode_times.get(&track_id).copied().unwrap_or(0),
            };

            let track = TrackFragment::new(traf, trex, base_data_offset, base_decode_time)?;
            previous_data_end = Some(track.data_end);
            decode_times.insert(track_id, track.end_decode_time);
            tracks.push(track);
        }

        Ok(Self {
            sequence_number,
            moof_offset,
            moof_size,
            payload,
            tracks,
            boundary_boxes: Vec::new(),
        })
    }

    /// 指定のトラックの情報を返す
    pub fn track(&self, track_id: u32) -> Option<&TrackFragment> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    /// 全トラックのサンプル数の合計を返す
    pub fn sample_count(&self) -> usize {
        self.tracks.iter().map(|t| t.sample_count as usize).sum()
    }
}

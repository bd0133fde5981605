//! Fragmented MP4 (fMP4) 関連のボックス定義
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use crate::{
    BaseBox, BoxType, Decode, Encode, Error, FullBox, FullBoxFlags, FullBoxHeader, Result,
    SampleFlags, Utf8String,
    basic_types::as_box_object,
    boxes::{
        UnknownBox, check_mandatory_box, decode_box, decode_children, decode_if, encode_box,
        impl_leaf_box, with_box_type,
    },
};

/// [ISO/IEC 14496-12] MovieFragmentBox class
///
/// ムービーフラグメントのコンテナボックス。
/// fMP4 のメディアセグメントはこのボックスと mdat ボックスのペアで構成される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MoofBox {
    pub mfhd_box: MfhdBox,
    pub traf_boxes: Vec<TrafBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MoofBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"moof");
}

impl Encode for MoofBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = self.mfhd_box.encode(buf)?;
            for b in &self.traf_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            for b in &self.unknown_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for MoofBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut mfhd_box = None;
            let mut traf_boxes = Vec::new();
            let mut unknown_boxes = Vec::new();

            decode_children(payload, |ty, payload, offset| {
                match ty {
                    MfhdBox::TYPE if mfhd_box.is_none() => {
                        mfhd_box = Some(MfhdBox::decode_at(payload, offset)?);
                    }
                    TrafBox::TYPE => traf_boxes.push(TrafBox::decode_at(payload, offset)?),
                    _ => unknown_boxes.push(UnknownBox::decode_at(payload, offset)?),
                }
                Ok(())
            })?;

            Ok(Self {
                mfhd_box: check_mandatory_box(mfhd_box, "mfhd", "moof")?,
                traf_boxes,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for MoofBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::once(&self.mfhd_box)
                .map(as_box_object)
                .chain(self.traf_boxes.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] MovieFragmentHeaderBox class (親: [`MoofBox`])
///
/// シーケンス番号は 1 から始まり、フラグメントごとに増加する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MfhdBox {
    pub sequence_number: u32,
}

impl MfhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mfhd");
}

impl Encode for MfhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += self.sequence_number.encode(&mut buf[offset..])?;
            Ok(offset)
        })
    }
}

impl Decode for MfhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let _ = FullBoxHeader::decode_at(payload, &mut offset)?;
            Ok(Self {
                sequence_number: u32::decode_at(payload, &mut offset)?,
            })
        })
    }
}

impl FullBox for MfhdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] TrackFragmentBox class (親: [`MoofBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrafBox {
    pub tfhd_box: TfhdBox,
    pub tfdt_box: Option<TfdtBox>,
    pub trun_boxes: Vec<TrunBox>,

    /// 暗号化されたトラックの場合のサンプルごとの IV とサブサンプル情報
    pub senc_box: Option<SencBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl TrafBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"traf");

    /// このトラックフラグメントに含まれるサンプルの総数
    pub fn sample_count(&self) -> usize {
        self.trun_boxes.iter().map(|t| t.samples.len()).sum()
    }
}

impl Encode for TrafBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = self.tfhd_box.encode(buf)?;
            if let Some(b) = &self.tfdt_box {
                offset += b.encode(&mut buf[offset..])?;
            }
            for b in &self.trun_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            if let Some(b) = &self.senc_box {
                offset += b.encode(&mut buf[offset..])?;
            }
            for b in &self.unknown_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for TrafBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut tfhd_box = None;
            let mut tfdt_box = None;
            let mut trun_boxes = Vec::new();
            let mut senc_box = None;
            let mut unknown_boxes = Vec::new();

            decode_children(payload, |ty, payload, offset| {
                match ty {
                    TfhdBox::TYPE if tfhd_box.is_none() => {
                        tfhd_box = Some(TfhdBox::decode_at(payload, offset)?);
                    }
                    TfdtBox::TYPE if tfdt_box.is_none() => {
                        tfdt_box = Some(TfdtBox::decode_at(payload, offset)?);
                    }
                    TrunBox::TYPE => trun_boxes.push(TrunBox::decode_at(payload, offset)?),
                    SencBox::TYPE if senc_box.is_none() => {
                        senc_box = Some(SencBox::decode_at(payload, offset)?);
                    }
                    _ => unknown_boxes.push(UnknownBox::decode_at(payload, offset)?),
                }
                Ok(())
            })?;

            Ok(Self {
                tfhd_box: check_mandatory_box(tfhd_box, "tfhd", "traf")?,
                tfdt_box,
                trun_boxes,
                senc_box,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for TrafBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::once(&self.tfhd_box)
                .map(as_box_object)
                .chain(self.tfdt_box.iter().map(as_box_object))
                .chain(self.trun_boxes.iter().map(as_box_object))
                .chain(self.senc_box.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] TrackFragmentHeaderBox class (親: [`TrafBox`])
///
/// フラグによって存在するフィールドが異なる。
/// 省略されたフィールドの値は [`TrexBox`](crate::boxes::TrexBox) のデフォルト値が使われる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TfhdBox {
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<SampleFlags>,
    pub duration_is_empty: bool,
    pub default_base_is_moof: bool,
}

impl TfhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tfhd");

    /// base_data_offset が存在することを示すフラグ
    pub const FLAG_BASE_DATA_OFFSET_PRESENT: u32 = 0x000001;

    /// sample_description_index が存在することを示すフラグ
    pub const FLAG_SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x000002;

    /// default_sample_duration が存在することを示すフラグ
    pub const FLAG_DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x000008;

    /// default_sample_size が存在することを示すフラグ
    pub const FLAG_DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x000010;

    /// default_sample_flags が存在することを示すフラグ
    pub const FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x000020;

    /// 継続時間が空であることを示すフラグ
    pub const FLAG_DURATION_IS_EMPTY: u32 = 0x010000;

    /// base_data_offset が省略された場合の基準位置が moof の先頭であることを示すフラグ
    pub const FLAG_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;
}

impl Encode for TfhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += self.track_id.encode(&mut buf[offset..])?;
            if let Some(v) = self.base_data_offset {
                offset += v.encode(&mut buf[offset..])?;
            }
            for v in [
                self.sample_description_index,
                self.default_sample_duration,
                self.default_sample_size,
            ]
            .into_iter()
            .flatten()
            {
                offset += v.encode(&mut buf[offset..])?;
            }
            if let Some(v) = self.default_sample_flags {
                offset += v.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for TfhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let flags = FullBoxHeader::decode_at(payload, &mut offset)?.flags.get();
            let has = |flag: u32| flags & flag != 0;

            Ok(Self {
                track_id: u32::decode_at(payload, &mut offset)?,
                base_data_offset: decode_if(
                    has(Self::FLAG_BASE_DATA_OFFSET_PRESENT),
                    payload,
                    &mut offset,
                )?,
                sample_description_index: decode_if(
                    has(Self::FLAG_SAMPLE_DESCRIPTION_INDEX_PRESENT),
                    payload,
                    &mut offset,
                )?,
                default_sample_duration: decode_if(
                    has(Self::FLAG_DEFAULT_SAMPLE_DURATION_PRESENT),
                    payload,
                    &mut offset,
                )?,
                default_sample_size: decode_if(
                    has(Self::FLAG_DEFAULT_SAMPLE_SIZE_PRESENT),
                    payload,
                    &mut offset,
                )?,
                default_sample_flags: decode_if(
                    has(Self::FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT),
                    payload,
                    &mut offset,
                )?,
                duration_is_empty: has(Self::FLAG_DURATION_IS_EMPTY),
                default_base_is_moof: has(Self::FLAG_DEFAULT_BASE_IS_MOOF),
            })
        })
    }
}

impl FullBox for TfhdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        let flags = [
            (
                Self::FLAG_BASE_DATA_OFFSET_PRESENT,
                self.base_data_offset.is_some(),
            ),
            (
                Self::FLAG_SAMPLE_DESCRIPTION_INDEX_PRESENT,
                self.sample_description_index.is_some(),
            ),
            (
                Self::FLAG_DEFAULT_SAMPLE_DURATION_PRESENT,
                self.default_sample_duration.is_some(),
            ),
            (
                Self::FLAG_DEFAULT_SAMPLE_SIZE_PRESENT,
                self.default_sample_size.is_some(),
            ),
            (
                Self::FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT,
                self.default_sample_flags.is_some(),
            ),
            (Self::FLAG_DURATION_IS_EMPTY, self.duration_is_empty),
            (Self::FLAG_DEFAULT_BASE_IS_MOOF, self.default_base_is_moof),
        ];
        FullBoxFlags::new(
            flags
                .into_iter()
                .filter(|(_, set)| *set)
                .fold(0, |acc, (flag, _)| acc | flag),
        )
    }
}

/// [ISO/IEC 14496-12] TrackFragmentBaseMediaDecodeTimeBox class (親: [`TrafBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TfdtBox {
    /// version=1 の場合は base_media_decode_time が 64 bit、version=0 の場合は 32 bit でエンコードされる
    pub version: u8,
    pub base_media_decode_time: u64,
}

impl TfdtBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tfdt");
}

impl Encode for TfdtBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            if self.full_box_version() == 1 {
                offset += self.base_media_decode_time.encode(&mut buf[offset..])?;
            } else {
                offset += (self.base_media_decode_time as u32).encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for TfdtBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, .. } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let base_media_decode_time = if version == 1 {
                u64::decode_at(payload, &mut offset)?
            } else {
                u64::from(u32::decode_at(payload, &mut offset)?)
            };
            Ok(Self {
                version,
                base_media_decode_time,
            })
        })
    }
}

impl FullBox for TfdtBox {
    fn full_box_version(&self) -> u8 {
        if self.base_media_decode_time > u32::MAX as u64 {
            1
        } else {
            self.version
        }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] TrackRunBox class (親: [`TrafBox`])
///
/// 連続したサンプル群（ラン）の情報を格納する。
/// サンプルごとのフィールドの有無は先頭サンプルの値から決まる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrunBox {
    /// version=1 の場合は composition_time_offset が符号付きとして扱われる
    pub version: u8,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<SampleFlags>,
    pub samples: Vec<TrunSample>,
}

impl TrunBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"trun");

    /// data_offset が存在することを示すフラグ
    pub const FLAG_DATA_OFFSET_PRESENT: u32 = 0x000001;

    /// first_sample_flags が存在することを示すフラグ
    pub const FLAG_FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0x000004;

    /// sample_duration が存在することを示すフラグ
    pub const FLAG_SAMPLE_DURATION_PRESENT: u32 = 0x000100;

    /// sample_size が存在することを示すフラグ
    pub const FLAG_SAMPLE_SIZE_PRESENT: u32 = 0x000200;

    /// sample_flags が存在することを示すフラグ
    pub const FLAG_SAMPLE_FLAGS_PRESENT: u32 = 0x000400;

    /// sample_composition_time_offset が存在することを示すフラグ
    pub const FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT: u32 = 0x000800;

    /// サンプルごとのフィールドを持たない trun で許容するサンプル数の上限
    ///
    /// この場合はサンプル数がペイロードの長さに縛られないため、メモリ使用量をここで抑える
    pub const MAX_IMPLICIT_SAMPLES: u32 = 1 << 16;

    fn sample_field_size(flags: u32) -> usize {
        [
            Self::FLAG_SAMPLE_DURATION_PRESENT,
            Self::FLAG_SAMPLE_SIZE_PRESENT,
            Self::FLAG_SAMPLE_FLAGS_PRESENT,
            Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT,
        ]
        .into_iter()
        .filter(|f| flags & f != 0)
        .count()
            * 4
    }
}

impl Encode for TrunBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let flags = self.full_box_flags().get();
        let has = |flag: u32| flags & flag != 0;
        let version = self.full_box_version();

        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += (self.samples.len() as u32).encode(&mut buf[offset..])?;
            if let Some(v) = self.data_offset {
                offset += v.encode(&mut buf[offset..])?;
            }
            if let Some(v) = self.first_sample_flags {
                offset += v.encode(&mut buf[offset..])?;
            }

            for sample in &self.samples {
                if has(Self::FLAG_SAMPLE_DURATION_PRESENT) {
                    offset += sample.duration.unwrap_or(0).encode(&mut buf[offset..])?;
                }
                if has(Self::FLAG_SAMPLE_SIZE_PRESENT) {
                    offset += sample.size.unwrap_or(0).encode(&mut buf[offset..])?;
                }
                if has(Self::FLAG_SAMPLE_FLAGS_PRESENT) {
                    offset += sample
                        .flags
                        .unwrap_or(SampleFlags::empty())
                        .encode(&mut buf[offset..])?;
                }
                if has(Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT) {
                    let v = sample.composition_time_offset.unwrap_or(0);
                    if version == 1 {
                        offset += v.encode(&mut buf[offset..])?;
                    } else {
                        offset += (v as u32).encode(&mut buf[offset..])?;
                    }
                }
            }
            Ok(offset)
        })
    }
}

impl Decode for TrunBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, flags } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let flags = flags.get();
            let has = |flag: u32| flags & flag != 0;

            let sample_count = u32::decode_at(payload, &mut offset)?;
            let data_offset = decode_if(has(Self::FLAG_DATA_OFFSET_PRESENT), payload, &mut offset)?;
            let first_sample_flags = decode_if(
                has(Self::FLAG_FIRST_SAMPLE_FLAGS_PRESENT),
                payload,
                &mut offset,
            )?;

            let field_size = Self::sample_field_size(flags);
            let remaining = payload.len().saturating_sub(offset);
            if (field_size == 0 && sample_count > Self::MAX_IMPLICIT_SAMPLES)
                || (sample_count as usize).saturating_mul(field_size) > remaining
            {
                return Err(Error::invalid_data(format!(
                    "Too many samples in trun: sample_count={sample_count}, remaining bytes={remaining}"
                )));
            }

            let mut samples = Vec::with_capacity(sample_count as usize);
            for _ in 0..sample_count {
                let duration =
                    decode_if(has(Self::FLAG_SAMPLE_DURATION_PRESENT), payload, &mut offset)?;
                let size = decode_if(has(Self::FLAG_SAMPLE_SIZE_PRESENT), payload, &mut offset)?;
                let sample_flags =
                    decode_if(has(Self::FLAG_SAMPLE_FLAGS_PRESENT), payload, &mut offset)?;
                // version 0 でも値は u32 のビット列をそのまま i32 として保持する
                let composition_time_offset = decode_if::<i32>(
                    has(Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT),
                    payload,
                    &mut offset,
                )?;
                samples.push(TrunSample {
                    duration,
                    size,
                    flags: sample_flags,
                    composition_time_offset,
                });
            }

            Ok(Self {
                version,
                data_offset,
                first_sample_flags,
                samples,
            })
        })
    }
}

impl FullBox for TrunBox {
    fn full_box_version(&self) -> u8 {
        let has_negative_offset = self
            .samples
            .iter()
            .any(|s| s.composition_time_offset.is_some_and(|v| v < 0));
        if has_negative_offset { 1 } else { self.version }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        let mut flags = 0;
        if self.data_offset.is_some() {
            flags |= Self::FLAG_DATA_OFFSET_PRESENT;
        }
        if self.first_sample_flags.is_some() {
            flags |= Self::FLAG_FIRST_SAMPLE_FLAGS_PRESENT;
        }
        if let Some(s) = self.samples.first() {
            for (flag, present) in [
                (Self::FLAG_SAMPLE_DURATION_PRESENT, s.duration.is_some()),
                (Self::FLAG_SAMPLE_SIZE_PRESENT, s.size.is_some()),
                (Self::FLAG_SAMPLE_FLAGS_PRESENT, s.flags.is_some()),
                (
                    Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT,
                    s.composition_time_offset.is_some(),
                ),
            ] {
                if present {
                    flags |= flag;
                }
            }
        }
        FullBoxFlags::new(flags)
    }
}

/// [`TrunBox`] のサンプル情報
///
/// `None` のフィールドは [`TfhdBox`] あるいは [`TrexBox`](crate::boxes::TrexBox) のデフォルト値で補われる
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrunSample {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<SampleFlags>,
    pub composition_time_offset: Option<i32>,
}

/// [ISO/IEC 23001-7] SampleEncryptionBox class (親: [`TrafBox`])
///
/// IV のサイズは `tenc` ボックスなどの外部の情報に依存するため、
/// デコード時にはエントリー部分をバイト列のまま保持し、
/// [`SencBox::entries()`] で IV サイズを指定して解釈する。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SencBox {
    pub version: u8,
    pub flags: FullBoxFlags,
    pub sample_count: u32,

    /// 解釈前のエントリー部分のバイト列
    pub data: Vec<u8>,
}

impl SencBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"senc");

    /// サブサンプル情報が存在することを示すフラグ
    pub const FLAG_USE_SUBSAMPLE_ENCRYPTION: u32 = 0x000002;

    /// サブサンプル情報を含むかどうか
    pub fn has_subsamples(&self) -> bool {
        self.flags.get() & Self::FLAG_USE_SUBSAMPLE_ENCRYPTION != 0
    }

    /// IV のサイズ（0, 8, 16 のいずれか）を指定して、エントリーを解釈する
    ///
    /// `sample_count` が `max_samples`（対応する trun のサンプル数の合計）を超える場合はエラーになる
    pub fn entries(&self, iv_size: u8, max_samples: u32) -> Result<Vec<SencEntry>> {
        if !matches!(iv_size, 0 | 8 | 16) {
            return Err(Error::invalid_input(format!(
                "Invalid IV size: {iv_size} (must be 0, 8 or 16)"
            ))
            .with_box_type(Self::TYPE));
        }
        if self.sample_count > max_samples {
            return Err(Error::invalid_data(format!(
                "senc has more entries than samples: sample_count={}, samples={max_samples}",
                self.sample_count
            ))
            .with_box_type(Self::TYPE));
        }

        let buf = &self.data[..];
        let mut offset = 0;
        let mut entries = Vec::new();
        with_box_type(Self::TYPE, || {
            for _ in 0..self.sample_count {
                let iv = buf
                    .get(offset..offset + iv_size as usize)
                    .ok_or_else(|| Error::invalid_data("senc entry is truncated"))?
                    .to_vec();
                offset += iv.len();

                let mut subsamples = Vec::new();
                if self.has_subsamples() {
                    let count = u16::decode_at(buf, &mut offset)?;
                    for _ in 0..count {
                        subsamples.push(SubsampleEntry {
                            bytes_of_clear_data: u16::decode_at(buf, &mut offset)?,
                            bytes_of_protected_data: u32::decode_at(buf, &mut offset)?,
                        });
                    }
                }
                entries.push(SencEntry { iv, subsamples });
            }
            Ok(entries)
        })
    }
}

impl Encode for SencBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += self.sample_count.encode(&mut buf[offset..])?;
            offset += self.data.encode(&mut buf[offset..])?;
            Ok(offset)
        })
    }
}

impl Decode for SencBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, flags } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let sample_count = u32::decode_at(payload, &mut offset)?;
            Ok(Self {
                version,
                flags,
                sample_count,
                data: payload[offset..].to_vec(),
            })
        })
    }
}

impl FullBox for SencBox {
    fn full_box_version(&self) -> u8 {
        self.version
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        self.flags
    }
}

/// [`SencBox`] のサンプルごとのエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SencEntry {
    pub iv: Vec<u8>,
    pub subsamples: Vec<SubsampleEntry>,
}

/// サンプル内の平文部分と暗号化部分のサイズ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SubsampleEntry {
    pub bytes_of_clear_data: u16,
    pub bytes_of_protected_data: u32,
}

/// [ISO/IEC 14496-12] SegmentIndexBox class
///
/// DASH などで使われる、メディアセグメントへの参照情報
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SidxBox {
    pub version: u8,
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub references: Vec<SidxReference>,
}

impl SidxBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"sidx");
}

impl Encode for SidxBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += self.reference_id.encode(&mut buf[offset..])?;
            offset += self.timescale.encode(&mut buf[offset..])?;
            if self.full_box_version() == 1 {
                offset += self.earliest_presentation_time.encode(&mut buf[offset..])?;
                offset += self.first_offset.encode(&mut buf[offset..])?;
            } else {
                offset += (self.earliest_presentation_time as u32).encode(&mut buf[offset..])?;
                offset += (self.first_offset as u32).encode(&mut buf[offset..])?;
            }
            offset += 0u16.encode(&mut buf[offset..])?;
            offset += (self.references.len() as u16).encode(&mut buf[offset..])?;
            for r in &self.references {
                // reference_type (1) | referenced_size (31)
                let word = (u32::from(r.reference_type) << 31) | (r.referenced_size & 0x7FFF_FFFF);
                offset += word.encode(&mut buf[offset..])?;
                offset += r.subsegment_duration.encode(&mut buf[offset..])?;
                // starts_with_sap (1) | sap_type (3) | sap_delta_time (28)
                let word = (u32::from(r.starts_with_sap) << 31)
                    | ((u32::from(r.sap_type) & 0x7) << 28)
                    | (r.sap_delta_time & 0x0FFF_FFFF);
                offset += word.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for SidxBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, .. } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let reference_id = u32::decode_at(payload, &mut offset)?;
            let timescale = u32::decode_at(payload, &mut offset)?;
            let (earliest_presentation_time, first_offset) = if version == 1 {
                (
                    u64::decode_at(payload, &mut offset)?,
                    u64::decode_at(payload, &mut offset)?,
                )
            } else {
                (
                    u64::from(u32::decode_at(payload, &mut offset)?),
                    u64::from(u32::decode_at(payload, &mut offset)?),
                )
            };
            let _reserved = u16::decode_at(payload, &mut offset)?;
            let reference_count = u16::decode_at(payload, &mut offset)?;

            let mut references = Vec::new();
            for _ in 0..reference_count {
                let first = u32::decode_at(payload, &mut offset)?;
                let subsegment_duration = u32::decode_at(payload, &mut offset)?;
                let third = u32::decode_at(payload, &mut offset)?;
                references.push(SidxReference {
                    reference_type: first >> 31 != 0,
                    referenced_size: first & 0x7FFF_FFFF,
                    subsegment_duration,
                    starts_with_sap: third >> 31 != 0,
                    sap_type: ((third >> 28) & 0x7) as u8,
                    sap_delta_time: third & 0x0FFF_FFFF,
                });
            }

            Ok(Self {
                version,
                reference_id,
                timescale,
                earliest_presentation_time,
                first_offset,
                references,
            })
        })
    }
}

impl FullBox for SidxBox {
    fn full_box_version(&self) -> u8 {
        if self.earliest_presentation_time > u32::MAX as u64 || self.first_offset > u32::MAX as u64
        {
            1
        } else {
            self.version
        }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`SidxBox`] が保持する参照情報
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SidxReference {
    /// 真の場合は別の sidx ボックスへの参照、偽の場合はメディアへの参照
    pub reference_type: bool,
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    pub sap_type: u8,
    pub sap_delta_time: u32,
}

/// [ISO/IEC 23009-1] DASHEventMessageBox class
///
/// version 0 では `presentation_time` はセグメント先頭からの差分、
/// version 1 では絶対時刻を表し、フィールドの並び順も異なる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct EmsgBox {
    pub version: u8,
    pub scheme_id_uri: Utf8String,
    pub value: Utf8String,
    pub timescale: u32,
    pub presentation_time: u64,
    pub event_duration: u32,
    pub id: u32,
    pub message_data: Vec<u8>,
}

impl EmsgBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"emsg");
}

impl Encode for EmsgBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if self.version > 1 {
            return Err(Error::unsupported(format!(
                "Unsupported emsg version: {}",
                self.version
            )));
        }
        if self.version == 0 && self.presentation_time > u32::MAX as u64 {
            return Err(Error::invalid_input(
                "presentation_time_delta of emsg version 0 must fit in 32 bits",
            ));
        }

        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            if self.version == 0 {
                offset += self.scheme_id_uri.encode(&mut buf[offset..])?;
                offset += self.value.encode(&mut buf[offset..])?;
                offset += self.timescale.encode(&mut buf[offset..])?;
                offset += (self.presentation_time as u32).encode(&mut buf[offset..])?;
                offset += self.event_duration.encode(&mut buf[offset..])?;
                offset += self.id.encode(&mut buf[offset..])?;
            } else {
                offset += self.timescale.encode(&mut buf[offset..])?;
                offset += self.presentation_time.encode(&mut buf[offset..])?;
                offset += self.event_duration.encode(&mut buf[offset..])?;
                offset += self.id.encode(&mut buf[offset..])?;
                offset += self.scheme_id_uri.encode(&mut buf[offset..])?;
                offset += self.value.encode(&mut buf[offset..])?;
            }
            offset += self.message_data.encode(&mut buf[offset..])?;
            Ok(offset)
        })
    }
}

impl Decode for EmsgBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, .. } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let mut this = match version {
                0 => {
                    let scheme_id_uri = Utf8String::decode_at(payload, &mut offset)?;
                    let value = Utf8String::decode_at(payload, &mut offset)?;
                    Self {
                        version,
                        scheme_id_uri,
                        value,
                        timescale: u32::decode_at(payload, &mut offset)?,
                        presentation_time: u64::from(u32::decode_at(payload, &mut offset)?),
                        event_duration: u32::decode_at(payload, &mut offset)?,
                        id: u32::decode_at(payload, &mut offset)?,
                        message_data: Vec::new(),
                    }
                }
                1 => {
                    let timescale = u32::decode_at(payload, &mut offset)?;
                    let presentation_time = u64::decode_at(payload, &mut offset)?;
                    let event_duration = u32::decode_at(payload, &mut offset)?;
                    let id = u32::decode_at(payload, &mut offset)?;
                    Self {
                        version,
                        scheme_id_uri: Utf8String::decode_at(payload, &mut offset)?,
                        value: Utf8String::decode_at(payload, &mut offset)?,
                        timescale,
                        presentation_time,
                        event_duration,
                        id,
                        message_data: Vec::new(),
                    }
                }
                _ => {
                    return Err(Error::unsupported(format!(
                        "Unsupported emsg version: {version}"
                    )));
                }
            };
            this.message_data = payload[offset..].to_vec();
            Ok(this)
        })
    }
}

impl FullBox for EmsgBox {
    fn full_box_version(&self) -> u8 {
        self.version
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] ProducerReferenceTimeBox class
///
/// NTP 時刻とメディア時刻の対応を表す
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct PrftBox {
    pub version: u8,
    pub flags: FullBoxFlags,
    pub reference_track_id: u32,
    pub ntp_timestamp: u64,
    pub media_time: u64,
}

impl PrftBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"prft");
}

impl Encode for PrftBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += self.reference_track_id.encode(&mut buf[offset..])?;
            offset += self.ntp_timestamp.encode(&mut buf[offset..])?;
            if self.full_box_version() == 1 {
                offset += self.media_time.encode(&mut buf[offset..])?;
            } else {
                offset += (self.media_time as u32).encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for PrftBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, flags } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let reference_track_id = u32::decode_at(payload, &mut offset)?;
            let ntp_timestamp = u64::decode_at(payload, &mut offset)?;
            let media_time = if version == 1 {
                u64::decode_at(payload, &mut offset)?
            } else {
                u64::from(u32::decode_at(payload, &mut offset)?)
            };
            Ok(Self {
                version,
                flags,
                reference_track_id,
                ntp_timestamp,
                media_time,
            })
        })
    }
}

impl FullBox for PrftBox {
    fn full_box_version(&self) -> u8 {
        if self.media_time > u32::MAX as u64 {
            1
        } else {
            self.version
        }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        self.flags
    }
}

impl_leaf_box!(
    MfhdBox, TfhdBox, TfdtBox, TrunBox, SencBox, SidxBox, EmsgBox, PrftBox
);

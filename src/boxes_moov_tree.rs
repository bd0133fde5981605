//! moov とその下に配置されるボックスをまとめたモジュール
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use std::num::NonZeroU32;

use crate::{
    BaseBox, BoxType, Decode, Either, Encode, Error, FixedPointNumber, FullBox, FullBoxFlags,
    FullBoxHeader, Mp4FileTime, Result, SampleFlags,
    basic_types::as_box_object,
    boxes::{
        UnknownBox, check_mandatory_box, decode_box, decode_children, encode_box, impl_leaf_box,
    },
};

/// version に応じて 32 bit または 64 bit の値をデコードする
fn decode_versioned(version: u8, buf: &[u8], offset: &mut usize) -> Result<u64> {
    if version == 1 {
        u64::decode_at(buf, offset)
    } else {
        u32::decode_at(buf, offset).map(u64::from)
    }
}

/// version に応じて 32 bit または 64 bit の値をエンコードする
fn encode_versioned(version: u8, value: u64, buf: &mut [u8]) -> Result<usize> {
    if version == 1 {
        value.encode(buf)
    } else {
        (value as u32).encode(buf)
    }
}

/// 32 bit に収まらない値がある場合には version 1 を、それ以外は `decoded` を返す
fn required_version(decoded: u8, values: &[u64]) -> u8 {
    if values.iter().any(|&v| v > u32::MAX as u64) {
        1
    } else {
        decoded
    }
}

/// [ISO/IEC 14496-12] MovieBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MoovBox {
    pub mvhd_box: MvhdBox,
    pub trak_boxes: Vec<TrakBox>,
    pub mvex_box: Option<MvexBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MoovBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"moov");

    /// フラグメント化された MP4 の初期化セグメントかどうか
    ///
    /// 少なくとも一つの `trak` ボックスを持ち、
    /// かつ `mvex` ボックスの中に少なくとも一つの `trex` ボックスがある場合に真となる
    pub fn is_fragmented(&self) -> bool {
        !self.trak_boxes.is_empty()
            && self
                .mvex_box
                .as_ref()
                .is_some_and(|mvex| !mvex.trex_boxes.is_empty())
    }
}

impl Encode for MoovBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = self.mvhd_box.encode(buf)?;
            for b in &self.trak_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            if let Some(b) = &self.mvex_box {
                offset += b.encode(&mut buf[offset..])?;
            }
            for b in &self.unknown_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for MoovBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut mvhd_box = None;
            let mut trak_boxes = Vec::new();
            let mut mvex_box = None;
            let mut unknown_boxes = Vec::new();

            decode_children(payload, |ty, payload, offset| {
                match ty {
                    MvhdBox::TYPE if mvhd_box.is_none() => {
                        mvhd_box = Some(MvhdBox::decode_at(payload, offset)?);
                    }
                    TrakBox::TYPE => trak_boxes.push(TrakBox::decode_at(payload, offset)?),
                    MvexBox::TYPE if mvex_box.is_none() => {
                        mvex_box = Some(MvexBox::decode_at(payload, offset)?);
                    }
                    _ => unknown_boxes.push(UnknownBox::decode_at(payload, offset)?),
                }
                Ok(())
            })?;

            Ok(Self {
                mvhd_box: check_mandatory_box(mvhd_box, "mvhd", "moov")?,
                trak_boxes,
                mvex_box,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for MoovBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::once(&self.mvhd_box)
                .map(as_box_object)
                .chain(self.trak_boxes.iter().map(as_box_object))
                .chain(self.mvex_box.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] MovieHeaderBox class (親: [`MoovBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MvhdBox {
    /// デコード時のバージョン（再エンコード時に同じレイアウトを使うために保持する）
    pub version: u8,
    pub creation_time: Mp4FileTime,
    pub modification_time: Mp4FileTime,
    pub timescale: NonZeroU32,
    pub duration: u64,
    pub rate: FixedPointNumber<i16, u16>,
    pub volume: FixedPointNumber<i8, u8>,
    pub matrix: [i32; 9],
    pub next_track_id: u32,
}

impl MvhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mvhd");

    /// [`MvhdBox::rate`] のデフォルト値（通常の再生速度）
    pub const DEFAULT_RATE: FixedPointNumber<i16, u16> = FixedPointNumber::new(1, 0);

    /// [`MvhdBox::volume`] のデフォルト値（最大音量）
    pub const DEFAULT_VOLUME: FixedPointNumber<i8, u8> = FixedPointNumber::new(1, 0);

    /// 変換なしを表す行列
    pub const DEFAULT_MATRIX: [i32; 9] = [0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000];
}

impl Encode for MvhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let version = self.full_box_version();
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += encode_versioned(version, self.creation_time.as_secs(), &mut buf[offset..])?;
            offset +=
                encode_versioned(version, self.modification_time.as_secs(), &mut buf[offset..])?;
            offset += self.timescale.encode(&mut buf[offset..])?;
            offset += encode_versioned(version, self.duration, &mut buf[offset..])?;
            offset += self.rate.encode(&mut buf[offset..])?;
            offset += self.volume.encode(&mut buf[offset..])?;
            offset += [0u8; 2 + 4 * 2].encode(&mut buf[offset..])?;
            offset += self.matrix.encode(&mut buf[offset..])?;
            offset += [0u8; 4 * 6].encode(&mut buf[offset..])?;
            offset += self.next_track_id.encode(&mut buf[offset..])?;
            Ok(offset)
        })
    }
}

impl Decode for MvhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, .. } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let creation_time = decode_versioned(version, payload, &mut offset)?;
            let modification_time = decode_versioned(version, payload, &mut offset)?;
            let timescale = NonZeroU32::decode_at(payload, &mut offset)?;
            let duration = decode_versioned(version, payload, &mut offset)?;
            let rate = FixedPointNumber::decode_at(payload, &mut offset)?;
            let volume = FixedPointNumber::decode_at(payload, &mut offset)?;
            let _ = <[u8; 2 + 4 * 2]>::decode_at(payload, &mut offset)?;
            let matrix = <[i32; 9]>::decode_at(payload, &mut offset)?;
            let _ = <[u8; 4 * 6]>::decode_at(payload, &mut offset)?;
            let next_track_id = u32::decode_at(payload, &mut offset)?;

            Ok(Self {
                version,
                creation_time: Mp4FileTime::from_secs(creation_time),
                modification_time: Mp4FileTime::from_secs(modification_time),
                timescale,
                duration,
                rate,
                volume,
                matrix,
                next_track_id,
            })
        })
    }
}

impl FullBox for MvhdBox {
    fn full_box_version(&self) -> u8 {
        required_version(
            self.version,
            &[
                self.creation_time.as_secs(),
                self.modification_time.as_secs(),
                self.duration,
            ],
        )
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] TrackBox class (親: [`MoovBox`])
///
/// `edts` などの本ライブラリが解釈しない子ボックスは `unknown_boxes` に格納される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrakBox {
    pub tkhd_box: TkhdBox,
    pub mdia_box: MdiaBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl TrakBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"trak");

    /// トラック ID を返す
    pub fn track_id(&self) -> u32 {
        self.tkhd_box.track_id
    }

    /// メディアのタイムスケールを返す
    pub fn timescale(&self) -> NonZeroU32 {
        self.mdia_box.mdhd_box.timescale
    }

    /// ハンドラー種別（`vide`, `soun` など）を返す
    pub fn handler_type(&self) -> [u8; 4] {
        self.mdia_box.hdlr_box.handler_type
    }
}

impl Encode for TrakBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = self.tkhd_box.encode(buf)?;
            offset += self.mdia_box.encode(&mut buf[offset..])?;
            for b in &self.unknown_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for TrakBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut tkhd_box = None;
            let mut mdia_box = None;
            let mut unknown_boxes = Vec::new();

            decode_children(payload, |ty, payload, offset| {
                match ty {
                    TkhdBox::TYPE if tkhd_box.is_none() => {
                        tkhd_box = Some(TkhdBox::decode_at(payload, offset)?);
                    }
                    MdiaBox::TYPE if mdia_box.is_none() => {
                        mdia_box = Some(MdiaBox::decode_at(payload, offset)?);
                    }
                    _ => unknown_boxes.push(UnknownBox::decode_at(payload, offset)?),
                }
                Ok(())
            })?;

            Ok(Self {
                tkhd_box: check_mandatory_box(tkhd_box, "tkhd", "trak")?,
                mdia_box: check_mandatory_box(mdia_box, "mdia", "trak")?,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for TrakBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            [as_box_object(&self.tkhd_box), as_box_object(&self.mdia_box)]
                .into_iter()
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] TrackHeaderBox class (親: [`TrakBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TkhdBox {
    pub version: u8,
    pub flags: FullBoxFlags,
    pub creation_time: Mp4FileTime,
    pub modification_time: Mp4FileTime,
    pub track_id: u32,
    pub duration: u64,
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: FixedPointNumber<i8, u8>,
    pub matrix: [i32; 9],
    pub width: FixedPointNumber<i16, u16>,
    pub height: FixedPointNumber<i16, u16>,
}

impl TkhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tkhd");

    /// トラックが有効であることを示すフラグ
    pub const FLAG_TRACK_ENABLED: u32 = 0x000001;

    /// トラックがプレゼンテーションで使われることを示すフラグ
    pub const FLAG_TRACK_IN_MOVIE: u32 = 0x000002;

    /// 変換なしを表す行列
    pub const DEFAULT_MATRIX: [i32; 9] = MvhdBox::DEFAULT_MATRIX;
}

impl Encode for TkhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let version = self.full_box_version();
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += encode_versioned(version, self.creation_time.as_secs(), &mut buf[offset..])?;
            offset +=
                encode_versioned(version, self.modification_time.as_secs(), &mut buf[offset..])?;
            offset += self.track_id.encode(&mut buf[offset..])?;
            offset += [0u8; 4].encode(&mut buf[offset..])?;
            offset += encode_versioned(version, self.duration, &mut buf[offset..])?;
            offset += [0u8; 4 * 2].encode(&mut buf[offset..])?;
            offset += self.layer.encode(&mut buf[offset..])?;
            offset += self.alternate_group.encode(&mut buf[offset..])?;
            offset += self.volume.encode(&mut buf[offset..])?;
            offset += [0u8; 2].encode(&mut buf[offset..])?;
            offset += self.matrix.encode(&mut buf[offset..])?;
            offset += self.width.encode(&mut buf[offset..])?;
            offset += self.height.encode(&mut buf[offset..])?;
            Ok(offset)
        })
    }
}

impl Decode for TkhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, flags } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let creation_time = decode_versioned(version, payload, &mut offset)?;
            let modification_time = decode_versioned(version, payload, &mut offset)?;
            let track_id = u32::decode_at(payload, &mut offset)?;
            let _ = <[u8; 4]>::decode_at(payload, &mut offset)?;
            let duration = decode_versioned(version, payload, &mut offset)?;
            let _ = <[u8; 4 * 2]>::decode_at(payload, &mut offset)?;
            let layer = i16::decode_at(payload, &mut offset)?;
            let alternate_group = i16::decode_at(payload, &mut offset)?;
            let volume = FixedPointNumber::decode_at(payload, &mut offset)?;
            let _ = <[u8; 2]>::decode_at(payload, &mut offset)?;
            let matrix = <[i32; 9]>::decode_at(payload, &mut offset)?;
            let width = FixedPointNumber::decode_at(payload, &mut offset)?;
            let height = FixedPointNumber::decode_at(payload, &mut offset)?;

            Ok(Self {
                version,
                flags,
                creation_time: Mp4FileTime::from_secs(creation_time),
                modification_time: Mp4FileTime::from_secs(modification_time),
                track_id,
                duration,
                layer,
                alternate_group,
                volume,
                matrix,
                width,
                height,
            })
        })
    }
}

impl FullBox for TkhdBox {
    fn full_box_version(&self) -> u8 {
        required_version(
            self.version,
            &[
                self.creation_time.as_secs(),
                self.modification_time.as_secs(),
                self.duration,
            ],
        )
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        self.flags
    }
}

/// [ISO/IEC 14496-12] MediaBox class (親: [`TrakBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MdiaBox {
    pub mdhd_box: MdhdBox,
    pub hdlr_box: HdlrBox,
    pub minf_box: MinfBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MdiaBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdia");
}

impl Encode for MdiaBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = self.mdhd_box.encode(buf)?;
            offset += self.hdlr_box.encode(&mut buf[offset..])?;
            offset += self.minf_box.encode(&mut buf[offset..])?;
            for b in &self.unknown_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for MdiaBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut mdhd_box = None;
            let mut hdlr_box = None;
            let mut minf_box = None;
            let mut unknown_boxes = Vec::new();

            decode_children(payload, |ty, payload, offset| {
                match ty {
                    MdhdBox::TYPE if mdhd_box.is_none() => {
                        mdhd_box = Some(MdhdBox::decode_at(payload, offset)?);
                    }
                    HdlrBox::TYPE if hdlr_box.is_none() => {
                        hdlr_box = Some(HdlrBox::decode_at(payload, offset)?);
                    }
                    MinfBox::TYPE if minf_box.is_none() => {
                        minf_box = Some(MinfBox::decode_at(payload, offset)?);
                    }
                    _ => unknown_boxes.push(UnknownBox::decode_at(payload, offset)?),
                }
                Ok(())
            })?;

            Ok(Self {
                mdhd_box: check_mandatory_box(mdhd_box, "mdhd", "mdia")?,
                hdlr_box: check_mandatory_box(hdlr_box, "hdlr", "mdia")?,
                minf_box: check_mandatory_box(minf_box, "minf", "mdia")?,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for MdiaBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            [
                as_box_object(&self.mdhd_box),
                as_box_object(&self.hdlr_box),
                as_box_object(&self.minf_box),
            ]
            .into_iter()
            .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] MediaHeaderBox class (親: [`MdiaBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MdhdBox {
    pub version: u8,
    pub creation_time: Mp4FileTime,
    pub modification_time: Mp4FileTime,
    pub timescale: NonZeroU32,
    pub duration: u64,

    /// ISO-639-2/T language code
    pub language: [u8; 3],
}

impl MdhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdhd");

    /// 未定義を表す言語コード
    pub const LANGUAGE_UNDEFINED: [u8; 3] = *b"und";
}

impl Encode for MdhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut language: u16 = 0;
        for l in &self.language {
            let Some(code) = l.checked_sub(0x60).filter(|c| *c < 0b100000) else {
                return Err(Error::invalid_input(format!(
                    "Invalid language code: {:?}",
                    self.language
                )));
            };
            language = (language << 5) | code as u16;
        }

        encode_box(buf, Self::TYPE, |buf| {
            let version = self.full_box_version();
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += encode_versioned(version, self.creation_time.as_secs(), &mut buf[offset..])?;
            offset +=
                encode_versioned(version, self.modification_time.as_secs(), &mut buf[offset..])?;
            offset += self.timescale.encode(&mut buf[offset..])?;
            offset += encode_versioned(version, self.duration, &mut buf[offset..])?;
            offset += language.encode(&mut buf[offset..])?;
            offset += [0u8; 2].encode(&mut buf[offset..])?;
            Ok(offset)
        })
    }
}

impl Decode for MdhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, .. } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let creation_time = decode_versioned(version, payload, &mut offset)?;
            let modification_time = decode_versioned(version, payload, &mut offset)?;
            let timescale = NonZeroU32::decode_at(payload, &mut offset)?;
            let duration = decode_versioned(version, payload, &mut offset)?;
            let language = u16::decode_at(payload, &mut offset)?;
            let _ = <[u8; 2]>::decode_at(payload, &mut offset)?;

            Ok(Self {
                version,
                creation_time: Mp4FileTime::from_secs(creation_time),
                modification_time: Mp4FileTime::from_secs(modification_time),
                timescale,
                duration,
                language: [
                    ((language >> 10) & 0b11111) as u8 + 0x60,
                    ((language >> 5) & 0b11111) as u8 + 0x60,
                    (language & 0b11111) as u8 + 0x60,
                ],
            })
        })
    }
}

impl FullBox for MdhdBox {
    fn full_box_version(&self) -> u8 {
        required_version(
            self.version,
            &[
                self.creation_time.as_secs(),
                self.modification_time.as_secs(),
                self.duration,
            ],
        )
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] HandlerBox class (親: [`MdiaBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct HdlrBox {
    pub handler_type: [u8; 4],

    /// ハンドラ名
    ///
    /// null 終端ではなかったり UTF-8 ではなかったりする実装が存在するので、バイト列のまま保持する
    pub name: Vec<u8>,
}

impl HdlrBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"hdlr");

    /// 映像用のハンドラー種別
    pub const HANDLER_TYPE_VIDE: [u8; 4] = *b"vide";
}

impl Encode for HdlrBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += [0u8; 4].encode(&mut buf[offset..])?;
            offset += self.handler_type.encode(&mut buf[offset..])?;
            offset += [0u8; 4 * 3].encode(&mut buf[offset..])?;
            offset += self.name.encode(&mut buf[offset..])?;
            Ok(offset)
        })
    }
}

impl Decode for HdlrBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let _ = FullBoxHeader::decode_at(payload, &mut offset)?;
            let _ = <[u8; 4]>::decode_at(payload, &mut offset)?;
            let handler_type = <[u8; 4]>::decode_at(payload, &mut offset)?;
            let _ = <[u8; 4 * 3]>::decode_at(payload, &mut offset)?;
            let name = payload[offset..].to_vec();
            Ok(Self { handler_type, name })
        })
    }
}

impl FullBox for HdlrBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] MediaInformationBox class (親: [`MdiaBox`])
///
/// `vmhd`, `smhd`, `dinf` などは `unknown_boxes` に格納される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MinfBox {
    pub stbl_box: StblBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MinfBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"minf");
}

impl Encode for MinfBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = 0;
            // stbl は dinf などの後ろに置かれるのが一般的
            for b in &self.unknown_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            offset += self.stbl_box.encode(&mut buf[offset..])?;
            Ok(offset)
        })
    }
}

impl Decode for MinfBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut stbl_box = None;
            let mut unknown_boxes = Vec::new();

            decode_children(payload, |ty, payload, offset| {
                match ty {
                    StblBox::TYPE if stbl_box.is_none() => {
                        stbl_box = Some(StblBox::decode_at(payload, offset)?);
                    }
                    _ => unknown_boxes.push(UnknownBox::decode_at(payload, offset)?),
                }
                Ok(())
            })?;

            Ok(Self {
                stbl_box: check_mandatory_box(stbl_box, "stbl", "minf")?,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for MinfBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            self.unknown_boxes
                .iter()
                .map(as_box_object)
                .chain(core::iter::once(&self.stbl_box).map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] SampleTableBox class (親: [`MinfBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StblBox {
    pub stsd_box: StsdBox,
    pub stts_box: SttsBox,
    pub ctts_box: Option<CttsBox>,
    pub stsc_box: StscBox,
    pub stsz_box: StszBox,
    pub stco_or_co64_box: Either<StcoBox, Co64Box>,
    pub stss_box: Option<StssBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl StblBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stbl");
}

impl Encode for StblBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = self.stsd_box.encode(buf)?;
            offset += self.stts_box.encode(&mut buf[offset..])?;
            if let Some(b) = &self.ctts_box {
                offset += b.encode(&mut buf[offset..])?;
            }
            offset += self.stsc_box.encode(&mut buf[offset..])?;
            offset += self.stsz_box.encode(&mut buf[offset..])?;
            offset += match &self.stco_or_co64_box {
                Either::A(b) => b.encode(&mut buf[offset..])?,
                Either::B(b) => b.encode(&mut buf[offset..])?,
            };
            if let Some(b) = &self.stss_box {
                offset += b.encode(&mut buf[offset..])?;
            }
            for b in &self.unknown_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for StblBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut stsd_box = None;
            let mut stts_box = None;
            let mut ctts_box = None;
            let mut stsc_box = None;
            let mut stsz_box = None;
            let mut stco_or_co64_box = None;
            let mut stss_box = None;
            let mut unknown_boxes = Vec::new();

            decode_children(payload, |ty, payload, offset| {
                match ty {
                    StsdBox::TYPE if stsd_box.is_none() => {
                        stsd_box = Some(StsdBox::decode_at(payload, offset)?);
                    }
                    SttsBox::TYPE if stts_box.is_none() => {
                        stts_box = Some(SttsBox::decode_at(payload, offset)?);
                    }
                    CttsBox::TYPE if ctts_box.is_none() => {
                        ctts_box = Some(CttsBox::decode_at(payload, offset)?);
                    }
                    StscBox::TYPE if stsc_box.is_none() => {
                        stsc_box = Some(StscBox::decode_at(payload, offset)?);
                    }
                    StszBox::TYPE if stsz_box.is_none() => {
                        stsz_box = Some(StszBox::decode_at(payload, offset)?);
                    }
                    StcoBox::TYPE if stco_or_co64_box.is_none() => {
                        stco_or_co64_box = Some(Either::A(StcoBox::decode_at(payload, offset)?));
                    }
                    Co64Box::TYPE if stco_or_co64_box.is_none() => {
                        stco_or_co64_box = Some(Either::B(Co64Box::decode_at(payload, offset)?));
                    }
                    StssBox::TYPE if stss_box.is_none() => {
                        stss_box = Some(StssBox::decode_at(payload, offset)?);
                    }
                    _ => unknown_boxes.push(UnknownBox::decode_at(payload, offset)?),
                }
                Ok(())
            })?;

            Ok(Self {
                stsd_box: check_mandatory_box(stsd_box, "stsd", "stbl")?,
                stts_box: check_mandatory_box(stts_box, "stts", "stbl")?,
                ctts_box,
                stsc_box: check_mandatory_box(stsc_box, "stsc", "stbl")?,
                stsz_box: check_mandatory_box(stsz_box, "stsz", "stbl")?,
                stco_or_co64_box: check_mandatory_box(stco_or_co64_box, "stco' or 'co64", "stbl")?,
                stss_box,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for StblBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            [as_box_object(&self.stsd_box), as_box_object(&self.stts_box)]
                .into_iter()
                .chain(self.ctts_box.iter().map(as_box_object))
                .chain([
                    as_box_object(&self.stsc_box),
                    as_box_object(&self.stsz_box),
                    as_box_object(&self.stco_or_co64_box),
                ])
                .chain(self.stss_box.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] SampleDescriptionBox class (親: [`StblBox`])
///
/// サンプルエントリーの中身はコーデックごとに異なるので、解釈せずに保持する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StsdBox {
    pub entries: Vec<UnknownBox>,
}

impl StsdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsd");
}

impl Encode for StsdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += (self.entries.len() as u32).encode(&mut buf[offset..])?;
            for b in &self.entries {
                offset += b.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for StsdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let _ = FullBoxHeader::decode_at(payload, &mut offset)?;
            let entry_count = u32::decode_at(payload, &mut offset)?;
            let mut entries = Vec::new();
            for _ in 0..entry_count {
                entries.push(UnknownBox::decode_at(payload, &mut offset)?);
            }
            Ok(Self { entries })
        })
    }
}

impl BaseBox for StsdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(self.entries.iter().map(as_box_object))
    }
}

impl FullBox for StsdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`SttsBox`] が保持するエントリー（デコード時間の差分のランレングス表現）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// [ISO/IEC 14496-12] TimeToSampleBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SttsBox {
    pub entries: Vec<SttsEntry>,
}

impl SttsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stts");

    /// サンプル群の尺を走査するイテレーターを受け取って、対応する [`SttsBox`] インスタンスを作成する
    pub fn from_sample_deltas<I>(sample_deltas: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut entries = Vec::<SttsEntry>::new();
        for sample_delta in sample_deltas {
            match entries.last_mut() {
                Some(last) if last.sample_delta == sample_delta => last.sample_count += 1,
                _ => entries.push(SttsEntry {
                    sample_count: 1,
                    sample_delta,
                }),
            }
        }
        Self { entries }
    }
}

impl Encode for SttsBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += (self.entries.len() as u32).encode(&mut buf[offset..])?;
            for entry in &self.entries {
                offset += entry.sample_count.encode(&mut buf[offset..])?;
                offset += entry.sample_delta.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for SttsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let _ = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut entries = Vec::new();
            for _ in 0..count {
                entries.push(SttsEntry {
                    sample_count: u32::decode_at(payload, &mut offset)?,
                    sample_delta: u32::decode_at(payload, &mut offset)?,
                });
            }
            Ok(Self { entries })
        })
    }
}

impl FullBox for SttsBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`CttsBox`] が保持するエントリー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct CttsEntry {
    pub sample_count: u32,

    /// コンポジション時間とデコード時間の差分
    ///
    /// version 0 では符号なし整数としてエンコードされる
    pub sample_offset: i32,
}

/// [ISO/IEC 14496-12] CompositionOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct CttsBox {
    pub version: u8,
    pub entries: Vec<CttsEntry>,
}

impl CttsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ctts");
}

impl Encode for CttsBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += (self.entries.len() as u32).encode(&mut buf[offset..])?;
            for entry in &self.entries {
                offset += entry.sample_count.encode(&mut buf[offset..])?;
                offset += entry.sample_offset.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for CttsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, .. } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut entries = Vec::new();
            for _ in 0..count {
                // version 0 の u32 と version 1 の i32 はビット列としては同じなので、ここでは区別しない
                entries.push(CttsEntry {
                    sample_count: u32::decode_at(payload, &mut offset)?,
                    sample_offset: i32::decode_at(payload, &mut offset)?,
                });
            }
            Ok(Self { version, entries })
        })
    }
}

impl FullBox for CttsBox {
    fn full_box_version(&self) -> u8 {
        self.version
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`StscBox`] が保持するエントリー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StscEntry {
    pub first_chunk: NonZeroU32,
    pub sample_per_chunk: u32,
    pub sample_description_index: NonZeroU32,
}

/// [ISO/IEC 14496-12] SampleToChunkBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StscBox {
    pub entries: Vec<StscEntry>,
}

impl StscBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsc");
}

impl Encode for StscBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += (self.entries.len() as u32).encode(&mut buf[offset..])?;
            for entry in &self.entries {
                offset += entry.first_chunk.encode(&mut buf[offset..])?;
                offset += entry.sample_per_chunk.encode(&mut buf[offset..])?;
                offset += entry.sample_description_index.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for StscBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let _ = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut entries = Vec::new();
            for _ in 0..count {
                entries.push(StscEntry {
                    first_chunk: NonZeroU32::decode_at(payload, &mut offset)?,
                    sample_per_chunk: u32::decode_at(payload, &mut offset)?,
                    sample_description_index: NonZeroU32::decode_at(payload, &mut offset)?,
                });
            }
            Ok(Self { entries })
        })
    }
}

impl FullBox for StscBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] SampleSizeBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StszBox {
    /// 全てのサンプルが同じサイズ
    Fixed {
        sample_size: NonZeroU32,
        sample_count: u32,
    },

    /// サンプルごとにサイズが異なる
    Variable { entry_sizes: Vec<u32> },
}

impl StszBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsz");

    /// サンプル数を返す
    pub fn sample_count(&self) -> u32 {
        match self {
            StszBox::Fixed { sample_count, .. } => *sample_count,
            StszBox::Variable { entry_sizes } => entry_sizes.len() as u32,
        }
    }
}

impl Encode for StszBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            match self {
                StszBox::Fixed {
                    sample_size,
                    sample_count,
                } => {
                    offset += sample_size.encode(&mut buf[offset..])?;
                    offset += sample_count.encode(&mut buf[offset..])?;
                }
                StszBox::Variable { entry_sizes } => {
                    offset += 0u32.encode(&mut buf[offset..])?;
                    offset += (entry_sizes.len() as u32).encode(&mut buf[offset..])?;
                    for size in entry_sizes {
                        offset += size.encode(&mut buf[offset..])?;
                    }
                }
            }
            Ok(offset)
        })
    }
}

impl Decode for StszBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let _ = FullBoxHeader::decode_at(payload, &mut offset)?;
            let sample_size = u32::decode_at(payload, &mut offset)?;
            let sample_count = u32::decode_at(payload, &mut offset)?;

            // サイズ 0 は「サンプルごとのサイズ表が続く」ことを意味する
            if let Some(sample_size) = NonZeroU32::new(sample_size) {
                return Ok(Self::Fixed {
                    sample_size,
                    sample_count,
                });
            }
            let mut entry_sizes = Vec::new();
            for _ in 0..sample_count {
                entry_sizes.push(u32::decode_at(payload, &mut offset)?);
            }
            Ok(Self::Variable { entry_sizes })
        })
    }
}

impl FullBox for StszBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] ChunkOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StcoBox {
    pub chunk_offsets: Vec<u32>,
}

impl StcoBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stco");
}

impl Encode for StcoBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += (self.chunk_offsets.len() as u32).encode(&mut buf[offset..])?;
            for v in &self.chunk_offsets {
                offset += v.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for StcoBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let _ = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut chunk_offsets = Vec::new();
            for _ in 0..count {
                chunk_offsets.push(u32::decode_at(payload, &mut offset)?);
            }
            Ok(Self { chunk_offsets })
        })
    }
}

impl FullBox for StcoBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] ChunkLargeOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Co64Box {
    pub chunk_offsets: Vec<u64>,
}

impl Co64Box {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"co64");
}

impl Encode for Co64Box {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += (self.chunk_offsets.len() as u32).encode(&mut buf[offset..])?;
            for v in &self.chunk_offsets {
                offset += v.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for Co64Box {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let _ = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut chunk_offsets = Vec::new();
            for _ in 0..count {
                chunk_offsets.push(u64::decode_at(payload, &mut offset)?);
            }
            Ok(Self { chunk_offsets })
        })
    }
}

impl FullBox for Co64Box {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] SyncSampleBox class (親: [`StblBox`])
///
/// 同期サンプル（キーフレーム）の番号を昇順に保持する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StssBox {
    pub sample_numbers: Vec<NonZeroU32>,
}

impl StssBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stss");
}

impl Encode for StssBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += (self.sample_numbers.len() as u32).encode(&mut buf[offset..])?;
            for v in &self.sample_numbers {
                offset += v.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for StssBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let _ = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut sample_numbers = Vec::new();
            for _ in 0..count {
                sample_numbers.push(NonZeroU32::decode_at(payload, &mut offset)?);
            }
            Ok(Self { sample_numbers })
        })
    }
}

impl FullBox for StssBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] MovieExtendsBox class (親: [`MoovBox`])
///
/// このボックスが存在する場合、ファイルはフラグメント化されていることを示す
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MvexBox {
    pub mehd_box: Option<MehdBox>,
    pub trex_boxes: Vec<TrexBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MvexBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mvex");
}

impl Encode for MvexBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = 0;
            if let Some(b) = &self.mehd_box {
                offset += b.encode(buf)?;
            }
            for b in &self.trex_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            for b in &self.unknown_boxes {
                offset += b.encode(&mut buf[offset..])?;
            }
            Ok(offset)
        })
    }
}

impl Decode for MvexBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut mehd_box = None;
            let mut trex_boxes = Vec::new();
            let mut unknown_boxes = Vec::new();

            decode_children(payload, |ty, payload, offset| {
                match ty {
                    MehdBox::TYPE if mehd_box.is_none() => {
                        mehd_box = Some(MehdBox::decode_at(payload, offset)?);
                    }
                    TrexBox::TYPE => trex_boxes.push(TrexBox::decode_at(payload, offset)?),
                    _ => unknown_boxes.push(UnknownBox::decode_at(payload, offset)?),
                }
                Ok(())
            })?;

            Ok(Self {
                mehd_box,
                trex_boxes,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for MvexBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            self.mehd_box
                .iter()
                .map(as_box_object)
                .chain(self.trex_boxes.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] MovieExtendsHeaderBox class (親: [`MvexBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MehdBox {
    pub version: u8,
    pub fragment_duration: u64,
}

impl MehdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mehd");
}

impl Encode for MehdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += encode_versioned(
                self.full_box_version(),
                self.fragment_duration,
                &mut buf[offset..],
            )?;
            Ok(offset)
        })
    }
}

impl Decode for MehdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let FullBoxHeader { version, .. } = FullBoxHeader::decode_at(payload, &mut offset)?;
            let fragment_duration = decode_versioned(version, payload, &mut offset)?;
            Ok(Self {
                version,
                fragment_duration,
            })
        })
    }
}

impl FullBox for MehdBox {
    fn full_box_version(&self) -> u8 {
        required_version(self.version, &[self.fragment_duration])
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] TrackExtendsBox class (親: [`MvexBox`])
///
/// トラックフラグメント内で値が省略された場合に使われるデフォルト値を定義する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrexBox {
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: SampleFlags,
}

impl TrexBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"trex");
}

impl Encode for TrexBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            let mut offset = FullBoxHeader::from_box(self).encode(buf)?;
            offset += self.track_id.encode(&mut buf[offset..])?;
            offset += self
                .default_sample_description_index
                .encode(&mut buf[offset..])?;
            offset += self.default_sample_duration.encode(&mut buf[offset..])?;
            offset += self.default_sample_size.encode(&mut buf[offset..])?;
            offset += self.default_sample_flags.encode(&mut buf[offset..])?;
            Ok(offset)
        })
    }
}

impl Decode for TrexBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let mut offset = 0;
            let _ = FullBoxHeader::decode_at(payload, &mut offset)?;
            Ok(Self {
                track_id: u32::decode_at(payload, &mut offset)?,
                default_sample_description_index: u32::decode_at(payload, &mut offset)?,
                default_sample_duration: u32::decode_at(payload, &mut offset)?,
                default_sample_size: u32::decode_at(payload, &mut offset)?,
                default_sample_flags: SampleFlags::decode_at(payload, &mut offset)?,
            })
        })
    }
}

impl FullBox for TrexBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

impl_leaf_box!(
    MvhdBox, TkhdBox, MdhdBox, HdlrBox, SttsBox, CttsBox, StscBox, StszBox, StcoBox, Co64Box,
    StssBox, MehdBox, TrexBox,
);

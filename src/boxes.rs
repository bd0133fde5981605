//! ボックス群を定義するためのモジュール
//!
//! 初期化セグメント（moov 以下）とフラグメント（moof 以下）のボックスに加えて、
//! トップレベルに現れるボックスを [`RootBox`] として列挙している。
//! サンプルエントリーなどのコーデック固有のボックスは [`UnknownBox`] として不透明なまま保持する。
use crate::{BaseBox, BoxHeader, BoxSize, BoxType, Decode, Encode, Error, Result};

pub use crate::boxes_fmp4::{
    EmsgBox, MfhdBox, MoofBox, PrftBox, SencBox, SencEntry, SidxBox, SidxReference,
    SubsampleEntry, TfdtBox, TfhdBox, TrafBox, TrunBox, TrunSample,
};
pub use crate::boxes_moov_tree::{
    Co64Box, CttsBox, CttsEntry, HdlrBox, MdhdBox, MdiaBox, MehdBox, MinfBox, MoovBox, MvexBox,
    MvhdBox, StblBox, StcoBox, StscBox, StscEntry, StsdBox, StssBox, StszBox, SttsBox, SttsEntry,
    TkhdBox, TrakBox, TrexBox,
};

/// ボックスのデコード処理を実行し、失敗した場合にはエラーにボックス種別を付与する
pub(crate) fn with_box_type<F, T>(box_type: BoxType, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    f().map_err(|e| e.with_box_type(box_type))
}

/// 必須の子ボックスが存在するかどうかをチェックする
#[track_caller]
pub(crate) fn check_mandatory_box<T>(b: Option<T>, expected: &str, parent: &str) -> Result<T> {
    b.ok_or_else(|| {
        Error::structural_mismatch(format!(
            "Missing mandatory '{expected}' box in '{parent}' box"
        ))
    })
}

/// `box_type` 種別のボックスをデコードする
///
/// `f` にはヘッダーを除いたペイロード部分が渡される
pub(crate) fn decode_box<T, F>(buf: &[u8], box_type: BoxType, f: F) -> Result<(T, usize)>
where
    F: FnOnce(&[u8]) -> Result<T>,
{
    with_box_type(box_type, || {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        header.box_type.expect(box_type)?;
        let value = f(payload)?;
        Ok((value, header.external_size() + payload.len()))
    })
}

/// `box_type` 種別のボックスをエンコードする
///
/// `f` はペイロード部分を書き込み、そのバイト数を返す
pub(crate) fn encode_box<F>(buf: &mut [u8], box_type: BoxType, f: F) -> Result<usize>
where
    F: FnOnce(&mut [u8]) -> Result<usize>,
{
    let header = BoxHeader::new_variable_size(box_type);
    let mut offset = header.encode(buf)?;
    offset += f(&mut buf[offset..])?;
    header.finalize_box_size(&mut buf[..offset])?;
    Ok(offset)
}

/// コンテナボックスのペイロード内の子ボックスを順に処理する
///
/// `f` は子ボックスの種別とペイロード全体、現在のオフセットを受け取り、
/// 子ボックス一つ分だけオフセットを進めなければならない。
/// 子ボックスのサイズの合計がペイロードのサイズと一致しない場合はエラーとなる。
pub(crate) fn decode_children<F>(payload: &[u8], mut f: F) -> Result<()>
where
    F: FnMut(BoxType, &[u8], &mut usize) -> Result<()>,
{
    let mut offset = 0;
    while offset < payload.len() {
        let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
        let start = offset;
        f(child_header.box_type, payload, &mut offset)?;
        if (offset - start) as u64 != child_header.box_size.get() {
            return Err(Error::structural_mismatch(format!(
                "Child box '{}' consumed {} bytes, but its declared size is {}",
                child_header.box_type,
                offset - start,
                child_header.box_size.get()
            )));
        }
    }
    Ok(())
}

/// 条件が真の場合だけ値をデコードする
pub(crate) fn decode_if<T: Decode>(
    present: bool,
    buf: &[u8],
    offset: &mut usize,
) -> Result<Option<T>> {
    if present {
        T::decode_at(buf, offset).map(Some)
    } else {
        Ok(None)
    }
}

/// 子ボックスを持たないボックスに [`BaseBox`] を実装する
macro_rules! impl_leaf_box {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::BaseBox for $ty {
                fn box_type(&self) -> $crate::BoxType {
                    Self::TYPE
                }

                fn children<'a>(
                    &'a self,
                ) -> Box<dyn 'a + Iterator<Item = &'a dyn $crate::BaseBox>> {
                    Box::new(core::iter::empty())
                }
            }
        )*
    };
}
pub(crate) use impl_leaf_box;

/// 未知のボックス、あるいは中身を解釈しないボックス
///
/// ペイロードはそのまま保持されるので、再エンコード時には元と同じバイト列となる
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownBox {
    /// ボックス種別
    pub box_type: BoxType,

    /// ボックスサイズ（64 bit 形式だったかどうかを保持するために使われる）
    pub box_size: BoxSize,

    /// ペイロード
    pub payload: Vec<u8>,
}

impl UnknownBox {
    fn header(&self) -> BoxHeader {
        let header = BoxHeader::new(self.box_type, self.box_size);
        if header.payload_size() == self.payload.len() as u64 {
            header
        } else {
            // ペイロードが書き換えられている場合にはサイズを計算し直す
            BoxHeader::new(
                self.box_type,
                BoxSize::with_payload_size(self.box_type, self.payload.len() as u64),
            )
        }
    }
}

impl Encode for UnknownBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = self.header().encode(buf)?;
        offset += self.payload.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for UnknownBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        Ok((
            Self {
                box_type: header.box_type,
                box_size: header.box_size,
                payload: payload.to_vec(),
            },
            header.external_size() + payload.len(),
        ))
    }
}

impl BaseBox for UnknownBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn is_unknown_box(&self) -> bool {
        true
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ISO/IEC 14496-12] FreeSpaceBox class (`free` と `skip` の両方を表す)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FreeBox {
    /// `free` と `skip` のどちらか
    pub box_type: BoxType,

    /// 中身（通常は全て 0）
    pub payload: Vec<u8>,
}

impl FreeBox {
    /// `free` ボックスの種別
    pub const TYPE: BoxType = BoxType::Normal(*b"free");

    /// `skip` ボックスの種別
    pub const SKIP_TYPE: BoxType = BoxType::Normal(*b"skip");
}

impl Encode for FreeBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, self.box_type, |buf| self.payload.encode(buf))
    }
}

impl Decode for FreeBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        if header.box_type != Self::TYPE && header.box_type != Self::SKIP_TYPE {
            return Err(Error::structural_mismatch(format!(
                "Expected box type `free` or `skip`, but got `{}`",
                header.box_type
            )));
        }
        decode_box(buf, header.box_type, |payload| {
            Ok(Self {
                box_type: header.box_type,
                payload: payload.to_vec(),
            })
        })
    }
}

impl BaseBox for FreeBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ISO/IEC 14496-12] MediaDataBox class
///
/// バッファ全体をデコードする場合に使われる。
/// ストリーミング処理ではペイロードはメモリに読み込まれず、
/// [`PayloadRegion`](crate::fragment::PayloadRegion) として位置だけが扱われる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MdatBox {
    /// ヘッダーのサイズフィールドを 64 bit 形式でエンコードするかどうか
    pub is_large_size: bool,

    /// ペイロード（サンプルデータ）
    pub payload: Vec<u8>,
}

impl MdatBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdat");
}

impl Encode for MdatBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let payload_size = self.payload.len() as u64;
        let box_size = if self.is_large_size {
            BoxSize::U64(16 + payload_size)
        } else {
            BoxSize::with_payload_size(Self::TYPE, payload_size)
        };
        let mut offset = BoxHeader::new(Self::TYPE, box_size).encode(buf)?;
        offset += self.payload.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for MdatBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;
            Ok((
                Self {
                    is_large_size: matches!(header.box_size, BoxSize::U64(_)),
                    payload: payload.to_vec(),
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl_leaf_box!(MdatBox);

/// ファイルタイプのブランド
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Brand([u8; 4]);

impl Brand {
    /// [ISO/IEC 14496-12] isom ブランド
    pub const ISOM: Self = Self::new(*b"isom");

    /// [ISO/IEC 14496-12] iso6 ブランド
    pub const ISO6: Self = Self::new(*b"iso6");

    /// DASH のメディアセグメントを表す msdh ブランド
    pub const MSDH: Self = Self::new(*b"msdh");

    /// DASH のセグメントインデックスを表す msix ブランド
    pub const MSIX: Self = Self::new(*b"msix");

    /// 4 バイトの値を受け取ってブランドを作成する
    pub const fn new(brand: [u8; 4]) -> Self {
        Self(brand)
    }

    /// ブランドの値を返す
    pub const fn get(self) -> [u8; 4] {
        self.0
    }
}

impl core::fmt::Debug for Brand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Ok(s) = core::str::from_utf8(&self.0) {
            f.debug_tuple("Brand").field(&s).finish()
        } else {
            f.debug_tuple("Brand").field(&self.0).finish()
        }
    }
}

impl Encode for Brand {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.encode(buf)
    }
}

impl Decode for Brand {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (bytes, size) = <[u8; 4]>::decode(buf)?;
        Ok((Self(bytes), size))
    }
}

fn encode_brands(
    buf: &mut [u8],
    major_brand: Brand,
    minor_version: u32,
    compatible_brands: &[Brand],
) -> Result<usize> {
    let mut offset = 0;
    offset += major_brand.encode(&mut buf[offset..])?;
    offset += minor_version.encode(&mut buf[offset..])?;
    for brand in compatible_brands {
        offset += brand.encode(&mut buf[offset..])?;
    }
    Ok(offset)
}

fn decode_brands(payload: &[u8]) -> Result<(Brand, u32, Vec<Brand>)> {
    let mut offset = 0;
    let major_brand = Brand::decode_at(payload, &mut offset)?;
    let minor_version = u32::decode_at(payload, &mut offset)?;
    let mut compatible_brands = Vec::new();
    while offset < payload.len() {
        compatible_brands.push(Brand::decode_at(payload, &mut offset)?);
    }
    Ok((major_brand, minor_version, compatible_brands))
}

/// [ISO/IEC 14496-12] FileTypeBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FtypBox {
    pub major_brand: Brand,
    pub minor_version: u32,
    pub compatible_brands: Vec<Brand>,
}

impl FtypBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ftyp");
}

impl Encode for FtypBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            encode_brands(
                buf,
                self.major_brand,
                self.minor_version,
                &self.compatible_brands,
            )
        })
    }
}

impl Decode for FtypBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let (major_brand, minor_version, compatible_brands) = decode_brands(payload)?;
            Ok(Self {
                major_brand,
                minor_version,
                compatible_brands,
            })
        })
    }
}

/// [ISO/IEC 14496-12] SegmentTypeBox class
///
/// レイアウトは [`FtypBox`] と同じで、メディアセグメントの先頭に置かれる
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StypBox {
    pub major_brand: Brand,
    pub minor_version: u32,
    pub compatible_brands: Vec<Brand>,
}

impl StypBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"styp");
}

impl Encode for StypBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |buf| {
            encode_brands(
                buf,
                self.major_brand,
                self.minor_version,
                &self.compatible_brands,
            )
        })
    }
}

impl Decode for StypBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |payload| {
            let (major_brand, minor_version, compatible_brands) = decode_brands(payload)?;
            Ok(Self {
                major_brand,
                minor_version,
                compatible_brands,
            })
        })
    }
}

impl_leaf_box!(FtypBox, StypBox);

/// ファイルまたはストリームのトップレベルに現れるボックス
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum RootBox {
    Ftyp(FtypBox),
    Styp(StypBox),
    Moov(MoovBox),
    Moof(MoofBox),
    Mdat(MdatBox),
    Free(FreeBox),
    Sidx(SidxBox),
    Emsg(EmsgBox),
    Prft(PrftBox),
    Unknown(UnknownBox),
}

impl RootBox {
    fn inner_box(&self) -> &dyn BaseBox {
        match self {
            RootBox::Ftyp(b) => b,
            RootBox::Styp(b) => b,
            RootBox::Moov(b) => b,
            RootBox::Moof(b) => b,
            RootBox::Mdat(b) => b,
            RootBox::Free(b) => b,
            RootBox::Sidx(b) => b,
            RootBox::Emsg(b) => b,
            RootBox::Prft(b) => b,
            RootBox::Unknown(b) => b,
        }
    }
}

impl Encode for RootBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            RootBox::Ftyp(b) => b.encode(buf),
            RootBox::Styp(b) => b.encode(buf),
            RootBox::Moov(b) => b.encode(buf),
            RootBox::Moof(b) => b.encode(buf),
            RootBox::Mdat(b) => b.encode(buf),
            RootBox::Free(b) => b.encode(buf),
            RootBox::Sidx(b) => b.encode(buf),
            RootBox::Emsg(b) => b.encode(buf),
            RootBox::Prft(b) => b.encode(buf),
            RootBox::Unknown(b) => b.encode(buf),
        }
    }
}

impl Decode for RootBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        match header.box_type {
            FtypBox::TYPE => FtypBox::decode(buf).map(|(b, n)| (Self::Ftyp(b), n)),
            StypBox::TYPE => StypBox::decode(buf).map(|(b, n)| (Self::Styp(b), n)),
            MoovBox::TYPE => MoovBox::decode(buf).map(|(b, n)| (Self::Moov(b), n)),
            MoofBox::TYPE => MoofBox::decode(buf).map(|(b, n)| (Self::Moof(b), n)),
            MdatBox::TYPE => MdatBox::decode(buf).map(|(b, n)| (Self::Mdat(b), n)),
            FreeBox::TYPE | FreeBox::SKIP_TYPE => {
                FreeBox::decode(buf).map(|(b, n)| (Self::Free(b), n))
            }
            SidxBox::TYPE => SidxBox::decode(buf).map(|(b, n)| (Self::Sidx(b), n)),
            EmsgBox::TYPE => EmsgBox::decode(buf).map(|(b, n)| (Self::Emsg(b), n)),
            PrftBox::TYPE => PrftBox::decode(buf).map(|(b, n)| (Self::Prft(b), n)),
            _ => UnknownBox::decode(buf).map(|(b, n)| (Self::Unknown(b), n)),
        }
    }
}

impl BaseBox for RootBox {
    fn box_type(&self) -> BoxType {
        self.inner_box().box_type()
    }

    fn is_unknown_box(&self) -> bool {
        self.inner_box().is_unknown_box()
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        self.inner_box().children()
    }
}

/// メモリ上に全体が載っている MP4 ファイル
///
/// ストリーミングではなく、バイト列全体を一括でデコード・エンコードする場合に使う
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Mp4File {
    /// トップレベルのボックス群（出現順）
    pub boxes: Vec<RootBox>,
}

impl Mp4File {
    /// 最初に出現する `moov` ボックスを返す
    pub fn moov_box(&self) -> Option<&MoovBox> {
        self.boxes.iter().find_map(|b| match b {
            RootBox::Moov(b) => Some(b),
            _ => None,
        })
    }

    /// `moof` ボックスを出現順に走査するイテレーターを返す
    pub fn moof_boxes(&self) -> impl '_ + Iterator<Item = &MoofBox> {
        self.boxes.iter().filter_map(|b| match b {
            RootBox::Moof(b) => Some(b),
            _ => None,
        })
    }
}

impl Encode for Mp4File {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        for b in &self.boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        Ok(offset)
    }
}

impl Decode for Mp4File {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let mut boxes = Vec::new();
        while offset < buf.len() {
            let start = offset;
            let b = RootBox::decode_at(buf, &mut offset).map_err(|e| e.with_offset(start as u64))?;
            boxes.push(b);
        }
        Ok((Self { boxes }, offset))
    }
}

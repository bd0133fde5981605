use crate::{Decode, Encode, Error, ErrorKind, Result};

/// 全てのボックスが実装するトレイト
///
/// 本来なら `Box` という名前が適切だが、それだと標準ライブラリの [`std::boxed::Box`] と名前が
/// 衝突してしまうので、それを避けるために `BaseBox` としている
pub trait BaseBox {
    /// ボックスの種別
    fn box_type(&self) -> BoxType;

    /// 未知のボックスかどうか
    ///
    /// 基本的には `false` を返すデフォルト実装のままで問題ないが、
    /// [`UnknownBox`](crate::boxes::UnknownBox) を含む `enum` を定義する場合には、独自の実装が必要となる
    fn is_unknown_box(&self) -> bool {
        false
    }

    /// 子ボックスを走査するイテレーターを返す
    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>>;
}

pub(crate) fn as_box_object<T: BaseBox>(t: &T) -> &dyn BaseBox {
    t
}

/// フルボックスを表すトレイト
pub trait FullBox: BaseBox {
    /// フルボックスのバージョンを返す
    fn full_box_version(&self) -> u8;

    /// フルボックスのフラグを返す
    fn full_box_flags(&self) -> FullBoxFlags;
}

/// [`BaseBox`] に共通のヘッダー
///
/// ワイヤー上の形式は `size (u32) | type (4 bytes) [| largesize (u64)] [| usertype (16 bytes)]`
/// で、全てビッグエンディアンとなる
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxHeader {
    /// ボックスの種別
    pub box_type: BoxType,

    /// ボックスのサイズ（ヘッダー部分を含む）
    pub box_size: BoxSize,
}

impl BoxHeader {
    /// ヘッダーの最小バイト数
    pub const MIN_SIZE: usize = 4 + 4;

    /// 種別とサイズを指定してヘッダーを作成する
    pub const fn new(box_type: BoxType, box_size: BoxSize) -> Self {
        Self { box_type, box_size }
    }

    /// サイズが未確定のヘッダーを作成する
    ///
    /// エンコード時にはまずこのヘッダーを書き込み、ペイロードを書き終えた後に
    /// [`BoxHeader::finalize_box_size()`] で実際のサイズに置き換える
    pub fn new_variable_size(box_type: BoxType) -> Self {
        Self {
            box_type,
            box_size: BoxSize::VARIABLE_SIZE,
        }
    }

    /// エンコード済みのボックス全体のバイト列を受け取って、先頭のサイズフィールドを確定させる
    pub fn finalize_box_size(self, box_bytes: &mut [u8]) -> Result<Self> {
        if self.box_size != BoxSize::VARIABLE_SIZE {
            return Err(Error::invalid_input(
                "box_size must be VARIABLE_SIZE before finalization",
            ));
        }

        let Ok(size) = u32::try_from(box_bytes.len()) else {
            // ヘッダーのサイズが変わると box_bytes 全体のレイアウトがずれてしまうのでエラーにする
            return Err(Error::unsupported(
                "box payload too large: header size would require U64, making layout inconsistent",
            ));
        };
        size.encode(box_bytes)?;

        Ok(Self {
            box_type: self.box_type,
            box_size: BoxSize::U32(size),
        })
    }

    /// ヘッダーをエンコードした際のバイト数を返す
    pub const fn external_size(self) -> usize {
        self.box_type.external_size() + self.box_size.external_size()
    }

    /// ペイロード部分のバイト数を返す
    pub const fn payload_size(self) -> u64 {
        // デコード時に box_size >= external_size であることは検証済み
        self.box_size.get().saturating_sub(self.external_size() as u64)
    }

    /// ボックス全体のバイト列から、ヘッダーとペイロード部分を切り出す
    ///
    /// 宣言されたサイズ分のバイト列が `buf` 内に存在しない場合には
    /// [`ErrorKind::StructuralMismatch`] エラーとなる
    pub fn decode_header_and_payload(buf: &[u8]) -> Result<(Self, &[u8])> {
        let (header, header_size) = Self::decode(buf)?;
        let box_size = header.box_size.get();
        if box_size > buf.len() as u64 {
            return Err(Error::structural_mismatch(format!(
                "Box size {box_size} exceeds the {} bytes available in the enclosing region",
                buf.len()
            ))
            .with_box_type(header.box_type));
        }
        Ok((header, &buf[header_size..box_size as usize]))
    }
}

impl Encode for BoxHeader {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;

        let large_size = match self.box_size {
            BoxSize::U32(size) => {
                offset += size.encode(&mut buf[offset..])?;
                None
            }
            BoxSize::U64(size) => {
                offset += 1u32.encode(&mut buf[offset..])?;
                Some(size)
            }
        };

        let user_type = match self.box_type {
            BoxType::Normal(ty) => {
                offset += ty.encode(&mut buf[offset..])?;
                None
            }
            BoxType::Uuid(ty) => {
                offset += b"uuid".encode(&mut buf[offset..])?;
                Some(ty)
            }
        };

        // largesize は usertype よりも前に置かれる
        if let Some(large_size) = large_size {
            offset += large_size.encode(&mut buf[offset..])?;
        }
        if let Some(ty) = user_type {
            offset += ty.encode(&mut buf[offset..])?;
        }

        Ok(offset)
    }
}

impl Decode for BoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        // ヘッダーの途中でバイト列が尽きた場合はヘッダーの破損として扱う
        let truncated = |e: Error| {
            if e.kind == ErrorKind::InsufficientBuffer {
                Error::malformed_header(format!(
                    "Insufficient bytes for a box header: available={}",
                    buf.len()
                ))
            } else {
                e
            }
        };

        let mut offset = 0;
        let box_size = u32::decode_at(buf, &mut offset).map_err(truncated)?;
        let box_type = <[u8; 4]>::decode_at(buf, &mut offset).map_err(truncated)?;

        let box_size = match box_size {
            0 => {
                return Err(Error::malformed_header(
                    "Box size 0 (box extends to the end of the stream) is not supported",
                )
                .with_box_type(BoxType::Normal(box_type)));
            }
            1 => BoxSize::U64(u64::decode_at(buf, &mut offset).map_err(truncated)?),
            n => BoxSize::U32(n),
        };

        let box_type = if box_type == *b"uuid" {
            BoxType::Uuid(<[u8; 16]>::decode_at(buf, &mut offset).map_err(truncated)?)
        } else {
            BoxType::Normal(box_type)
        };

        let header = Self { box_type, box_size };
        if box_size.get() < header.external_size() as u64 {
            return Err(Error::malformed_header(format!(
                "Too small box size: actual={}, expected={} or more",
                box_size.get(),
                header.external_size()
            ))
            .with_box_type(box_type));
        }

        Ok((header, offset))
    }
}

/// [`FullBox`] に共通のヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxHeader {
    /// バージョン
    pub version: u8,

    /// フラグ
    pub flags: FullBoxFlags,
}

impl FullBoxHeader {
    /// フルボックスへの参照を受け取って、対応するヘッダーを作成する
    pub fn from_box<B: FullBox>(b: &B) -> Self {
        Self {
            version: b.full_box_version(),
            flags: b.full_box_flags(),
        }
    }
}

impl Encode for FullBoxHeader {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += self.version.encode(&mut buf[offset..])?;
        offset += self.flags.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for FullBoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let version = u8::decode_at(buf, &mut offset)?;
        let flags = FullBoxFlags::decode_at(buf, &mut offset)?;
        Ok((Self { version, flags }, offset))
    }
}

/// [`FullBox`] のヘッダー部分に含まれる 24 bit のビットフラグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxFlags(u32);

impl FullBoxFlags {
    /// 空のビットフラグを作成する
    pub const fn empty() -> Self {
        Self(0)
    }

    /// [`u32`] を受け取って、対応するビットフラグを作成する
    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// このビットフラグに対応する [`u32`] 値を返す
    pub const fn get(self) -> u32 {
        self.0
    }

    /// 指定されたビット位置のフラグがセットされているかどうかを判定する
    pub const fn is_set(self, i: usize) -> bool {
        (self.0 & (1 << i)) != 0
    }
}

impl Encode for FullBoxFlags {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.to_be_bytes()[1..].encode(buf)
    }
}

impl Decode for FullBoxFlags {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (bytes, size) = <[u8; 3]>::decode(buf)?;
        Ok((Self(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])), size))
    }
}

/// [`BaseBox`] のサイズ
///
/// ボックスのサイズはヘッダー部分とペイロード部分のサイズを足した値となる。
/// 32 bit に収まる場合でも 64 bit 形式でエンコードされたボックスは [`BoxSize::U64`] として保持し、
/// 再エンコード時に同じバイト列を出力できるようにしている。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum BoxSize {
    U32(u32),
    U64(u64),
}

impl BoxSize {
    /// エンコード途中の、まだサイズが確定していないボックスを表すための特別な値
    pub const VARIABLE_SIZE: Self = Self::U32(0);

    /// ボックス種別とペイロードサイズを受け取って、対応する [`BoxSize`] インスタンスを作成する
    pub fn with_payload_size(box_type: BoxType, payload_size: u64) -> Self {
        let mut size = 4 + box_type.external_size() as u64 + payload_size;
        if let Ok(size) = u32::try_from(size) {
            Self::U32(size)
        } else {
            size += 8;
            Self::U64(size)
        }
    }

    /// ボックスのサイズの値を取得する
    pub const fn get(self) -> u64 {
        match self {
            BoxSize::U32(v) => v as u64,
            BoxSize::U64(v) => v,
        }
    }

    /// [`BoxHeader`] 内のサイズフィールドをエンコードする際に必要となるバイト数を返す
    pub const fn external_size(self) -> usize {
        match self {
            BoxSize::U32(_) => 4,
            BoxSize::U64(_) => 4 + 8,
        }
    }
}

/// [`BaseBox`] の種別
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoxType {
    /// 四文字で表現される通常のボックス種別
    Normal([u8; 4]),

    /// UUID 形式のボックス種別
    Uuid([u8; 16]),
}

impl BoxType {
    /// 種別を表すバイト列を返す
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            BoxType::Normal(ty) => &ty[..],
            BoxType::Uuid(ty) => &ty[..],
        }
    }

    /// [`BoxHeader`] 内のボックス種別フィールドをエンコードする際に必要となるバイト数を返す
    pub const fn external_size(self) -> usize {
        if matches!(self, Self::Normal(_)) {
            4
        } else {
            4 + 16
        }
    }

    /// 自分が `expected` と同じ種別であるかをチェックする
    #[track_caller]
    pub fn expect(self, expected: Self) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(Error::structural_mismatch(format!(
                "Expected box type `{expected}`, but got `{self}`"
            )))
        }
    }
}

impl core::fmt::Debug for BoxType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BoxType::Normal(ty) => {
                if let Ok(ty) = core::str::from_utf8(ty) {
                    f.debug_tuple("BoxType").field(&ty).finish()
                } else {
                    f.debug_tuple("BoxType").field(ty).finish()
                }
            }
            BoxType::Uuid(ty) => f.debug_tuple("BoxType").field(ty).finish(),
        }
    }
}

impl core::fmt::Display for BoxType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let BoxType::Normal(ty) = self
            && let Ok(ty) = core::str::from_utf8(&ty[..])
        {
            return write!(f, "{ty}");
        }
        write!(f, "{:?}", self.as_bytes())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for BoxType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// MP4 ファイル内で使われる時刻形式（1904/1/1 からの経過秒数）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mp4FileTime(u64);

impl Mp4FileTime {
    /// 1904/1/1 からの経過秒数を引数にとって [`Mp4FileTime`] インスタンスを作成する
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// 1904/1/1 からの経過秒数を返す
    pub const fn as_secs(self) -> u64 {
        self.0
    }
}

/// 固定小数点数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixedPointNumber<I, F = I> {
    /// 整数部
    pub integer: I,

    /// 小数部
    pub fraction: F,
}

impl<I, F> FixedPointNumber<I, F> {
    /// 整数部と小数部を受け取って固定小数点数を返す
    pub const fn new(integer: I, fraction: F) -> Self {
        Self { integer, fraction }
    }
}

impl<I: Encode, F: Encode> Encode for FixedPointNumber<I, F> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += self.integer.encode(&mut buf[offset..])?;
        offset += self.fraction.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl<I: Decode, F: Decode> Decode for FixedPointNumber<I, F> {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let integer = I::decode_at(buf, &mut offset)?;
        let fraction = F::decode_at(buf, &mut offset)?;
        Ok((Self { integer, fraction }, offset))
    }
}

/// null 終端の UTF-8 文字列
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Utf8String(String);

impl Utf8String {
    /// 終端の null を含まない文字列を受け取って [`Utf8String`] インスタンスを作成する
    ///
    /// 引数の文字列内の null 文字が含まれている場合には [`None`] が返される
    pub fn new(s: &str) -> Option<Self> {
        if s.as_bytes().contains(&0) {
            return None;
        }
        Some(Self(s.to_owned()))
    }

    /// null 終端部分を含まない文字列を返す
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Encode for Utf8String {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += self.0.as_bytes().encode(&mut buf[offset..])?;
        offset += 0u8.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for Utf8String {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let Some(end) = buf.iter().position(|&b| b == 0) else {
            return Err(Error::invalid_data("Missing null terminator of a string"));
        };
        let s = String::from_utf8(buf[..end].to_vec())
            .map_err(|e| Error::invalid_data(format!("Invalid UTF-8 string: {e}")))?;
        Ok((Self(s), end + 1))
    }
}

/// `A` か `B` のどちらかの値を保持する列挙型
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Either<A, B> {
    A(A),
    B(B),
}

impl<A: BaseBox, B: BaseBox> Either<A, B> {
    fn inner_box(&self) -> &dyn BaseBox {
        match self {
            Self::A(x) => x,
            Self::B(x) => x,
        }
    }
}

impl<A: BaseBox, B: BaseBox> BaseBox for Either<A, B> {
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

/// サンプルの依存関係などを表すフラグ（`trex`, `tfhd`, `trun` ボックスで使われる）
///
/// ビットレイアウト:
/// `reserved(4) | is_leading(2) | sample_depends_on(2) | sample_is_depended_on(2) |
///  sample_has_redundancy(2) | sample_padding_value(3) | sample_is_non_sync_sample(1) |
///  sample_degradation_priority(16)`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleFlags(u32);

impl SampleFlags {
    /// 全てのビットが 0 のフラグを返す
    pub const fn empty() -> Self {
        Self(0)
    }

    /// [`u32`] 値からフラグを作成する
    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// 生の [`u32`] 値を返す
    pub const fn get(self) -> u32 {
        self.0
    }

    /// キーフレーム（同期サンプル）用の典型的なフラグを返す
    pub const fn sync_sample() -> Self {
        // sample_depends_on = 2 (他のサンプルに依存しない)
        Self(2 << 24)
    }

    /// 非キーフレーム用の典型的なフラグを返す
    pub const fn non_sync_sample() -> Self {
        // sample_depends_on = 1, sample_is_non_sync_sample = 1
        Self((1 << 24) | (1 << 16))
    }

    #[allow(missing_docs)]
    pub const fn is_leading(self) -> u8 {
        ((self.0 >> 26) & 0b11) as u8
    }

    #[allow(missing_docs)]
    pub const fn sample_depends_on(self) -> u8 {
        ((self.0 >> 24) & 0b11) as u8
    }

    #[allow(missing_docs)]
    pub const fn sample_is_depended_on(self) -> u8 {
        ((self.0 >> 22) & 0b11) as u8
    }

    #[allow(missing_docs)]
    pub const fn sample_has_redundancy(self) -> u8 {
        ((self.0 >> 20) & 0b11) as u8
    }

    #[allow(missing_docs)]
    pub const fn sample_padding_value(self) -> u8 {
        ((self.0 >> 17) & 0b111) as u8
    }

    /// 非同期サンプル（キーフレームではない）かどうか
    pub const fn sample_is_non_sync_sample(self) -> bool {
        (self.0 >> 16) & 1 == 1
    }

    #[allow(missing_docs)]
    pub const fn sample_degradation_priority(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl Encode for SampleFlags {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.encode(buf)
    }
}

impl Decode for SampleFlags {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u32::decode(buf)?;
        Ok((Self(v), size))
    }
}

use std::{
    backtrace::Backtrace,
    num::{NonZeroU16, NonZeroU32},
    panic::Location,
};

use crate::BoxType;

/// このライブラリ用の Result 型
pub type Result<T> = core::result::Result<T, Error>;

/// エンコード/デコード/ストリーム処理のエラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// ボックスヘッダーが壊れている（バイト不足、サイズ 0、ヘッダー長より小さいサイズ）
    MalformedHeader,

    /// ボックスの構造が期待と異なる（子ボックスのサイズの合計が親と一致しない、想定外のボックス種別など）
    StructuralMismatch,

    /// 範囲外へのアクセス（ウィンドウ外の読み込み、バッファ先頭より前へのシーク、存在しないサンプル番号など）
    OutOfBounds,

    /// 入力データの形式または構造が無効である
    InvalidInput,

    /// データコンテンツが無効または破損している
    InvalidData,

    /// 提供されたバッファがエンコード/デコード結果を保持するのに小さすぎる
    InsufficientBuffer,

    /// 操作またはデータ形式がサポートされていない
    Unsupported,

    /// 下位のバイトソースで発生した I/O エラー
    Io,

    /// その他の予期しないエラー
    Other,
}

/// エラー型
pub struct Error {
    /// 発生したエラーの種類
    pub kind: ErrorKind,

    /// エラーが発生した理由
    pub reason: String,

    /// エラーが作成されたソースコードの場所
    pub location: &'static Location<'static>,

    /// エラーが発生した MP4 ボックスの種類
    pub box_type: Option<BoxType>,

    /// エラーが発生したストリーム内の絶対バイト位置
    pub offset: Option<u64>,

    /// エラー発生箇所を示すバックトレース
    ///
    /// バックトレースは `RUST_BACKTRACE` 環境変数が設定されていない場合には取得されない
    pub backtrace: Backtrace,

    /// 下位のバイトソースが返した I/O エラー（[`ErrorKind::Io`] の場合のみ）
    pub io_error: Option<std::io::Error>,
}

impl Error {
    /// [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Self::with_reason(kind, String::new())
    }

    /// エラー理由つきで [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn with_reason<T: Into<String>>(kind: ErrorKind, reason: T) -> Self {
        Self {
            kind,
            reason: reason.into(),
            location: Location::caller(),
            box_type: None,
            offset: None,
            backtrace: Backtrace::capture(),
            io_error: None,
        }
    }

    /// エラーが発生したボックスの種別を設定する
    ///
    /// すでに設定済みの場合には、より内側のボックスの情報を優先して上書きしない
    pub fn with_box_type(mut self, box_type: BoxType) -> Self {
        if self.box_type.is_none() {
            self.box_type = Some(box_type);
        }
        self
    }

    /// エラーが発生したストリーム内の絶対位置を設定する
    pub fn with_offset(mut self, offset: u64) -> Self {
        if self.offset.is_none() {
            self.offset = Some(offset);
        }
        self
    }

    #[track_caller]
    pub(crate) fn malformed_header<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::MalformedHeader, reason)
    }

    #[track_caller]
    pub(crate) fn structural_mismatch<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::StructuralMismatch, reason)
    }

    #[track_caller]
    pub(crate) fn out_of_bounds<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::OutOfBounds, reason)
    }

    #[track_caller]
    pub(crate) fn unsupported<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::Unsupported, reason)
    }

    #[track_caller]
    pub(crate) fn invalid_input<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::InvalidInput, reason)
    }

    #[track_caller]
    pub(crate) fn invalid_data<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::InvalidData, reason)
    }

    #[track_caller]
    pub(crate) fn insufficient_buffer() -> Self {
        Self::new(ErrorKind::InsufficientBuffer)
    }

    #[track_caller]
    pub(crate) fn check_buffer_size(required_size: usize, buf: &[u8]) -> Result<()> {
        if buf.len() < required_size {
            Err(Self::insufficient_buffer())
        } else {
            Ok(())
        }
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        // StreamBuffer が io::Error に包んだ Error はそのまま取り出す
        if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = e.into_inner()
                && let Ok(inner) = inner.downcast::<Error>()
            {
                return *inner;
            }
            return Self::with_reason(ErrorKind::Other, "failed to unwrap inner error");
        }
        let mut error = Self::with_reason(ErrorKind::Io, e.to_string());
        error.io_error = Some(e);
        error
    }
}

impl From<Error> for std::io::Error {
    fn from(mut e: Error) -> Self {
        if let Some(io_error) = e.io_error.take() {
            return io_error;
        }
        let kind = match e.kind {
            ErrorKind::Io => std::io::ErrorKind::Other,
            ErrorKind::InvalidInput => std::io::ErrorKind::InvalidInput,
            ErrorKind::Unsupported => std::io::ErrorKind::Unsupported,
            ErrorKind::InsufficientBuffer => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, e)
    }
}

impl core::fmt::Debug for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self}")
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(ty) = self.box_type {
            write!(f, "[{ty}] ")?;
        }

        write!(f, "{:?}: {}", self.kind, self.reason)?;

        if let Some(offset) = self.offset {
            write!(f, " (stream offset {offset})")?;
        }

        write!(f, " (at {}:{})", self.location.file(), self.location.line())?;
        if self.backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            write!(f, "\n\nBacktrace:\n{}", self.backtrace)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.io_error
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// バイト列に変換可能な型を表現するためのトレイト
pub trait Encode {
    /// `self` をバイト列に変換して `buf` に書きこむ
    ///
    /// 返り値は、変換後のバイト列のサイズで、
    /// もし `buf` のサイズが不足している場合には [`ErrorKind::InsufficientBuffer`] エラーが返される
    fn encode(&self, buf: &mut [u8]) -> Result<usize>;

    /// `self` をバイト列に変換して、変換後のバイト列を返す
    fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0; 64];
        loop {
            match self.encode(&mut buf) {
                Ok(size) => {
                    buf.truncate(size);
                    return Ok(buf);
                }
                Err(e) if e.kind == ErrorKind::InsufficientBuffer => {
                    buf.resize(buf.len() * 2, 0);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// バイト列から `Self` に変換するためのトレイト
pub trait Decode: Sized {
    /// バイト列からこの型の値をデコードする
    ///
    /// 成功時には、デコードされた値とデコードに消費されたバイト数のタプルが、
    /// 失敗時には [`Error`] が返される
    fn decode(buf: &[u8]) -> Result<(Self, usize)>;

    /// オフセット位置からバイト列をデコードし、オフセットを自動で進める
    fn decode_at(buf: &[u8], offset: &mut usize) -> Result<Self> {
        let rest = buf.get(*offset..).ok_or_else(Error::insufficient_buffer)?;
        let (decoded, size) = Self::decode(rest)?;
        *offset += size;
        Ok(decoded)
    }
}

macro_rules! impl_int_codec {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                #[track_caller]
                fn encode(&self, buf: &mut [u8]) -> Result<usize> {
                    const N: usize = core::mem::size_of::<$ty>();
                    Error::check_buffer_size(N, buf)?;
                    buf[..N].copy_from_slice(&self.to_be_bytes());
                    Ok(N)
                }
            }

            impl Decode for $ty {
                #[track_caller]
                fn decode(buf: &[u8]) -> Result<(Self, usize)> {
                    const N: usize = core::mem::size_of::<$ty>();
                    Error::check_buffer_size(N, buf)?;
                    let mut bytes = [0; N];
                    bytes.copy_from_slice(&buf[..N]);
                    Ok((Self::from_be_bytes(bytes), N))
                }
            }
        )*
    };
}

impl_int_codec!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Encode for NonZeroU16 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.get().encode(buf)
    }
}

impl Encode for NonZeroU32 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.get().encode(buf)
    }
}

impl Decode for NonZeroU16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u16::decode(buf)?;
        NonZeroU16::new(v)
            .map(|nz| (nz, size))
            .ok_or_else(|| Error::invalid_data("Expected a non-zero integer, but got 0"))
    }
}

impl Decode for NonZeroU32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u32::decode(buf)?;
        NonZeroU32::new(v)
            .map(|nz| (nz, size))
            .ok_or_else(|| Error::invalid_data("Expected a non-zero integer, but got 0"))
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        for item in self {
            offset += item.encode(&mut buf[offset..])?;
        }
        Ok(offset)
    }
}

impl Encode for [u8] {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(self.len(), buf)?;
        buf[..self.len()].copy_from_slice(self);
        Ok(self.len())
    }
}

impl<T: Decode + Default + Copy, const N: usize> Decode for [T; N] {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut items = [T::default(); N];
        let mut offset = 0;

        for item in &mut items {
            *item = T::decode_at(buf, &mut offset)?;
        }

        Ok((items, offset))
    }
}

//! 前方向にしか読めない入力から fMP4 をフラグメント単位で処理するためのモジュール
//!
//! [`FragmentStream`] は以下の状態を遷移する:
//! - [`StreamState::Init`]: ftyp や moov などの初期化セグメントを読み込む
//! - [`StreamState::Streaming`]: moof と mdat の組を一つずつ処理し、コールバックを呼び出す
//! - [`StreamState::Done`]: 入力の終端に達した
//! - [`StreamState::Failed`]: エラーが発生した（以降の呼び出しは全て [`StreamError::InvalidState`] となる）
//!
//! # Examples
//!
//! ```no_run
//! use shiguredo_fmp4_stream::stream::{FnHandler, FragmentStream, HandlerResult, SampleAccessor};
//! use shiguredo_fmp4_stream::fragment::Fragment;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = std::fs::File::open("input.mp4")?;
//! let mut stream = FragmentStream::new(file);
//! let init = stream.read_init()?;
//! println!("tracks: {}", init.tracks.len());
//!
//! stream.run(&mut FnHandler(
//!     |fragment: &Fragment, samples: &mut SampleAccessor<'_>| -> HandlerResult {
//!         for track in &fragment.tracks {
//!             for sample in samples.get_all(track.track_id)? {
//!                 println!("{} {}", sample.decode_time, sample.size);
//!             }
//!         }
//!         Ok(())
//!     },
//! ))?;
//! # Ok(())
//! # }
//! ```
use std::{
    collections::{BTreeMap, VecDeque},
    io::Read,
    num::NonZeroU32,
};

use crate::{
    BaseBox, BoxType, Decode, Error, ErrorKind, Result,
    boxes::{
        EmsgBox, FreeBox, FtypBox, MdatBox, MoofBox, MoovBox, PrftBox, RootBox, SencEntry,
        SidxBox, StypBox, SubsampleEntry,
    },
    fragment::{Fragment, PayloadRegion, Sample},
    io::{BufferInfo, MAX_BOX_SIZE, PeekedBoxHeader, StreamBuffer},
};

/// コールバックが返す結果の型
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// [`FragmentStream`] の処理中に発生するエラー
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// ボックスのデコードやバッファ操作に失敗した
    #[error(transparent)]
    Box(Error),

    /// 入力の読み込みに失敗した
    ///
    /// 入力が返した [`std::io::Error`] がそのまま入る
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// 初期化セグメントにフラグメント化された moov ボックス（trak と mvex / trex を含む）が存在しない
    #[error(
        "stream is not fragmented: no moov box with trak and mvex/trex precedes the first fragment"
    )]
    NotFragmented,

    /// moof ボックスの直後に mdat ボックスが存在しない
    #[error("moof box is not followed by an mdat box (expected at offset {offset})")]
    MissingPayload {
        /// mdat ボックスがあるべき位置
        offset: u64,
    },

    /// 対応する moof ボックスのない mdat ボックスが現れた
    #[error("mdat box at offset {offset} has no preceding moof box")]
    UnexpectedPayload {
        /// mdat ボックスの位置
        offset: u64,
    },

    /// 入力の終端で、後続のフラグメントを持たない境界ボックスが残っていた
    #[error("stream ended with boundary boxes not followed by a fragment: {box_types:?}")]
    TrailingBoxes {
        /// 残っていたボックスの種別
        box_types: Vec<BoxType>,
    },

    /// コールバックがエラーを返した
    #[error("fragment callback failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// 失敗後のストリームを進めようとした
    #[error("stream cannot advance after a failure")]
    InvalidState,
}

impl StreamError {
    /// エラーの種別を返す
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Box(e) => e.kind,
            StreamError::Io(_) => ErrorKind::Io,
            StreamError::NotFragmented => ErrorKind::Unsupported,
            StreamError::MissingPayload { .. } | StreamError::UnexpectedPayload { .. } => {
                ErrorKind::StructuralMismatch
            }
            StreamError::TrailingBoxes { .. } => ErrorKind::InvalidData,
            StreamError::Callback(_) => ErrorKind::Other,
            StreamError::InvalidState => ErrorKind::InvalidInput,
        }
    }

    fn from_callback(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        // SampleAccessor のエラーが ? でそのまま返された場合は元のエラーに戻す
        match e.downcast::<StreamError>() {
            Ok(e) => *e,
            Err(e) => match e.downcast::<Error>() {
                Ok(e) => StreamError::from(*e),
                Err(e) => StreamError::Callback(e),
            },
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            StreamError::from(Error::from(e))
        } else {
            StreamError::Io(e)
        }
    }
}

impl From<Error> for StreamError {
    fn from(mut e: Error) -> Self {
        match e.io_error.take() {
            Some(io_error) => StreamError::Io(io_error),
            None => StreamError::Box(e),
        }
    }
}

/// [`FragmentStream`] の設定
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct StreamOptions {
    /// 処理済みのフラグメントを保持する数（0 の場合は無制限）
    ///
    /// 上限を超えた場合は古いものから破棄される
    pub sliding_window: usize,

    /// 一度にメモリ上に読み込むボックス（moov や moof など）のサイズの上限
    ///
    /// [`MAX_BOX_SIZE`] を超える値は [`MAX_BOX_SIZE`] に丸められる
    pub max_box_size: u64,

    /// フラグメント化された moov ボックスを必須とするかどうか
    pub require_init: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            sliding_window: 0,
            max_box_size: MAX_BOX_SIZE,
            require_init: true,
        }
    }
}

/// [`FragmentStream`] の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StreamState {
    Init,
    Streaming,
    Done,
    Failed,
}

/// トラックの情報
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackInfo {
    /// トラック ID
    pub track_id: u32,

    /// タイムスケール（一秒あたりの単位数）
    pub timescale: NonZeroU32,

    /// ハンドラー種別（`vide`、`soun` など）
    pub handler_type: [u8; 4],
}

impl TrackInfo {
    /// 映像トラックかどうか
    pub fn is_video(&self) -> bool {
        self.handler_type == *b"vide"
    }

    /// 音声トラックかどうか
    pub fn is_audio(&self) -> bool {
        self.handler_type == *b"soun"
    }
}

/// 初期化セグメント
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct InitSegment {
    /// ftyp ボックス
    pub ftyp_box: Option<FtypBox>,

    /// moov ボックス
    pub moov_box: Option<MoovBox>,

    /// トラック情報
    pub tracks: Vec<TrackInfo>,
}

impl InitSegment {
    fn from_moov(ftyp_box: Option<FtypBox>, moov_box: Option<MoovBox>) -> Self {
        let tracks = moov_box
            .iter()
            .flat_map(|moov| &moov.trak_boxes)
            .map(|trak| TrackInfo {
                track_id: trak.track_id(),
                timescale: trak.timescale(),
                handler_type: trak.handler_type(),
            })
            .collect();
        Self {
            ftyp_box,
            moov_box,
            tracks,
        }
    }

    /// 指定のトラックの情報を返す
    pub fn track(&self, track_id: u32) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }
}

/// サンプルデータの後処理（復号など）を行うためのトレイト
pub trait SampleTransform {
    /// 指定のトラックの senc ボックスの IV のバイト数（0, 8, 16 のいずれか）を返す
    fn iv_size(&self, track_id: u32) -> u8;

    /// サンプルのデータを変換する
    ///
    /// `subsamples` は senc ボックスに含まれるサブサンプル情報で、
    /// 存在しない場合は空となる（サンプル全体が対象）
    fn transform(
        &mut self,
        sample: &Sample,
        iv: &[u8],
        subsamples: &[SubsampleEntry],
        data: &mut [u8],
    ) -> std::result::Result<(), StreamError>;
}

/// フラグメントごとに呼び出されるコールバック
pub trait FragmentHandler {
    /// フラグメントの準備ができた際に呼び出される
    ///
    /// `samples` はこの呼び出しの間だけ有効で、mdat 内のサンプルデータを必要な分だけ読み込む
    fn on_fragment_ready(
        &mut self,
        fragment: &Fragment,
        samples: &mut SampleAccessor<'_>,
    ) -> HandlerResult;

    /// フラグメントの mdat ボックスを読み終えた後に呼び出される
    fn on_fragment_done(&mut self, fragment: &Fragment) -> HandlerResult {
        let _ = fragment;
        Ok(())
    }
}

impl<T: FragmentHandler + ?Sized> FragmentHandler for &mut T {
    fn on_fragment_ready(
        &mut self,
        fragment: &Fragment,
        samples: &mut SampleAccessor<'_>,
    ) -> HandlerResult {
        (**self).on_fragment_ready(fragment, samples)
    }

    fn on_fragment_done(&mut self, fragment: &Fragment) -> HandlerResult {
        (**self).on_fragment_done(fragment)
    }
}

/// クロージャを [`FragmentHandler`] として扱うためのラッパー
#[derive(Debug)]
pub struct FnHandler<F>(pub F);

impl<F> FragmentHandler for FnHandler<F>
where
    F: FnMut(&Fragment, &mut SampleAccessor<'_>) -> HandlerResult,
{
    fn on_fragment_ready(
        &mut self,
        fragment: &Fragment,
        samples: &mut SampleAccessor<'_>,
    ) -> HandlerResult {
        (self.0)(fragment, samples)
    }
}

trait PayloadSource {
    fn read_range(&mut self, start: u64, size: u64) -> Result<&[u8]>;
}

impl<R: Read> PayloadSource for StreamBuffer<R> {
    fn read_range(&mut self, start: u64, size: u64) -> Result<&[u8]> {
        StreamBuffer::read_range(self, start, size)
    }
}

/// 一つのフラグメントのサンプルデータを読み込むためのアクセサー
///
/// [`FragmentHandler::on_fragment_ready()`] の中でのみ利用可能
pub struct SampleAccessor<'a> {
    fragment: &'a Fragment,
    source: &'a mut dyn PayloadSource,
    transform: &'a mut Option<Box<dyn SampleTransform>>,
    senc_entries: BTreeMap<u32, Vec<SencEntry>>,
}

impl std::fmt::Debug for SampleAccessor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleAccessor")
            .field("sequence_number", &self.fragment.sequence_number)
            .field("payload", &self.fragment.payload)
            .finish_non_exhaustive()
    }
}

impl<'a> SampleAccessor<'a> {
    fn new(
        fragment: &'a Fragment,
        source: &'a mut dyn PayloadSource,
        transform: &'a mut Option<Box<dyn SampleTransform>>,
    ) -> Self {
        Self {
            fragment,
            source,
            transform,
            senc_entries: BTreeMap::new(),
        }
    }

    /// 対象のフラグメントを返す
    pub fn fragment(&self) -> &'a Fragment {
        self.fragment
    }

    fn track(&self, track_id: u32) -> Result<&'a crate::fragment::TrackFragment> {
        self.fragment.track(track_id).ok_or_else(|| {
            Error::out_of_bounds(format!(
                "Track {track_id} is not part of fragment {}",
                self.fragment.sequence_number
            ))
        })
    }

    /// データを読み込まずにサンプルの情報だけを返す
    pub fn info(&self, track_id: u32, sample_number: u32) -> Result<Sample> {
        self.track(track_id)?.sample(sample_number)
    }

    /// `sample_number` 番目（1 始まり）のサンプルをデータ付きで返す
    pub fn get(
        &mut self,
        track_id: u32,
        sample_number: u32,
    ) -> std::result::Result<Sample, StreamError> {
        let mut sample = self.info(track_id, sample_number)?;
        self.load(&mut sample)?;
        Ok(sample)
    }

    /// `[start, end]` の閉区間のサンプルをデータ付きで返す
    ///
    /// `end < start` の場合は空のリストが返される
    pub fn get_range(
        &mut self,
        track_id: u32,
        start: u32,
        end: u32,
    ) -> std::result::Result<Vec<Sample>, StreamError> {
        let track = self.track(track_id)?;
        if end < start {
            return Ok(Vec::new());
        }
        if start == 0 || end > track.sample_count() {
            return Err(Error::out_of_bounds(format!(
                "Sample range [{start}, {end}] is outside track {track_id} ({} samples)",
                track.sample_count()
            ))
            .into());
        }

        let mut samples = Vec::with_capacity((end - start + 1) as usize);
        for mut sample in track
            .samples()
            .skip(start as usize - 1)
            .take((end - start + 1) as usize)
        {
            self.load(&mut sample)?;
            samples.push(sample);
        }
        Ok(samples)
    }

    /// トラックの全てのサンプルをデータ付きで返す
    pub fn get_all(&mut self, track_id: u32) -> std::result::Result<Vec<Sample>, StreamError> {
        let count = self.track(track_id)?.sample_count();
        self.get_range(track_id, 1, count)
    }

    /// サンプルのデータを読み込む（変換が設定されている場合は適用後のデータとなる）
    pub fn read_data(&mut self, sample: &Sample) -> std::result::Result<Vec<u8>, StreamError> {
        let payload = self.fragment.payload;
        if !payload.contains(sample.offset, u64::from(sample.size)) {
            return Err(Error::out_of_bounds(format!(
                "Sample {} of track {} at [{}, {}) lies outside the mdat payload [{}, {})",
                sample.sample_number,
                sample.track_id,
                sample.offset,
                sample.offset + u64::from(sample.size),
                payload.start,
                payload.end()
            ))
            .with_offset(sample.offset)
            .into());
        }

        let mut data = self
            .source
            .read_range(sample.offset, u64::from(sample.size))?
            .to_vec();
        self.apply_transform(sample, &mut data)?;
        Ok(data)
    }

    fn load(&mut self, sample: &mut Sample) -> std::result::Result<(), StreamError> {
        sample.data = Some(self.read_data(sample)?);
        Ok(())
    }

    fn apply_transform(
        &mut self,
        sample: &Sample,
        data: &mut [u8],
    ) -> std::result::Result<(), StreamError> {
        let fragment = self.fragment;
        let Some(transform) = self.transform.as_mut() else {
            return Ok(());
        };

        let track = fragment.track(sample.track_id);
        let senc = track
            .and_then(|track| Some((track.traf.senc_box.as_ref()?, track.sample_count())));
        let entry = match senc {
            Some((senc, sample_count)) => {
                if !self.senc_entries.contains_key(&sample.track_id) {
                    let entries =
                        senc.entries(transform.iv_size(sample.track_id), sample_count)?;
                    self.senc_entries.insert(sample.track_id, entries);
                }
                self.senc_entries
                    .get(&sample.track_id)
                    .and_then(|entries| entries.get(sample.sample_number as usize - 1))
            }
            None => None,
        };
        let (iv, subsamples): (&[u8], &[SubsampleEntry]) = match entry {
            Some(e) => (&e.iv, &e.subsamples),
            None => (&[], &[]),
        };
        transform.transform(sample, iv, subsamples, data)
    }
}

/// fMP4 をフラグメント単位で処理するストリーム
pub struct FragmentStream<R> {
    buffer: StreamBuffer<R>,
    options: StreamOptions,
    state: StreamState,
    init: Option<InitSegment>,
    pending: Vec<RootBox>,
    retained: VecDeque<Fragment>,
    decode_times: BTreeMap<u32, u64>,
    transform: Option<Box<dyn SampleTransform>>,
}

impl<R> std::fmt::Debug for FragmentStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStream")
            .field("options", &self.options)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("retained", &self.retained.len())
            .finish_non_exhaustive()
    }
}

impl<R: Read> FragmentStream<R> {
    /// デフォルトの設定で [`FragmentStream`] インスタンスを生成する
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, StreamOptions::default())
    }

    /// 設定を指定して [`FragmentStream`] インスタンスを生成する
    pub fn with_options(reader: R, options: StreamOptions) -> Self {
        Self {
            buffer: StreamBuffer::new(reader).with_max_box_size(options.max_box_size),
            options,
            state: StreamState::Init,
            init: None,
            pending: Vec::new(),
            retained: VecDeque::new(),
            decode_times: BTreeMap::new(),
            transform: None,
        }
    }

    /// サンプルデータの変換処理を設定する
    pub fn set_sample_transform(&mut self, transform: Box<dyn SampleTransform>) {
        self.transform = Some(transform);
    }

    /// 現在の状態を返す
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// 設定を返す
    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// 読み込み済みの初期化セグメントを返す
    pub fn init_segment(&self) -> Option<&InitSegment> {
        self.init.as_ref()
    }

    /// 保持しているフラグメントを古い順に返す
    pub fn retained_fragments(&self) -> impl '_ + ExactSizeIterator<Item = &Fragment> {
        self.retained.iter()
    }

    /// 内部バッファの状態を返す
    pub fn buffer_info(&self) -> BufferInfo {
        self.buffer.buffer_info()
    }

    /// [`FragmentStream`] を破棄して内部の入力を返す
    pub fn into_inner(self) -> R {
        self.buffer.into_inner()
    }

    fn check_failure<T>(
        &mut self,
        result: std::result::Result<T, StreamError>,
    ) -> std::result::Result<T, StreamError> {
        if let Err(e) = &result {
            match e {
                StreamError::TrailingBoxes { .. } => self.state = StreamState::Done,
                _ => {
                    tracing::debug!(error = %e, "stream failed");
                    self.state = StreamState::Failed;
                }
            }
        }
        result
    }

    /// 初期化セグメントを読み込む
    ///
    /// 最初のフラグメントの境界ボックス（styp / sidx / emsg / prft / moof）の直前まで入力を読み進める。
    /// すでに読み込み済みの場合は、保持している内容をそのまま返す。
    pub fn read_init(&mut self) -> std::result::Result<&InitSegment, StreamError> {
        match self.state {
            StreamState::Failed => return Err(StreamError::InvalidState),
            StreamState::Init => {
                let result = self.initialize();
                self.check_failure(result)?;
            }
            StreamState::Streaming | StreamState::Done => {}
        }
        self.init.as_ref().ok_or(StreamError::InvalidState)
    }

    fn initialize(&mut self) -> std::result::Result<(), StreamError> {
        let mut ftyp_box = None;
        let mut moov_box = None;

        let reached_end = loop {
            let Some(peeked) = self.buffer.peek_header()? else {
                break true;
            };
            log_box(&peeked, "init");

            match peeked.box_type() {
                ty if is_boundary_box(ty) => break false,
                MdatBox::TYPE => {
                    return Err(StreamError::UnexpectedPayload {
                        offset: peeked.start,
                    });
                }
                FtypBox::TYPE | MoovBox::TYPE => match self.read_root_box(&peeked)? {
                    RootBox::Ftyp(b) => ftyp_box = Some(b),
                    RootBox::Moov(b) => moov_box = Some(b),
                    _ => {}
                },
                _ => self.skip_box(&peeked)?,
            }
        };

        let fragmented = moov_box.as_ref().is_some_and(MoovBox::is_fragmented);
        if self.options.require_init && !fragmented {
            return Err(StreamError::NotFragmented);
        }

        let init = InitSegment::from_moov(ftyp_box, moov_box);
        tracing::debug!(tracks = init.tracks.len(), fragmented, "init segment read");
        self.init = Some(init);
        self.state = if reached_end {
            StreamState::Done
        } else {
            StreamState::Streaming
        };
        Ok(())
    }

    fn read_root_box(&mut self, peeked: &PeekedBoxHeader) -> Result<RootBox> {
        let bytes = self.buffer.read_full_box(peeked.box_size())?;
        let (b, _) = RootBox::decode(bytes).map_err(|e| e.with_offset(peeked.start))?;
        Ok(b)
    }

    fn skip_box(&mut self, peeked: &PeekedBoxHeader) -> Result<()> {
        let ty = peeked.box_type();
        if ty == FreeBox::TYPE || ty == FreeBox::SKIP_TYPE {
            tracing::debug!(box_type = %ty, offset = peeked.start, "skipping free space");
        } else {
            tracing::warn!(box_type = %ty, offset = peeked.start, size = peeked.box_size(), "skipping unknown top-level box");
        }
        self.buffer.skip_to(peeked.end())?;
        self.buffer.reset_buffer();
        Ok(())
    }

    /// フラグメントを一つ処理する
    ///
    /// 処理したフラグメントを返す。入力の終端に達した場合は `Ok(None)` を返す。
    /// 初期化セグメントが未読み込みの場合は、先に [`FragmentStream::read_init()`] 相当の処理を行う。
    pub fn next_fragment<H: FragmentHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> std::result::Result<Option<&Fragment>, StreamError> {
        match self.state {
            StreamState::Failed => return Err(StreamError::InvalidState),
            StreamState::Done => return Ok(None),
            StreamState::Init => {
                self.read_init()?;
                if self.state == StreamState::Done {
                    return Ok(None);
                }
            }
            StreamState::Streaming => {}
        }

        let result = self.advance(handler);
        if self.check_failure(result)? {
            Ok(self.retained.back())
        } else {
            Ok(None)
        }
    }

    /// 入力の終端まで全てのフラグメントを処理する
    pub fn run<H: FragmentHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> std::result::Result<(), StreamError> {
        while self.next_fragment(handler)?.is_some() {}
        Ok(())
    }

    fn advance<H: FragmentHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> std::result::Result<bool, StreamError> {
        loop {
            let Some(peeked) = self.buffer.peek_header()? else {
                self.state = StreamState::Done;
                if self.pending.is_empty() {
                    tracing::debug!(position = self.buffer.position(), "end of stream");
                    return Ok(false);
                }
                let box_types = self
                    .pending
                    .drain(..)
                    .map(|b| b.box_type())
                    .collect::<Vec<_>>();
                tracing::warn!(?box_types, "trailing boundary boxes at end of stream");
                return Err(StreamError::TrailingBoxes { box_types });
            };
            log_box(&peeked, "streaming");

            match peeked.box_type() {
                MoofBox::TYPE => {
                    self.process_fragment(&peeked, handler)?;
                    return Ok(true);
                }
                MdatBox::TYPE => {
                    return Err(StreamError::UnexpectedPayload {
                        offset: peeked.start,
                    });
                }
                ty if is_boundary_box(ty) => {
                    let b = self.read_root_box(&peeked)?;
                    self.buffer.reset_buffer();
                    self.pending.push(b);
                }
                _ => self.skip_box(&peeked)?,
            }
        }
    }

    fn process_fragment<H: FragmentHandler + ?Sized>(
        &mut self,
        moof_header: &PeekedBoxHeader,
        handler: &mut H,
    ) -> std::result::Result<(), StreamError> {
        let bytes = self.buffer.read_full_box(moof_header.box_size())?;
        let (moof, _) = MoofBox::decode(bytes).map_err(|e| e.with_offset(moof_header.start))?;

        let mdat_header = match self.buffer.peek_header()? {
            Some(h) if h.box_type() == MdatBox::TYPE => h,
            _ => {
                return Err(StreamError::MissingPayload {
                    offset: moof_header.end(),
                });
            }
        };
        let payload = PayloadRegion {
            start: mdat_header.payload_start(),
            size: mdat_header.payload_size(),
        };
        self.buffer.set_window(payload.start, payload.size)?;

        let mvex = self
            .init
            .as_ref()
            .and_then(|init| init.moov_box.as_ref())
            .and_then(|moov| moov.mvex_box.as_ref());
        let mut fragment = Fragment::new(
            moof,
            moof_header.start,
            moof_header.box_size(),
            payload,
            mvex,
            &mut self.decode_times,
        )?;
        fragment.boundary_boxes = std::mem::take(&mut self.pending);
        tracing::info!(
            sequence_number = fragment.sequence_number,
            payload_size = payload.size,
            tracks = fragment.tracks.len(),
            samples = fragment.sample_count(),
            "fragment ready"
        );

        {
            let mut accessor =
                SampleAccessor::new(&fragment, &mut self.buffer, &mut self.transform);
            handler
                .on_fragment_ready(&fragment, &mut accessor)
                .map_err(StreamError::from_callback)?;
        }

        self.buffer.skip_to(payload.end())?;
        self.buffer.reset_buffer();
        handler
            .on_fragment_done(&fragment)
            .map_err(StreamError::from_callback)?;

        self.retained.push_back(fragment);
        if self.options.sliding_window > 0 {
            while self.retained.len() > self.options.sliding_window {
                if let Some(evicted) = self.retained.pop_front() {
                    tracing::trace!(
                        sequence_number = evicted.sequence_number,
                        "fragment evicted"
                    );
                }
            }
        }
        Ok(())
    }
}

fn is_boundary_box(ty: BoxType) -> bool {
    [
        StypBox::TYPE,
        SidxBox::TYPE,
        EmsgBox::TYPE,
        PrftBox::TYPE,
        MoofBox::TYPE,
    ]
    .contains(&ty)
}

fn log_box(peeked: &PeekedBoxHeader, phase: &'static str) {
    tracing::debug!(
        phase,
        box_type = %peeked.box_type(),
        offset = peeked.start,
        size = peeked.box_size(),
        "top-level box"
    );
}

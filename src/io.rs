//! 前方向にしか読めない入力の上に、範囲を限定した巻き戻しとボックス単位のバッファリングを提供するモジュール
//!
//! [`StreamBuffer`] は一つの伸縮可能なバッファを使い回しながら、以下を実現する:
//! - 次のボックスのヘッダーを消費せずに覗き見る ([`StreamBuffer::peek_header()`])
//! - ボックス全体をメモリ上に読み込む ([`StreamBuffer::read_full_box()`])
//! - 巨大な mdat ペイロードに対してウィンドウを設定し、必要な部分だけを読み込む ([`StreamBuffer::set_window()`])
//!
//! 返されるバイト列の参照は、次にバッファを変更する呼び出しまでしか有効ではない。
use std::io::{Read, Seek, SeekFrom};

use crate::{BoxHeader, BoxType, Decode, Error, Result};

/// 一度にメモリ上に読み込めるボックスのサイズの上限（2 GiB）
pub const MAX_BOX_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// [`StreamBuffer::peek_header()`] が返すヘッダー情報
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeekedBoxHeader {
    /// デコードされたヘッダー
    pub header: BoxHeader,

    /// ストリーム先頭からのボックスの開始位置
    pub start: u64,
}

impl PeekedBoxHeader {
    /// ボックス種別
    pub fn box_type(&self) -> BoxType {
        self.header.box_type
    }

    /// ヘッダーを含むボックス全体のサイズ
    pub fn box_size(&self) -> u64 {
        self.header.box_size.get()
    }

    /// ヘッダー部分のバイト数
    pub fn header_len(&self) -> u64 {
        self.header.external_size() as u64
    }

    /// ペイロードの開始位置
    pub fn payload_start(&self) -> u64 {
        self.start + self.header_len()
    }

    /// ペイロードのサイズ
    pub fn payload_size(&self) -> u64 {
        self.header.payload_size()
    }

    /// ボックスの終端位置（この位置は含まない）
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.box_size())
    }
}

/// [`StreamBuffer`] の内部状態のスナップショット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferInfo {
    /// バッファ先頭のストリーム内での位置
    pub buffer_start: u64,

    /// 現在の読み込み位置
    pub position: u64,

    /// バッファ内に保持しているバイト数
    pub buffer_len: usize,

    /// バッファに確保済みの容量
    pub capacity: usize,

    /// ウィンドウの開始位置（ウィンドウ未設定の場合は `None`）
    pub window_start: Option<u64>,

    /// ウィンドウのサイズ（ウィンドウ未設定の場合は `None`）
    pub window_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: u64,
    size: u64,
}

impl Window {
    fn end(self) -> u64 {
        self.start.saturating_add(self.size)
    }
}

/// 前方向にしか読めない入力 `R` の上に、限定的なシーク機能を提供するバッファ
///
/// 不変条件: `buffer_start <= position <= buffer_start + buffer.len()`
#[derive(Debug)]
pub struct StreamBuffer<R> {
    reader: R,
    buffer: Vec<u8>,
    buffer_start: u64,
    position: u64,
    window: Option<Window>,
    max_box_size: u64,
}

impl<R: Read> StreamBuffer<R> {
    /// 入力を受け取って [`StreamBuffer`] インスタンスを生成する
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            buffer_start: 0,
            position: 0,
            window: None,
            max_box_size: MAX_BOX_SIZE,
        }
    }

    /// [`StreamBuffer::read_full_box()`] で扱えるボックスサイズの上限を設定する
    ///
    /// [`MAX_BOX_SIZE`] を超える値は [`MAX_BOX_SIZE`] に丸められる
    pub fn with_max_box_size(mut self, max_box_size: u64) -> Self {
        self.max_box_size = max_box_size.min(MAX_BOX_SIZE);
        self
    }

    /// 現在の読み込み位置を返す
    pub fn position(&self) -> u64 {
        self.position
    }

    /// 内部状態のスナップショットを返す
    pub fn buffer_info(&self) -> BufferInfo {
        BufferInfo {
            buffer_start: self.buffer_start,
            position: self.position,
            buffer_len: self.buffer.len(),
            capacity: self.buffer.capacity(),
            window_start: self.window.map(|w| w.start),
            window_size: self.window.map(|w| w.size),
        }
    }

    /// 内部の入力への参照を返す
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// [`StreamBuffer`] を破棄して内部の入力を返す
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn buffered_end(&self) -> u64 {
        self.buffer_start + self.buffer.len() as u64
    }

    fn relative(&self, pos: u64) -> usize {
        (pos - self.buffer_start) as usize
    }

    /// 入力からデータを読み込み、バッファの終端を `end` まで伸ばす
    ///
    /// 入力が途中で終端に達した場合はそこで止まる
    fn fill_to(&mut self, end: u64) -> Result<()> {
        let buffered_end = self.buffered_end();
        if end <= buffered_end {
            return Ok(());
        }
        let additional = usize::try_from(end - buffered_end)
            .map_err(|_| Error::out_of_bounds(format!("Cannot buffer up to position {end}")))?;

        let old_len = self.buffer.len();
        let old_capacity = self.buffer.capacity();
        self.buffer.resize(old_len + additional, 0);

        let mut filled = old_len;
        while filled < self.buffer.len() {
            match self.reader.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buffer.truncate(filled);
                    return Err(Error::from(e).with_offset(self.buffered_end()));
                }
            }
        }
        self.buffer.truncate(filled);

        if self.buffer.capacity() != old_capacity {
            tracing::trace!(
                capacity = self.buffer.capacity(),
                buffer_start = self.buffer_start,
                "buffer grown"
            );
        }
        Ok(())
    }

    /// 現在位置より前のデータをバッファから取り除く
    fn discard_consumed(&mut self) {
        let consumed = self.relative(self.position);
        if consumed > 0 {
            self.buffer.drain(..consumed);
            self.buffer_start = self.position;
        }
    }

    /// 現在位置にあるボックスのヘッダーを、位置を進めずに読み込む
    ///
    /// ボックスの境界で入力が終端に達している場合には `Ok(None)` が返される。
    /// ヘッダーの途中で終端に達した場合は [`ErrorKind::MalformedHeader`](crate::ErrorKind::MalformedHeader) エラーとなる。
    ///
    /// ボディを消費せずに繰り返し呼び出した場合には、常に同じ結果が返される。
    pub fn peek_header(&mut self) -> Result<Option<PeekedBoxHeader>> {
        let start = self.position;
        if self.window.is_none() {
            self.discard_consumed();
        }

        self.fill_to(start + BoxHeader::MIN_SIZE as u64)?;
        let available = self.buffered_end() - start;
        if available == 0 {
            return Ok(None);
        }

        // largesize と usertype の有無で必要なバイト数が変わる
        let rel = self.relative(start);
        if available >= BoxHeader::MIN_SIZE as u64 {
            let head = &self.buffer[rel..rel + BoxHeader::MIN_SIZE];
            let mut needed = BoxHeader::MIN_SIZE as u64;
            if head[..4] == [0, 0, 0, 1] {
                needed += 8;
            }
            if head[4..8] == *b"uuid" {
                needed += 16;
            }
            self.fill_to(start + needed)?;
        }

        let rel = self.relative(start);
        let (header, _) = BoxHeader::decode(&self.buffer[rel..]).map_err(|e| e.with_offset(start))?;
        Ok(Some(PeekedBoxHeader { header, start }))
    }

    /// 現在位置から `size` バイトのボックス全体を読み込み、その参照を返す
    ///
    /// 読み込み位置はボックスの終端に進む。
    /// 返された参照は、次にバッファを変更する呼び出しまで有効。
    pub fn read_full_box(&mut self, size: u64) -> Result<&[u8]> {
        let start = self.position;
        if size > self.max_box_size {
            return Err(Error::invalid_data(format!(
                "Box size {size} exceeds the limit of {} bytes",
                self.max_box_size
            ))
            .with_offset(start));
        }
        if size < BoxHeader::MIN_SIZE as u64 {
            return Err(Error::malformed_header(format!(
                "Box size {size} is smaller than the minimum header size"
            ))
            .with_offset(start));
        }
        if let Some(w) = self.window
            && start + size > w.end()
        {
            return Err(Error::out_of_bounds(format!(
                "Box at {start} with size {size} crosses the window end {}",
                w.end()
            ))
            .with_offset(start));
        }

        let end = start + size;
        self.fill_to(end)?;
        if self.buffered_end() < end {
            return Err(Error::invalid_data(format!(
                "Unexpected end of stream: box needs {size} bytes, only {} available",
                self.buffered_end() - start
            ))
            .with_offset(start));
        }

        self.position = end;
        let rel = self.relative(start);
        Ok(&self.buffer[rel..rel + size as usize])
    }

    /// 範囲 `[start, start + size)` にウィンドウを設定する
    ///
    /// バッファ内の `start` より前のデータは破棄され、読み込み位置は `start` に移動する。
    /// 以降の読み込みやシークはウィンドウ内に制限され、ウィンドウの終端を超えた読み込みは 0 バイトを返す。
    pub fn set_window(&mut self, start: u64, size: u64) -> Result<()> {
        self.window = None;
        self.seek_to(start)?;
        self.discard_consumed();
        self.window = Some(Window { start, size });
        tracing::trace!(start, size, "payload window set");
        Ok(())
    }

    /// ウィンドウを解除する
    pub fn clear_window(&mut self) {
        self.window = None;
    }

    /// 絶対位置 `target` にシークする
    ///
    /// バッファの先頭より前へのシークは [`ErrorKind::OutOfBounds`](crate::ErrorKind::OutOfBounds) エラーとなる。
    /// バッファの終端より後ろへのシークは、その間のデータをバッファに読み込む。
    pub fn seek_to(&mut self, target: u64) -> Result<u64> {
        if let Some(w) = self.window
            && (target < w.start || target > w.end())
        {
            return Err(Error::out_of_bounds(format!(
                "Seek target {target} is outside the window [{}, {})",
                w.start,
                w.end()
            ))
            .with_offset(target));
        }
        if target < self.buffer_start {
            return Err(Error::out_of_bounds(format!(
                "Seek target {target} is before the buffer start {}",
                self.buffer_start
            ))
            .with_offset(target));
        }

        self.fill_to(target)?;
        if self.buffered_end() < target {
            return Err(Error::out_of_bounds(format!(
                "Seek target {target} is beyond the end of stream {}",
                self.buffered_end()
            ))
            .with_offset(target));
        }
        if target != self.position {
            tracing::trace!(from = self.position, to = target, "seek");
        }
        self.position = target;
        Ok(target)
    }

    /// ウィンドウの先頭からの相対位置 `offset` にシークする
    pub fn seek_in_window(&mut self, offset: u64) -> Result<u64> {
        let Some(w) = self.window else {
            return Err(Error::invalid_input("No window is set"));
        };
        self.seek_to(w.start.saturating_add(offset))
    }

    /// 絶対位置 `end` まで読み飛ばす
    ///
    /// ウィンドウは解除される。
    /// バッファに存在しない部分はバッファに載せずに破棄するため、巨大な mdat の残りを読み飛ばす際にもメモリは増えない。
    pub fn skip_to(&mut self, end: u64) -> Result<()> {
        self.window = None;
        if end <= self.buffered_end() {
            self.seek_to(end)?;
            return Ok(());
        }

        let remaining = end - self.buffered_end();
        let skipped = std::io::copy(
            &mut (&mut self.reader).take(remaining),
            &mut std::io::sink(),
        )
        .map_err(|e| Error::from(e).with_offset(self.buffered_end()))?;
        if skipped < remaining {
            return Err(Error::invalid_data(format!(
                "Unexpected end of stream while skipping to {end}"
            ))
            .with_offset(self.buffered_end() + skipped));
        }

        tracing::trace!(from = self.position, to = end, "skipped");
        self.buffer.clear();
        self.buffer_start = end;
        self.position = end;
        Ok(())
    }

    /// バッファの中身とウィンドウを破棄する（確保済みの容量は維持される）
    pub fn reset_buffer(&mut self) {
        self.buffer.clear();
        self.buffer_start = self.position;
        self.window = None;
    }

    /// ウィンドウ内の位置 `[start, start + size)` のバイト列を読み込み、その参照を返す
    pub fn read_range(&mut self, start: u64, size: u64) -> Result<&[u8]> {
        let end = start
            .checked_add(size)
            .ok_or_else(|| Error::out_of_bounds("Range overflows"))?;
        if let Some(w) = self.window
            && (start < w.start || end > w.end())
        {
            return Err(Error::out_of_bounds(format!(
                "Range [{start}, {end}) is outside the window [{}, {})",
                w.start,
                w.end()
            ))
            .with_offset(start));
        }
        self.seek_to(start)?;
        self.fill_to(end)?;
        if self.buffered_end() < end {
            return Err(Error::invalid_data(format!(
                "Unexpected end of stream: range [{start}, {end}) is not available"
            ))
            .with_offset(self.buffered_end()));
        }
        self.position = end;
        let rel = self.relative(start);
        Ok(&self.buffer[rel..rel + size as usize])
    }
}

impl<R: Read> Read for StreamBuffer<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let limit = self.window.map_or(u64::MAX, |w| w.end());
        if self.position >= limit || buf.is_empty() {
            return Ok(0);
        }

        let want = (buf.len() as u64).min(limit - self.position);
        let end = self.position + want;
        if end > self.buffered_end() {
            self.fill_to(end)?;
        }

        let n = (self.buffered_end() - self.position).min(want) as usize;
        let rel = self.relative(self.position);
        buf[..n].copy_from_slice(&self.buffer[rel..rel + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read> Seek for StreamBuffer<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(delta) => self
                .position
                .checked_add_signed(delta)
                .ok_or_else(|| Error::out_of_bounds("Seek position overflows"))?,
            SeekFrom::End(_) => {
                return Err(
                    Error::unsupported("Seeking from the end of a forward-only stream").into(),
                );
            }
        };
        Ok(self.seek_to(target)?)
    }

    fn stream_position(&mut self) -> std::io::Result<u64> {
        Ok(self.position)
    }
}

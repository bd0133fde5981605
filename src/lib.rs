//! 前方向にしか読めない入力から Fragmented MP4 (fMP4) をストリーミング処理するためのライブラリ
//!
//! - [`boxes`]: MP4 のボックスのエンコードおよびデコード
//! - [`io`]: 前方向専用の入力の上で、ヘッダーの先読みや範囲を限定したシークを提供するバッファ
//! - [`sample_table`]: サンプルテーブルからサンプルのチャンクや時刻を求める関数群
//! - [`fragment`]: moof ボックスからサンプルのバイト位置とデコード時刻を求める処理
//! - [`stream`]: 初期化セグメントとフラグメントを順に処理し、コールバックを呼び出すパイプライン
#![warn(missing_docs)]

mod auxiliary;
mod basic_types;
pub mod boxes;
mod boxes_fmp4;
mod boxes_moov_tree;
mod codec;
pub mod fragment;
pub mod io;
pub mod sample_table;
pub mod stream;

pub use basic_types::{
    BaseBox, BoxHeader, BoxSize, BoxType, Either, FixedPointNumber, FullBox, FullBoxFlags,
    FullBoxHeader, Mp4FileTime, SampleFlags, Utf8String,
};
pub use boxes::Mp4File;
pub use codec::{Decode, Encode, Error, ErrorKind, Result};
pub use fragment::{Fragment, Sample};
pub use stream::{
    FnHandler, FragmentHandler, FragmentStream, InitSegment, SampleAccessor, StreamError,
    StreamOptions, StreamState,
};

// [NOTE]
// Windows 環境では aux.rs というファイル名が予約語で、リポジトリに含まれていると git clone に失敗するため、
// ファイル名自体は auxiliary.rs にして lib.rs の中で aux モジュール以下に再エクスポートしている。
pub mod aux {
    //! MP4 の仕様とは直接は関係がない、実装上便利な補助的なコンポーネントを集めたモジュール

    pub use crate::auxiliary::{SampleTableAccessor, Samples};
}

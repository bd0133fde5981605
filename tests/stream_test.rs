use std::{
    io::{Cursor, Read},
    num::NonZeroU32,
};

use shiguredo_fmp4_stream::{
    BoxSize, BoxType, Either, Encode, Error, ErrorKind, FixedPointNumber, FragmentHandler,
    FragmentStream, FullBoxFlags, Mp4FileTime, SampleAccessor, SampleFlags, StreamError,
    StreamOptions, StreamState, Utf8String,
    boxes::{
        Brand, EmsgBox, FreeBox, FtypBox, HdlrBox, MdatBox, MdhdBox, MdiaBox, MfhdBox, MinfBox,
        MoofBox, MoovBox, MvexBox, MvhdBox, RootBox, SencBox, StblBox, StcoBox, StscBox, StsdBox,
        StszBox, SttsBox, StypBox, SubsampleEntry, TfdtBox, TfhdBox, TkhdBox, TrafBox, TrakBox,
        TrexBox, TrunBox, TrunSample, UnknownBox,
    },
    fragment::{Fragment, Sample},
    stream::{HandlerResult, SampleTransform},
};

const TRACK_ID: u32 = 1;
const DEFAULT_DURATION: u32 = 1000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 一度に数バイトずつしか返さない前方向専用の入力
struct Trickle {
    inner: Cursor<Vec<u8>>,
}

impl Trickle {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(bytes),
        }
    }
}

impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(7);
        self.inner.read(&mut buf[..n])
    }
}

fn nz(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).expect("non-zero")
}

fn encode<B: Encode>(b: &B) -> Vec<u8> {
    b.encode_to_vec().expect("encode")
}

fn ftyp() -> FtypBox {
    FtypBox {
        major_brand: Brand::ISO6,
        minor_version: 0,
        compatible_brands: vec![Brand::ISOM, Brand::ISO6],
    }
}

fn moov(fragmented: bool) -> MoovBox {
    MoovBox {
        mvhd_box: MvhdBox {
            version: 0,
            creation_time: Mp4FileTime::default(),
            modification_time: Mp4FileTime::default(),
            timescale: nz(1000),
            duration: 0,
            rate: MvhdBox::DEFAULT_RATE,
            volume: MvhdBox::DEFAULT_VOLUME,
            matrix: MvhdBox::DEFAULT_MATRIX,
            next_track_id: TRACK_ID + 1,
        },
        trak_boxes: vec![TrakBox {
            tkhd_box: TkhdBox {
                version: 0,
                flags: FullBoxFlags::new(
                    TkhdBox::FLAG_TRACK_ENABLED | TkhdBox::FLAG_TRACK_IN_MOVIE,
                ),
                creation_time: Mp4FileTime::default(),
                modification_time: Mp4FileTime::default(),
                track_id: TRACK_ID,
                duration: 0,
                layer: 0,
                alternate_group: 0,
                volume: FixedPointNumber::new(0, 0),
                matrix: TkhdBox::DEFAULT_MATRIX,
                width: FixedPointNumber::new(320, 0),
                height: FixedPointNumber::new(240, 0),
            },
            mdia_box: MdiaBox {
                mdhd_box: MdhdBox {
                    version: 0,
                    creation_time: Mp4FileTime::default(),
                    modification_time: Mp4FileTime::default(),
                    timescale: nz(90000),
                    duration: 0,
                    language: MdhdBox::LANGUAGE_UNDEFINED,
                },
                hdlr_box: HdlrBox {
                    handler_type: HdlrBox::HANDLER_TYPE_VIDE,
                    name: b"video\0".to_vec(),
                },
                minf_box: MinfBox {
                    stbl_box: StblBox {
                        stsd_box: StsdBox {
                            entries: Vec::new(),
                        },
                        stts_box: SttsBox {
                            entries: Vec::new(),
                        },
                        ctts_box: None,
                        stsc_box: StscBox {
                            entries: Vec::new(),
                        },
                        stsz_box: StszBox::Variable {
                            entry_sizes: Vec::new(),
                        },
                        stco_or_co64_box: Either::A(StcoBox {
                            chunk_offsets: Vec::new(),
                        }),
                        stss_box: None,
                        unknown_boxes: Vec::new(),
                    },
                    unknown_boxes: Vec::new(),
                },
                unknown_boxes: Vec::new(),
            },
            unknown_boxes: Vec::new(),
        }],
        mvex_box: fragmented.then(|| MvexBox {
            mehd_box: None,
            trex_boxes: vec![TrexBox {
                track_id: TRACK_ID,
                default_sample_description_index: 1,
                default_sample_duration: DEFAULT_DURATION,
                default_sample_size: 0,
                default_sample_flags: SampleFlags::non_sync_sample(),
            }],
            unknown_boxes: Vec::new(),
        }),
        unknown_boxes: Vec::new(),
    }
}

fn init_segment() -> Vec<u8> {
    let mut bytes = encode(&ftyp());
    bytes.extend(encode(&moov(true)));
    bytes
}

/// サンプルのデータを持つフラグメントの構成
struct FragmentFixture {
    sequence_number: u32,
    decode_time: Option<u64>,
    samples: Vec<Vec<u8>>,
    senc: Option<SencBox>,
}

impl FragmentFixture {
    fn new(sequence_number: u32, decode_time: Option<u64>, sample_sizes: &[usize]) -> Self {
        let samples = sample_sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| vec![(sequence_number as u8) << 4 | i as u8; size])
            .collect();
        Self {
            sequence_number,
            decode_time,
            samples,
            senc: None,
        }
    }

    fn moof(&self, data_offset: i32) -> MoofBox {
        let samples = self
            .samples
            .iter()
            .map(|s| TrunSample {
                size: Some(s.len() as u32),
                ..Default::default()
            })
            .collect();
        MoofBox {
            mfhd_box: MfhdBox {
                sequence_number: self.sequence_number,
            },
            traf_boxes: vec![TrafBox {
                tfhd_box: TfhdBox {
                    track_id: TRACK_ID,
                    base_data_offset: None,
                    sample_description_index: None,
                    default_sample_duration: None,
                    default_sample_size: None,
                    default_sample_flags: None,
                    duration_is_empty: false,
                    default_base_is_moof: true,
                },
                tfdt_box: self.decode_time.map(|t| TfdtBox {
                    version: 1,
                    base_media_decode_time: t,
                }),
                trun_boxes: vec![TrunBox {
                    version: 0,
                    data_offset: Some(data_offset),
                    first_sample_flags: Some(SampleFlags::sync_sample()),
                    samples,
                }],
                senc_box: self.senc.clone(),
                unknown_boxes: Vec::new(),
            }],
            unknown_boxes: Vec::new(),
        }
    }

    /// moof と mdat を連結したバイト列を返す
    fn encode(&self) -> Vec<u8> {
        // data_offset の値によって moof のサイズは変わらない
        let moof_size = encode(&self.moof(0)).len();
        let mut bytes = encode(&self.moof(moof_size as i32 + 8));
        bytes.extend(encode(&MdatBox {
            is_large_size: false,
            payload: self.samples.concat(),
        }));
        bytes
    }
}

fn styp() -> Vec<u8> {
    encode(&StypBox {
        major_brand: Brand::MSDH,
        minor_version: 0,
        compatible_brands: vec![Brand::MSDH, Brand::MSIX],
    })
}

fn emsg() -> Vec<u8> {
    encode(&EmsgBox {
        version: 1,
        scheme_id_uri: Utf8String::new("urn:example:event").expect("string"),
        value: Utf8String::new("1").expect("string"),
        timescale: 1000,
        presentation_time: 3000,
        event_duration: 500,
        id: 7,
        message_data: b"hello".to_vec(),
    })
}

fn free() -> Vec<u8> {
    encode(&FreeBox {
        box_type: FreeBox::TYPE,
        payload: vec![0; 16],
    })
}

fn unknown() -> Vec<u8> {
    let box_type = BoxType::Normal(*b"abcd");
    encode(&UnknownBox {
        box_type,
        box_size: BoxSize::with_payload_size(box_type, 4),
        payload: vec![1, 2, 3, 4],
    })
}

#[derive(Debug, Default)]
struct Collector {
    ready: Vec<(u32, u64, Vec<Sample>)>,
    done: Vec<u32>,
}

impl FragmentHandler for Collector {
    fn on_fragment_ready(
        &mut self,
        fragment: &Fragment,
        samples: &mut SampleAccessor<'_>,
    ) -> HandlerResult {
        let mut collected = Vec::new();
        for track in &fragment.tracks {
            collected.extend(samples.get_all(track.track_id)?);
        }
        self.ready
            .push((fragment.sequence_number, fragment.payload.size, collected));
        Ok(())
    }

    fn on_fragment_done(&mut self, fragment: &Fragment) -> HandlerResult {
        self.done.push(fragment.sequence_number);
        Ok(())
    }
}

#[test]
fn fragments_are_delivered_in_order() {
    init_tracing();
    let a = FragmentFixture::new(1, Some(0), &[5, 3, 8]);
    let b = FragmentFixture::new(2, None, &[4, 4]);

    let mut input = init_segment();
    input.extend(a.encode());
    input.extend(b.encode());

    let mut stream = FragmentStream::new(Trickle::new(input));
    let init = stream.read_init().expect("init");
    assert!(init.ftyp_box.is_some());
    assert_eq!(init.tracks.len(), 1);
    assert!(init.track(TRACK_ID).expect("track").is_video());
    assert_eq!(stream.state(), StreamState::Streaming);

    let mut collector = Collector::default();
    stream.run(&mut collector).expect("run");
    assert_eq!(stream.state(), StreamState::Done);
    assert_eq!(collector.done, [1, 2]);
    assert_eq!(collector.ready.len(), 2);

    let (seq, payload_size, samples) = &collector.ready[0];
    assert_eq!((*seq, *payload_size), (1, 16));
    assert_eq!(samples.len(), 3);
    for (sample, expected) in samples.iter().zip(&a.samples) {
        assert_eq!(sample.data.as_ref(), Some(expected));
    }
    assert!(samples[0].is_sync);
    assert!(!samples[1].is_sync);
    assert_eq!(
        samples.iter().map(|s| s.decode_time).collect::<Vec<_>>(),
        [0, 1000, 2000]
    );

    // tfdt のない二つ目のフラグメントは一つ目の終端時刻から継続する
    let (seq, payload_size, samples) = &collector.ready[1];
    assert_eq!((*seq, *payload_size), (2, 8));
    assert_eq!(samples[0].decode_time, 3000);
    assert_eq!(samples[1].decode_time, 4000);
    assert_eq!(samples[1].data.as_ref(), Some(&b.samples[1]));

    let retained: Vec<_> = stream.retained_fragments().collect();
    assert_eq!(retained.len(), 2);
    assert!(retained[0].tracks[0].has_explicit_decode_time);
    assert!(!retained[1].tracks[0].has_explicit_decode_time);
    assert_eq!(retained[1].tracks[0].base_decode_time, 3000);

    // 終端に達した後は何も返さない
    assert!(stream.next_fragment(&mut collector).expect("next").is_none());
}

#[test]
fn next_fragment_returns_processed_fragment() {
    let mut input = init_segment();
    let init_len = input.len() as u64;
    input.extend(FragmentFixture::new(9, Some(90), &[2]).encode());

    let mut stream = FragmentStream::new(Trickle::new(input));
    let mut collector = Collector::default();
    let fragment = stream
        .next_fragment(&mut collector)
        .expect("next")
        .expect("fragment");
    assert_eq!(fragment.sequence_number, 9);
    assert_eq!(fragment.moof_offset, init_len);
    assert_eq!(fragment.payload.start, init_len + fragment.moof_size + 8);
    assert_eq!(fragment.tracks[0].end_decode_time(), 90 + 1000);
    assert!(stream.next_fragment(&mut collector).expect("next").is_none());
    assert_eq!(stream.state(), StreamState::Done);
}

#[test]
fn missing_payload_fails_the_stream() {
    let mut input = init_segment();
    let a = FragmentFixture::new(1, Some(0), &[4]).encode();
    let moof_end = (input.len() + a.len() - (8 + 4)) as u64;
    input.extend(&a[..a.len() - (8 + 4)]);

    let mut stream = FragmentStream::new(Trickle::new(input));
    let err = stream
        .run(&mut Collector::default())
        .expect_err("must fail");
    assert!(matches!(err, StreamError::MissingPayload { offset } if offset == moof_end));
    assert_eq!(err.kind(), ErrorKind::StructuralMismatch);
    assert_eq!(stream.state(), StreamState::Failed);
    assert!(matches!(
        stream.next_fragment(&mut Collector::default()),
        Err(StreamError::InvalidState)
    ));
}

#[test]
fn payload_without_fragment_is_rejected() {
    let mut input = init_segment();
    input.extend(FragmentFixture::new(1, Some(0), &[4]).encode());
    let orphan_offset = input.len() as u64;
    input.extend(encode(&MdatBox {
        is_large_size: false,
        payload: vec![0; 4],
    }));

    let mut stream = FragmentStream::new(Trickle::new(input));
    let mut collector = Collector::default();
    let err = stream.run(&mut collector).expect_err("must fail");
    assert!(matches!(err, StreamError::UnexpectedPayload { offset } if offset == orphan_offset));
    assert_eq!(collector.ready.len(), 1);
    assert_eq!(stream.state(), StreamState::Failed);
}

#[test]
fn payload_inside_init_segment_is_rejected() {
    let mut input = init_segment();
    let offset = input.len() as u64;
    input.extend(encode(&MdatBox {
        is_large_size: false,
        payload: vec![0; 4],
    }));

    let mut stream = FragmentStream::new(Trickle::new(input));
    assert!(matches!(
        stream.read_init(),
        Err(StreamError::UnexpectedPayload { offset: o }) if o == offset
    ));
}

#[test]
fn trailing_boundary_boxes_end_the_stream() {
    let mut input = init_segment();
    input.extend(FragmentFixture::new(1, Some(0), &[4]).encode());
    input.extend(styp());
    input.extend(emsg());

    let mut stream = FragmentStream::new(Trickle::new(input));
    let err = stream
        .run(&mut Collector::default())
        .expect_err("must fail");
    let StreamError::TrailingBoxes { box_types } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(box_types, &[StypBox::TYPE, EmsgBox::TYPE]);
    assert_eq!(err.kind(), ErrorKind::InvalidData);

    // 処理済みのフラグメントは失われない
    assert_eq!(stream.state(), StreamState::Done);
    assert_eq!(stream.retained_fragments().len(), 1);
    assert!(stream.next_fragment(&mut Collector::default()).expect("next").is_none());
}

#[test]
fn boundary_boxes_are_attached_to_the_next_fragment() {
    let mut input = init_segment();
    input.extend(styp());
    input.extend(emsg());
    input.extend(FragmentFixture::new(1, Some(0), &[4]).encode());
    input.extend(FragmentFixture::new(2, None, &[4]).encode());

    let mut stream = FragmentStream::new(Trickle::new(input));
    stream.run(&mut Collector::default()).expect("run");

    let fragments: Vec<_> = stream.retained_fragments().collect();
    let types: Vec<_> = fragments[0]
        .boundary_boxes
        .iter()
        .map(|b| match b {
            RootBox::Styp(_) => "styp",
            RootBox::Emsg(e) if e.id == 7 => "emsg",
            _ => "other",
        })
        .collect();
    assert_eq!(types, ["styp", "emsg"]);
    assert!(fragments[1].boundary_boxes.is_empty());
}

#[test]
fn unknown_top_level_boxes_are_skipped() {
    init_tracing();
    let mut input = encode(&ftyp());
    input.extend(free());
    input.extend(encode(&moov(true)));
    input.extend(unknown());
    input.extend(FragmentFixture::new(1, Some(0), &[3, 3]).encode());
    input.extend(free());
    input.extend(unknown());
    input.extend(FragmentFixture::new(2, None, &[6]).encode());

    let mut stream = FragmentStream::new(Trickle::new(input));
    let mut collector = Collector::default();
    stream.run(&mut collector).expect("run");
    assert_eq!(collector.done, [1, 2]);
    assert_eq!(collector.ready[1].2[0].data.as_deref(), Some(&[0x20; 6][..]));
}

#[test]
fn sliding_window_evicts_oldest_fragments() {
    let mut input = init_segment();
    for seq in 1..=4 {
        let decode_time = (seq == 1).then_some(0);
        input.extend(FragmentFixture::new(seq, decode_time, &[2, 2]).encode());
    }

    let options = StreamOptions {
        sliding_window: 2,
        ..Default::default()
    };
    let mut stream = FragmentStream::with_options(Trickle::new(input), options);
    let mut collector = Collector::default();
    stream.run(&mut collector).expect("run");

    assert_eq!(collector.done, [1, 2, 3, 4]);
    let retained: Vec<_> = stream
        .retained_fragments()
        .map(|f| f.sequence_number)
        .collect();
    assert_eq!(retained, [3, 4]);
}

#[test]
fn callback_errors_fail_the_stream() {
    let mut input = init_segment();
    input.extend(FragmentFixture::new(1, Some(0), &[4]).encode());
    input.extend(FragmentFixture::new(2, None, &[4]).encode());

    struct Failing;
    impl FragmentHandler for Failing {
        fn on_fragment_ready(
            &mut self,
            _fragment: &Fragment,
            _samples: &mut SampleAccessor<'_>,
        ) -> HandlerResult {
            Err("stop here".into())
        }
    }

    let mut stream = FragmentStream::new(Trickle::new(input));
    let err = stream.run(&mut Failing).expect_err("must fail");
    assert!(matches!(err, StreamError::Callback(_)));
    assert_eq!(err.kind(), ErrorKind::Other);
    assert_eq!(stream.state(), StreamState::Failed);
    assert_eq!(stream.retained_fragments().len(), 0);
    assert!(matches!(
        stream.run(&mut Collector::default()),
        Err(StreamError::InvalidState)
    ));
}

#[test]
fn sample_outside_payload_is_out_of_bounds() {
    let fixture = FragmentFixture::new(1, Some(0), &[4, 4]);
    let moof_size = encode(&fixture.moof(0)).len();
    let mut input = init_segment();
    input.extend(encode(&fixture.moof(moof_size as i32 + 8)));
    // 二つ目のサンプルの途中で mdat が終わる
    input.extend(encode(&MdatBox {
        is_large_size: false,
        payload: vec![0; 6],
    }));

    let mut stream = FragmentStream::new(Trickle::new(input));
    let err = stream
        .run(&mut Collector::default())
        .expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::OutOfBounds);
}

#[test]
fn accessor_ranges() {
    let mut input = init_segment();
    input.extend(FragmentFixture::new(1, Some(0), &[1, 2, 3, 4]).encode());

    let mut checked = false;
    let mut handler = shiguredo_fmp4_stream::FnHandler(
        |fragment: &Fragment, samples: &mut SampleAccessor<'_>| -> HandlerResult {
            assert_eq!(samples.fragment().sequence_number, fragment.sequence_number);

            let range = samples.get_range(TRACK_ID, 2, 3)?;
            assert_eq!(
                range.iter().map(|s| s.size).collect::<Vec<_>>(),
                [2, 3]
            );
            assert!(samples.get_range(TRACK_ID, 3, 2)?.is_empty());

            let err = samples.get_range(TRACK_ID, 3, 5).expect_err("must fail");
            assert_eq!(err.kind(), ErrorKind::OutOfBounds);
            let err = samples.get(TRACK_ID, 0).expect_err("must fail");
            assert_eq!(err.kind(), ErrorKind::OutOfBounds);
            let err = samples.get(TRACK_ID + 1, 1).expect_err("must fail");
            assert_eq!(err.kind(), ErrorKind::OutOfBounds);

            let info = samples.info(TRACK_ID, 4)?;
            assert!(info.data.is_none());
            assert_eq!(samples.read_data(&info)?, vec![0x13; 4]);
            checked = true;
            Ok(())
        },
    );

    let mut stream = FragmentStream::new(Trickle::new(input));
    stream.run(&mut handler).expect("run");
    assert!(checked);
}

#[test]
fn unfragmented_init_is_rejected() {
    let mut input = encode(&ftyp());
    input.extend(encode(&moov(false)));
    input.extend(FragmentFixture::new(1, Some(0), &[4]).encode());

    let mut stream = FragmentStream::new(Trickle::new(input));
    let err = stream.read_init().expect_err("must fail");
    assert!(matches!(err, StreamError::NotFragmented));
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(stream.state(), StreamState::Failed);
}

#[test]
fn fragments_without_init_when_not_required() {
    let input = FragmentFixture::new(1, Some(0), &[4, 2]).encode();
    let options = StreamOptions {
        require_init: false,
        ..Default::default()
    };
    let mut stream = FragmentStream::with_options(Trickle::new(input), options);
    let mut collector = Collector::default();
    stream.run(&mut collector).expect("run");

    let init = stream.init_segment().expect("init");
    assert!(init.moov_box.is_none());

    // trex がないのでサンプルの尺は 0 になる
    let samples = &collector.ready[0].2;
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].duration, 0);
    assert_eq!(samples[1].data.as_deref(), Some(&[0x11; 2][..]));
}

#[test]
fn moov_without_tracks_is_not_fragmented() {
    let mut moov = moov(true);
    moov.trak_boxes.clear();
    assert!(!moov.is_fragmented());

    let mut input = encode(&ftyp());
    input.extend(encode(&moov));
    input.extend(FragmentFixture::new(1, Some(0), &[4]).encode());

    let mut stream = FragmentStream::new(Trickle::new(input));
    assert!(matches!(
        stream.read_init(),
        Err(StreamError::NotFragmented)
    ));
    assert_eq!(stream.state(), StreamState::Failed);
}

#[test]
fn empty_stream_is_not_fragmented() {
    let mut stream = FragmentStream::new(std::io::empty());
    assert!(matches!(
        stream.read_init(),
        Err(StreamError::NotFragmented)
    ));
    assert_eq!(stream.state(), StreamState::Failed);
    assert!(matches!(
        stream.read_init(),
        Err(StreamError::InvalidState)
    ));
}

#[test]
fn empty_stream_without_init_requirement_is_done() {
    let options = StreamOptions {
        require_init: false,
        ..Default::default()
    };
    let mut stream = FragmentStream::with_options(std::io::empty(), options);
    assert!(stream.read_init().expect("init").moov_box.is_none());
    assert_eq!(stream.state(), StreamState::Done);
}

/// 用意したバイト列を返し終えると、指定した種類のエラーを返す入力
struct FailingReader {
    inner: Cursor<Vec<u8>>,
    kind: std::io::ErrorKind,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.inner.read(buf)? {
            0 => Err(std::io::Error::new(self.kind, "peer reset")),
            n => Ok(n),
        }
    }
}

#[test]
fn source_io_errors_are_propagated() {
    init_tracing();

    let mut stream = FragmentStream::new(FailingReader {
        inner: Cursor::new(Vec::new()),
        kind: std::io::ErrorKind::ConnectionReset,
    });
    match stream.read_init() {
        Err(StreamError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(stream.state(), StreamState::Failed);

    // フラグメントの途中で入力が失敗した場合
    let mut input = init_segment();
    let fragment = FragmentFixture::new(1, Some(0), &[8, 8]).encode();
    input.extend_from_slice(&fragment[..fragment.len() - 4]);
    let mut stream = FragmentStream::new(FailingReader {
        inner: Cursor::new(input),
        kind: std::io::ErrorKind::TimedOut,
    });
    let err = stream
        .run(&mut Collector::default())
        .expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(matches!(&err, StreamError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut));
    assert!(matches!(
        stream.next_fragment(&mut Collector::default()),
        Err(StreamError::InvalidState)
    ));
}

#[test]
fn error_kinds() {
    assert_eq!(StreamError::NotFragmented.kind(), ErrorKind::Unsupported);
    assert_eq!(
        StreamError::MissingPayload { offset: 0 }.kind(),
        ErrorKind::StructuralMismatch
    );
    assert_eq!(
        StreamError::from(Error::with_reason(ErrorKind::OutOfBounds, "x")).kind(),
        ErrorKind::OutOfBounds
    );

    let io: std::io::Error = Error::with_reason(ErrorKind::Unsupported, "seek from end").into();
    assert_eq!(StreamError::from(io).kind(), ErrorKind::Unsupported);

    let io = std::io::Error::other("disk");
    assert!(matches!(StreamError::from(io), StreamError::Io(_)));
}

/// サンプルデータを IV の先頭バイトと XOR する変換
#[derive(Debug, Default)]
struct XorTransform;

impl SampleTransform for XorTransform {
    fn iv_size(&self, _track_id: u32) -> u8 {
        8
    }

    fn transform(
        &mut self,
        _sample: &Sample,
        iv: &[u8],
        subsamples: &[SubsampleEntry],
        data: &mut [u8],
    ) -> Result<(), StreamError> {
        assert!(subsamples.is_empty());
        let key = iv.first().copied().unwrap_or(0);
        data.iter_mut().for_each(|b| *b ^= key);
        Ok(())
    }
}

#[test]
fn sample_transform_is_applied() {
    let mut fixture = FragmentFixture::new(1, Some(0), &[3, 2]);
    let ivs: Vec<u8> = [[0xF0; 8], [0x0F; 8]].concat();
    fixture.senc = Some(SencBox {
        version: 0,
        flags: FullBoxFlags::empty(),
        sample_count: 2,
        data: ivs,
    });

    let mut input = init_segment();
    input.extend(fixture.encode());

    let mut stream = FragmentStream::new(Trickle::new(input));
    stream.set_sample_transform(Box::new(XorTransform));
    let mut collector = Collector::default();
    stream.run(&mut collector).expect("run");

    let samples = &collector.ready[0].2;
    assert_eq!(samples[0].data.as_deref(), Some(&[0x10 ^ 0xF0; 3][..]));
    assert_eq!(samples[1].data.as_deref(), Some(&[0x11 ^ 0x0F; 2][..]));
}

#[test]
fn buffer_does_not_grow_with_stream_length() {
    let mut input = init_segment();
    for seq in 1..=20 {
        let decode_time = (seq == 1).then_some(0);
        input.extend(FragmentFixture::new(seq, decode_time, &[64, 64]).encode());
    }

    let options = StreamOptions {
        sliding_window: 1,
        ..Default::default()
    };
    let mut stream = FragmentStream::with_options(Trickle::new(input), options);
    let mut max_buffered = 0;
    while stream
        .next_fragment(&mut Collector::default())
        .expect("next")
        .is_some()
    {
        max_buffered = max_buffered.max(stream.buffer_info().buffer_len);
    }
    assert!(max_buffered < 1024, "buffered {max_buffered} bytes");
}

#[cfg(feature = "serde")]
#[test]
fn options_deserialize_with_defaults() {
    let options: StreamOptions =
        serde_json::from_str(r#"{"sliding_window": 4}"#).expect("deserialize");
    assert_eq!(options.sliding_window, 4);
    assert!(options.require_init);
    assert_eq!(options.max_box_size, StreamOptions::default().max_box_size);
}

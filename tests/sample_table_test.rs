use std::num::NonZeroU32;

use shiguredo_fmp4_stream::{
    Either, ErrorKind, Result,
    aux::SampleTableAccessor,
    boxes::{
        Co64Box, CttsEntry, StblBox, StcoBox, StscBox, StscEntry, StsdBox, StssBox, StszBox,
        SttsBox, SttsEntry,
    },
    sample_table::{
        chunk_for_sample, chunks_for_range, composition_offset, decode_time, is_sync_sample,
        sample_at_time, sample_count, sample_size, total_duration, total_size,
    },
};

fn nz(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).expect("non-zero")
}

fn stsc(runs: &[(u32, u32)]) -> Vec<StscEntry> {
    runs.iter()
        .map(|&(first_chunk, sample_per_chunk)| StscEntry {
            first_chunk: nz(first_chunk),
            sample_per_chunk,
            sample_description_index: nz(1),
        })
        .collect()
}

fn stts(runs: &[(u32, u32)]) -> Vec<SttsEntry> {
    runs.iter()
        .map(|&(sample_count, sample_delta)| SttsEntry {
            sample_count,
            sample_delta,
        })
        .collect()
}

#[test]
fn chunk_addressing() {
    let runs = stsc(&[(1, 256), (3, 1000)]);

    let info = chunk_for_sample(&runs, 768).expect("chunk");
    assert_eq!((info.chunk.get(), info.first_sample), (3, 513));

    let info = chunk_for_sample(&runs, 1).expect("chunk");
    assert_eq!((info.chunk.get(), info.first_sample), (1, 1));

    let info = chunk_for_sample(&runs, 257).expect("chunk");
    assert_eq!((info.chunk.get(), info.first_sample), (2, 257));
    assert_eq!(info.last_sample(), 512);

    let info = chunk_for_sample(&runs, 1513).expect("chunk");
    assert_eq!((info.chunk.get(), info.first_sample), (4, 1513));
}

#[test]
fn chunk_addressing_rejects_sample_zero() {
    let runs = stsc(&[(1, 256)]);
    let err = chunk_for_sample(&runs, 0).expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::OutOfBounds);

    let err = chunk_for_sample(&[], 1).expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::OutOfBounds);
}

#[test]
fn chunk_addressing_skips_empty_runs() {
    let runs = stsc(&[(1, 2), (2, 0), (4, 3)]);
    let info = chunk_for_sample(&runs, 3).expect("chunk");
    assert_eq!((info.chunk.get(), info.first_sample), (4, 3));
}

#[test]
fn chunk_runs_must_increase() {
    let runs = stsc(&[(2, 1), (2, 5)]);
    let err = chunk_for_sample(&runs, 1).expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::InvalidData);
}

#[test]
fn huge_chunk_runs_do_not_overflow() {
    let runs = stsc(&[(1, u32::MAX), (u32::MAX, u32::MAX)]);
    let info = chunk_for_sample(&runs, u32::MAX).expect("chunk");
    assert_eq!((info.chunk.get(), info.first_sample), (1, 1));

    let info = chunk_for_sample(&stsc(&[(1, 4)]), u32::MAX).expect("chunk");
    assert_eq!(info.first_sample, u32::MAX - 2);
    assert_eq!(info.last_sample(), u32::MAX);
}

#[test]
fn range_returns_every_intersecting_chunk() {
    let runs = stsc(&[(1, 4), (3, 2)]);
    let chunks = chunks_for_range(&runs, 3, 10).expect("chunks");
    let summary: Vec<_> = chunks
        .iter()
        .map(|c| (c.chunk.get(), c.first_sample, c.sample_count))
        .collect();
    assert_eq!(summary, [(1, 1, 4), (2, 5, 4), (3, 9, 2)]);

    assert!(chunks_for_range(&runs, 5, 4).expect("empty").is_empty());
}

#[test]
fn decode_time_accumulates_runs() {
    let runs = stts(&[(3, 10), (2, 14)]);
    assert_eq!(decode_time(&runs, 1).expect("time"), (0, 10));
    assert_eq!(decode_time(&runs, 3).expect("time"), (20, 10));
    assert_eq!(decode_time(&runs, 4).expect("time"), (30, 14));
    assert_eq!(decode_time(&runs, 5).expect("time"), (44, 14));
    assert!(decode_time(&runs, 6).is_err());
    assert!(decode_time(&runs, 0).is_err());
}

#[test]
fn totals_beyond_integer_range() {
    let runs = stts(&[(u32::MAX, u32::MAX), (u32::MAX, u32::MAX), (1, 1)]);
    assert_eq!(total_duration(&runs), u64::MAX);
    assert_eq!(sample_count(&runs), 2 * u64::from(u32::MAX) + 1);

    // 該当するサンプル番号が u32 に収まらない
    let runs = stts(&[(u32::MAX, 1), (u32::MAX, 1)]);
    assert_eq!(
        sample_at_time(&runs, u64::from(u32::MAX) - 1).expect("sample"),
        u32::MAX
    );
    let err = sample_at_time(&runs, u64::from(u32::MAX) + 5).expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::OutOfBounds);
}

#[test]
fn sample_at_time_rounds_up() {
    let runs = stts(&[(3, 10), (2, 14)]);
    assert_eq!(sample_at_time(&runs, 0).expect("sample"), 1);
    assert_eq!(sample_at_time(&runs, 10).expect("sample"), 2);
    assert_eq!(sample_at_time(&runs, 11).expect("sample"), 3);
    assert_eq!(sample_at_time(&runs, 30).expect("sample"), 4);
    assert_eq!(sample_at_time(&runs, 31).expect("sample"), 5);
    assert_eq!(sample_at_time(&runs, 44).expect("sample"), 5);

    let err = sample_at_time(&runs, 58).expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::OutOfBounds);
}

#[test]
fn zero_duration_runs_terminate() {
    let runs = stts(&[(4, 0), (1, 10)]);
    assert_eq!(sample_at_time(&runs, 0).expect("sample"), 1);
    assert_eq!(decode_time(&runs, 5).expect("time"), (0, 10));
    assert!(sample_at_time(&runs, 1).is_err());
    assert_eq!(total_duration(&runs), 10);
    assert_eq!(sample_count(&runs), 5);
}

#[test]
fn sizes_and_totals() {
    let variable = StszBox::Variable {
        entry_sizes: vec![5, 6, 7, 8],
    };
    assert_eq!(sample_size(&variable, 2).expect("size"), 6);
    assert_eq!(total_size(&variable, 2, 4).expect("total"), 21);
    assert_eq!(total_size(&variable, 3, 2).expect("total"), 0);
    assert_eq!(
        total_size(&variable, 1, 5).expect_err("must fail").kind,
        ErrorKind::OutOfBounds
    );
    assert!(sample_size(&variable, 5).is_err());

    let fixed = StszBox::Fixed {
        sample_size: nz(100),
        sample_count: 10,
    };
    assert_eq!(sample_size(&fixed, 10).expect("size"), 100);
    assert_eq!(total_size(&fixed, 1, 10).expect("total"), 1000);
    assert!(sample_size(&fixed, 11).is_err());
}

#[test]
fn composition_offsets() {
    let runs = [
        CttsEntry {
            sample_count: 2,
            sample_offset: 20,
        },
        CttsEntry {
            sample_count: 1,
            sample_offset: -10,
        },
    ];
    assert_eq!(composition_offset(Some(&runs), 2).expect("offset"), 20);
    assert_eq!(composition_offset(Some(&runs), 3).expect("offset"), -10);
    assert!(composition_offset(Some(&runs), 4).is_err());
    assert_eq!(composition_offset(None, 100).expect("offset"), 0);
}

#[test]
fn sync_samples() {
    let list = [nz(1), nz(31), nz(61)];
    assert!(is_sync_sample(Some(&list), 31).expect("sync"));
    assert!(!is_sync_sample(Some(&list), 30).expect("sync"));
    assert!(is_sync_sample(None, 30).expect("sync"));
    assert!(is_sync_sample(Some(&list), 0).is_err());
}

fn stbl() -> StblBox {
    StblBox {
        stsd_box: StsdBox {
            entries: Vec::new(),
        },
        stts_box: SttsBox::from_sample_deltas([10, 10, 10, 20, 20]),
        ctts_box: None,
        stsc_box: StscBox {
            entries: vec![
                StscEntry {
                    first_chunk: nz(1),
                    sample_per_chunk: 2,
                    sample_description_index: nz(1),
                },
                StscEntry {
                    first_chunk: nz(2),
                    sample_per_chunk: 3,
                    sample_description_index: nz(1),
                },
            ],
        },
        stsz_box: StszBox::Variable {
            entry_sizes: vec![100, 200, 300, 400, 500],
        },
        stco_or_co64_box: Either::A(StcoBox {
            chunk_offsets: vec![1000, 5000],
        }),
        stss_box: Some(StssBox {
            sample_numbers: vec![nz(1), nz(4)],
        }),
        unknown_boxes: Vec::new(),
    }
}

#[test]
fn accessor_resolves_single_samples() {
    let stbl = stbl();
    let accessor = SampleTableAccessor::new(1, &stbl).expect("accessor");
    assert_eq!(accessor.sample_count(), 5);
    assert_eq!(accessor.chunk_count(), 2);

    let s = accessor.sample(2).expect("sample");
    assert_eq!((s.offset, s.size, s.decode_time, s.duration), (1100, 200, 10, 10));
    assert!(!s.is_sync);

    let s = accessor.sample(5).expect("sample");
    assert_eq!((s.offset, s.size, s.decode_time, s.duration), (5700, 500, 50, 20));

    assert!(accessor.sample(4).expect("sample").is_sync);
    assert_eq!(
        accessor.sample(6).expect_err("must fail").kind,
        ErrorKind::OutOfBounds
    );
    assert_eq!(
        accessor.sample(0).expect_err("must fail").kind,
        ErrorKind::OutOfBounds
    );
    assert_eq!(accessor.sample_at_time(35).expect("sample"), 5);
}

#[test]
fn accessor_iterator_matches_random_access() {
    let stbl = stbl();
    let accessor = SampleTableAccessor::new(1, &stbl).expect("accessor");
    let samples: Vec<_> = accessor
        .samples()
        .collect::<Result<_>>()
        .expect("samples");
    assert_eq!(samples.len(), 5);
    for s in &samples {
        assert_eq!(*s, accessor.sample(s.sample_number).expect("sample"));
        assert_eq!(accessor.sample_size(s.sample_number).expect("size"), s.size);
    }
}

#[test]
fn accessor_rejects_mismatched_tables() {
    let mut stbl = stbl();
    stbl.stsz_box = StszBox::Fixed {
        sample_size: nz(10),
        sample_count: 4,
    };
    let err = SampleTableAccessor::new(1, &stbl).expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::InvalidData);
}

#[test]
fn accessor_offset_overflow_is_invalid_data() {
    let mut stbl = stbl();
    stbl.stco_or_co64_box = Either::B(Co64Box {
        chunk_offsets: vec![0, u64::MAX - 100],
    });
    let accessor = SampleTableAccessor::new(1, &stbl).expect("accessor");

    // チャンク 2 の先頭のサンプルはオフセットを加算しない
    assert_eq!(accessor.sample(3).expect("sample").offset, u64::MAX - 100);
    let err = accessor.sample(4).expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::InvalidData);

    let results: Vec<_> = accessor.samples().collect();
    assert_eq!(results.len(), 4);
    assert!(results[..3].iter().all(|r| r.is_ok()));
    assert_eq!(
        results[3].as_ref().map_err(|e| e.kind).err(),
        Some(ErrorKind::InvalidData)
    );
}

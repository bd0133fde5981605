use std::collections::BTreeMap;

use shiguredo_fmp4_stream::{
    ErrorKind, SampleFlags,
    boxes::{MfhdBox, MoofBox, MvexBox, TfdtBox, TfhdBox, TrafBox, TrexBox, TrunBox, TrunSample},
    fragment::{Fragment, PayloadRegion, TrackDefaults},
};

fn trex(track_id: u32) -> TrexBox {
    TrexBox {
        track_id,
        default_sample_description_index: 1,
        default_sample_duration: 100,
        default_sample_size: 10,
        default_sample_flags: SampleFlags::non_sync_sample(),
    }
}

fn tfhd(track_id: u32) -> TfhdBox {
    TfhdBox {
        track_id,
        base_data_offset: None,
        sample_description_index: None,
        default_sample_duration: None,
        default_sample_size: None,
        default_sample_flags: None,
        duration_is_empty: false,
        default_base_is_moof: false,
    }
}

fn trun(data_offset: Option<i32>, sizes: &[u32]) -> TrunBox {
    TrunBox {
        version: 0,
        data_offset,
        first_sample_flags: Some(SampleFlags::sync_sample()),
        samples: sizes
            .iter()
            .map(|&size| TrunSample {
                size: Some(size),
                ..Default::default()
            })
            .collect(),
    }
}

fn traf(tfhd_box: TfhdBox, tfdt: Option<u64>, trun_boxes: Vec<TrunBox>) -> TrafBox {
    TrafBox {
        tfhd_box,
        tfdt_box: tfdt.map(|t| TfdtBox {
            version: 1,
            base_media_decode_time: t,
        }),
        trun_boxes,
        senc_box: None,
        unknown_boxes: Vec::new(),
    }
}

fn moof(traf_boxes: Vec<TrafBox>) -> MoofBox {
    MoofBox {
        mfhd_box: MfhdBox { sequence_number: 7 },
        traf_boxes,
        unknown_boxes: Vec::new(),
    }
}

fn mvex() -> MvexBox {
    MvexBox {
        mehd_box: None,
        trex_boxes: vec![trex(1), trex(2)],
        unknown_boxes: Vec::new(),
    }
}

const PAYLOAD: PayloadRegion = PayloadRegion {
    start: 1008,
    size: 1000,
};

#[test]
fn defaults_prefer_tfhd_over_trex() {
    let mut h = tfhd(1);
    h.default_sample_size = Some(42);
    let d = TrackDefaults::resolve(Some(&trex(1)), &h);
    assert_eq!(d.sample_size, 42);
    assert_eq!(d.sample_duration, 100);
    assert_eq!(TrackDefaults::resolve(None, &h).sample_duration, 0);
}

#[test]
fn moof_relative_offsets_and_run_continuation() {
    let mut h = tfhd(1);
    h.default_base_is_moof = true;
    let m = moof(vec![traf(
        h,
        Some(5000),
        vec![trun(Some(1008), &[3, 4]), trun(None, &[5])],
    )]);

    let mut times = BTreeMap::new();
    let f = Fragment::new(m, 0, 1000, PAYLOAD, Some(&mvex()), &mut times).expect("fragment");
    assert_eq!(f.sequence_number, 7);

    let samples: Vec<_> = f.tracks[0].samples().collect();
    let layout: Vec<_> = samples
        .iter()
        .map(|s| (s.sample_number, s.offset, s.size, s.decode_time))
        .collect();
    assert_eq!(
        layout,
        [(1, 1008, 3, 5000), (2, 1011, 4, 5100), (3, 1015, 5, 5200)]
    );
    assert!(samples[0].is_sync);
    assert!(!samples[1].is_sync);
    assert!(samples[2].is_sync);
    assert_eq!(times.get(&1), Some(&5300));

    assert_eq!(f.tracks[0].sample(2).expect("sample"), samples[1]);
    assert!(f.tracks[0].sample(0).is_err());
    assert!(f.tracks[0].sample(4).is_err());
}

#[test]
fn explicit_base_offset_wins() {
    let mut h = tfhd(1);
    h.base_data_offset = Some(2000);
    h.default_base_is_moof = true;
    let m = moof(vec![traf(h, None, vec![trun(Some(8), &[1])])]);
    let f = Fragment::new(m, 0, 1000, PAYLOAD, Some(&mvex()), &mut BTreeMap::new())
        .expect("fragment");
    assert_eq!(f.tracks[0].samples().next().map(|s| s.offset), Some(2008));
}

#[test]
fn second_traf_continues_after_first() {
    let m = moof(vec![
        traf(tfhd(1), Some(0), vec![trun(None, &[10, 20])]),
        traf(tfhd(2), Some(0), vec![trun(None, &[5])]),
    ]);
    let f = Fragment::new(m, 100, 50, PAYLOAD, Some(&mvex()), &mut BTreeMap::new())
        .expect("fragment");
    let first = f.track(1).expect("track 1");
    let second = f.track(2).expect("track 2");
    assert_eq!(first.samples().next().map(|s| s.offset), Some(100));
    assert_eq!(second.samples().next().map(|s| s.offset), Some(130));
    assert_eq!(f.sample_count(), 3);
}

#[test]
fn decode_time_continues_without_tfdt() {
    let mut times = BTreeMap::new();
    let first = moof(vec![traf(tfhd(1), None, vec![trun(None, &[1, 1])])]);
    let f = Fragment::new(first, 0, 0, PAYLOAD, Some(&mvex()), &mut times).expect("fragment");
    assert_eq!(f.tracks[0].base_decode_time, 0);
    assert!(!f.tracks[0].has_explicit_decode_time);

    let second = moof(vec![traf(tfhd(1), None, vec![trun(None, &[1])])]);
    let f = Fragment::new(second, 0, 0, PAYLOAD, Some(&mvex()), &mut times).expect("fragment");
    assert_eq!(f.tracks[0].base_decode_time, 200);
    assert_eq!(f.tracks[0].end_decode_time(), 300);
}

#[test]
fn negative_data_offset_before_stream_start_is_rejected() {
    let m = moof(vec![traf(tfhd(1), None, vec![trun(Some(-10), &[1])])]);
    let err = Fragment::new(m, 0, 0, PAYLOAD, Some(&mvex()), &mut BTreeMap::new())
        .expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::InvalidData);
}

#[test]
fn data_end_overflow_is_rejected() {
    let mut h = tfhd(1);
    h.base_data_offset = Some(u64::MAX - 4);
    let m = moof(vec![traf(h, Some(0), vec![trun(None, &[16])])]);
    let err = Fragment::new(m, 0, 0, PAYLOAD, Some(&mvex()), &mut BTreeMap::new())
        .expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::InvalidData);

    // 終端がちょうど u64::MAX になる場合は受け入れる
    let mut h = tfhd(1);
    h.base_data_offset = Some(u64::MAX - 16);
    let m = moof(vec![traf(h, Some(0), vec![trun(None, &[16])])]);
    let f = Fragment::new(m, 0, 0, PAYLOAD, Some(&mvex()), &mut BTreeMap::new())
        .expect("fragment");
    let sample = f.tracks[0].samples().next().expect("sample");
    assert_eq!(sample.offset, u64::MAX - 16);
}

#[test]
fn decode_time_overflow_is_rejected() {
    let mut h = tfhd(1);
    h.default_sample_duration = Some(10);
    let m = moof(vec![traf(h, Some(u64::MAX - 4), vec![trun(None, &[1])])]);
    let err = Fragment::new(m, 0, 0, PAYLOAD, Some(&mvex()), &mut BTreeMap::new())
        .expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::InvalidData);
}

#[test]
fn presentation_time_saturates() {
    let m = moof(vec![traf(tfhd(1), Some(u64::MAX - 1000), vec![trun(None, &[1])])]);
    let f = Fragment::new(m, 0, 0, PAYLOAD, Some(&mvex()), &mut BTreeMap::new())
        .expect("fragment");
    let mut sample = f.tracks[0].sample(1).expect("sample");
    assert_eq!(sample.presentation_time(), i64::MAX);

    sample.decode_time = 100;
    sample.composition_time_offset = -150;
    assert_eq!(sample.presentation_time(), -50);
}

#[test]
fn payload_region_bounds() {
    assert!(PAYLOAD.contains(1008, 1000));
    assert!(!PAYLOAD.contains(1007, 2));
    assert!(!PAYLOAD.contains(2000, 9));
    assert_eq!(PAYLOAD.end(), 2008);
}

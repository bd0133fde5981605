#![no_main]

use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use shiguredo_fmp4_stream::{
    Decode, Encode,
    boxes::MoofBox,
    fragment::{Fragment, PayloadRegion},
};

fuzz_target!(|data: &[u8]| {
    if let Ok((moof, size)) = MoofBox::decode(data) {
        let _ = moof.encode_to_vec();
        for traf in &moof.traf_boxes {
            if let Some(senc) = &traf.senc_box {
                let samples = traf
                    .trun_boxes
                    .iter()
                    .map(|t| t.samples.len() as u32)
                    .fold(0u32, u32::saturating_add);
                for iv_size in [0, 8, 16] {
                    let _ = senc.entries(iv_size, samples);
                }
            }
        }

        let payload = PayloadRegion {
            start: size as u64 + 8,
            size: data.len() as u64,
        };
        let mut decode_times = BTreeMap::new();
        if let Ok(fragment) = Fragment::new(moof, 0, size as u64, payload, None, &mut decode_times) {
            for track in &fragment.tracks {
                for sample in track.samples().take(1000) {
                    let _ = track.sample(sample.sample_number);
                }
            }
        }
    }
});

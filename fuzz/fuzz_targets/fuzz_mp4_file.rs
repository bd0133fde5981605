#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_fmp4_stream::{Decode, Encode, Mp4File};

fuzz_target!(|data: &[u8]| {
    if let Ok((mp4_file, _)) = Mp4File::decode(data) {
        let _ = mp4_file.moov_box();
        let _ = mp4_file.encode_to_vec();
    }
});

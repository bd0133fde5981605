#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_fmp4_stream::{BoxHeader, Decode, Encode};

fuzz_target!(|data: &[u8]| {
    if let Ok((header, size)) = BoxHeader::decode(data) {
        assert_eq!(size, header.external_size());
        let encoded = header.encode_to_vec().expect("encode");
        assert_eq!(&encoded[..], &data[..size]);
    }
});

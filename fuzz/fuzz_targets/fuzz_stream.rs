#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_fmp4_stream::{
    FnHandler, FragmentStream, SampleAccessor, StreamOptions, fragment::Fragment,
    stream::HandlerResult,
};

fuzz_target!(|data: &[u8]| {
    let options = StreamOptions {
        sliding_window: 2,
        max_box_size: 1 << 20,
        require_init: false,
    };
    let mut stream = FragmentStream::with_options(data, options);
    let _ = stream.run(&mut FnHandler(
        |fragment: &Fragment, samples: &mut SampleAccessor<'_>| -> HandlerResult {
            for track in &fragment.tracks {
                let count = track.sample_count().min(100);
                let _ = samples.get_range(track.track_id, 1, count);
            }
            Ok(())
        },
    ));
});

#![no_main]

use aml_codecs::bitstream_utils::AvccConverter;
use aml_codecs::EncodedFormat;
use libfuzzer_sys::fuzz_target;

// The first byte picks the codec and the length of the configuration record, the rest is split
// between the record and a sample.
fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let codec = if selector & 0x80 != 0 {
        EncodedFormat::H265
    } else {
        EncodedFormat::H264
    };
    let split = (selector & 0x7f) as usize;
    if split > rest.len() {
        return;
    }
    let (extradata, sample) = rest.split_at(split);

    if let Ok(converter) = AvccConverter::new(codec, extradata) {
        if let Ok(out) = converter.convert(sample) {
            assert!(out.len() >= sample.len());
        }
    }
});

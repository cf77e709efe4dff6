#![no_main]

use aml_codecs::bitstream_utils::AccessUnitIterator;
use aml_codecs::EncodedFormat;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for codec in [EncodedFormat::H264, EncodedFormat::H265] {
        let total: usize = AccessUnitIterator::new(data, codec).map(<[u8]>::len).sum();
        assert!(total <= data.len());
    }
});

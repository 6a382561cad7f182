#![no_main]
use img_factory_rs::core::codec::{parse_directory, write_directory};
use img_factory_rs::{ReadMode, Version};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for version in [Version::V1, Version::V2] {
        for mode in [ReadMode::Strict, ReadMode::Lenient] {
            let Ok(records) = parse_directory(data, version, mode) else {
                continue;
            };

            // Whatever parses must serialize back to the bytes it came from
            let bytes = write_directory(&records, version);
            assert_eq!(&data[..bytes.len()], bytes.as_slice());
        }
    }
});

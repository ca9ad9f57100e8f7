#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = data;
    while let Some(len) = smapoll::frame::framed_len(buf) {
        if len == 0 || len > buf.len() {
            break;
        }
        let _ = smapoll::frame::decode(&buf[..len]);
        buf = &buf[len..];
    }
});

extern crate afl;
extern crate smapoll;

use afl::fuzz;

fn main() {
    fuzz!(|data: &[u8]| {
        let mut buf = data;
        while let Some(len) = smapoll::frame::framed_len(buf) {
            if len == 0 || len > buf.len() {
                break;
            }
            match smapoll::frame::decode(&buf[..len]) {
                Ok(_) => println!("ok"),
                Err(e) => eprintln!("{}", e),
            }
            buf = &buf[len..];
        }
    });
}

//! Walker fuzz target: feed arbitrary bytes to every protocol handler and to a raw walk.
//! Nothing may panic; malformed input must come back as malformed reports.
//! Build with: cargo fuzz run walk_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use std::net::SocketAddr;
    use tlvmatch::matcher::{ConversationId, Timestamp};
    use tlvmatch::protocols::radius;
    use tlvmatch::{MessageMeta, Session};

    let result = tlvmatch::walk(data, 0, data.len(), &radius::ATTRIBUTES);
    assert!(result.end_offset <= data.len());

    let mut session = Session::with_defaults();
    let names = session.registry().names();
    let addr: SocketAddr = ([127, 0, 0, 1], 10050).into();
    let meta = MessageMeta { frame: 1, time: Timestamp::from_secs(0), conversation: ConversationId(0), source: addr, destination: addr };
    for name in names {
        let _ = session.dissect(name, &meta, data);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run walk_fuzz");
}

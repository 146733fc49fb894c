#![no_main]

use anonamoose::proxy::frame::parse_sse_chunk;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Arbitrary chunk text must never panic, regardless of how it splits
    // mid-event or carries malformed `data:` payloads.
    let _ = parse_sse_chunk(data);
});

//! Fuzz target for transport frame decoding
//!
//! Arbitrary text goes through the same path as a socket frame: frame
//! parse, event extraction, and activity decoding. Undecodable frames are
//! skipped by the read loop, so every stage must fail cleanly.

#![no_main]

use confab_conversation::Activity;
use confab_transport::{Event, frame::InboundFrame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(frame) = InboundFrame::parse(text) else {
        return;
    };

    let _ = frame.is_error();
    let _ = frame.is_bookkeeping();
    let Some(event) = Event::from_frame(frame) else {
        return;
    };

    let _ = event.compound_type();
    if let Ok(activity) = Activity::from_event_data(&event.data) {
        let _ = activity.key_uri();
        let _ = activity.acknowledged_id();
    }
});

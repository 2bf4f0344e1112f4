#![no_main]

use std::time::{Duration, Instant};

use libfuzzer_sys::fuzz_target;
use txcache::entry::{CancelToken, Entry, State, WriteWaitResult};
use txcache::key::ObjectId;

// Property checks over every state with expired-deadline waits.
//
// With a deadline already in the past no wait can block, so the full wait
// surface is safe to drive from the fuzzer: each operation must return a
// definite answer (or a timeout) immediately and leave the state untouched.
fuzz_target!(|data: &[u8]| {
    let cancel = CancelToken::new();
    let expired = Instant::now() - Duration::from_millis(1);

    for &byte in data {
        let state = State::ALL[(byte & 0x0f) as usize % State::ALL.len()];
        let entry: Entry<ObjectId, ()> = Entry::new(ObjectId(u64::from(byte)), 0, state);
        let mut guard = entry.lock();

        match (byte >> 4) % 4 {
            0 => {
                let result = guard.wait_readable(expired, &cancel);
                match result {
                    Ok(readable) => assert_eq!(readable, state.has_all(0x02)),
                    Err(err) => assert!(err.is_timeout()),
                }
            }
            1 => {
                let result = guard.wait_writable(expired, &cancel);
                match result {
                    Ok(WriteWaitResult::Writable) => assert!(state.has_all(0x08)),
                    Ok(WriteWaitResult::Readable) => assert_eq!(state, State::CachedRead),
                    Ok(WriteWaitResult::Decached) => assert_eq!(state, State::Decached),
                    Err(err) => assert!(err.is_timeout()),
                }
            }
            2 => {
                let result = guard.wait_decached(expired, &cancel);
                match result {
                    Ok(()) => assert_eq!(state, State::Decached),
                    Err(err) => assert!(
                        err.is_timeout()
                            || matches!(
                                state,
                                State::FetchingRead
                                    | State::CachedRead
                                    | State::FetchingUpgrade
                                    | State::FetchingWrite
                                    | State::CachedWrite
                                    | State::CachedDirty
                                    | State::EvictingDowngrade
                            )
                    ),
                }
            }
            _ => {
                let result = guard.wait_not_upgrading(expired, &cancel);
                match result {
                    Ok(()) => unreachable!("an upgrading state cannot settle by the deadline"),
                    Err(err) => {
                        if matches!(state, State::FetchingUpgrade | State::FetchingWrite) {
                            assert!(err.is_timeout());
                        } else {
                            assert!(!err.is_timeout() && !err.is_interrupted());
                        }
                    }
                }
            }
        }

        assert_eq!(guard.state(), state, "expired waits must not mutate");
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use txcache::entry::{Entry, State};
use txcache::key::BindingKey;

// Fuzz arbitrary transition sequences against a cache entry.
//
// Applies random transition operations (valid and invalid) plus accessor
// calls, checking after every step that the state is one of the ten defined
// variants, that rejected transitions change nothing, and that the context
// ID only grows.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte picks the key (sentinel or named) and the initial state.
    let key = if data[0] & 1 == 0 {
        BindingKey::Last
    } else {
        BindingKey::name("binding")
    };
    let initial = State::ALL[(data[0] >> 1) as usize % State::ALL.len()];
    let entry: Entry<BindingKey, u64> = Entry::new(key, 0, initial);
    let mut expected_context = 0u64;

    for &byte in &data[1..] {
        let mut guard = entry.lock();
        let before = guard.state();

        let result = match byte % 18 {
            0 => guard.set_cached_read(),
            1 => guard.set_cached_write(),
            2 => guard.set_upgraded(),
            3 => guard.set_fetching_upgrade(),
            4 => guard.set_upgraded_immediate(),
            5 => guard.set_cached_dirty(),
            6 => guard.set_not_modified(),
            7 => guard.set_evicting_downgrade(),
            8 => guard.set_evicted_downgrade(),
            9 => guard.set_evicted_downgrade_immediate(),
            10 => guard.set_evicting(),
            11 => guard.set_evicted(),
            12 => guard.set_evicted_immediate(),
            13 => guard.set_evicted_abandon_fetching(),
            14 => {
                let cid = u64::from(byte) * 31;
                guard.note_access(cid);
                expected_context = expected_context.max(cid);
                Ok(())
            }
            15 => {
                guard.set_value(u64::from(byte));
                Ok(())
            }
            16 => {
                let _ = guard.take_value();
                Ok(())
            }
            _ => {
                // Predicates agree with the bitmask encoding.
                let state = guard.state();
                assert_eq!(guard.is_readable(), state.has_all(0x02));
                assert_eq!(guard.is_writable(), state.has_all(0x08));
                assert_eq!(guard.is_decached(), state == State::Decached);
                Ok(())
            }
        };

        let after = guard.state();
        assert!(State::ALL.contains(&after));
        if result.is_err() {
            assert_eq!(before, after, "failed transition must not mutate");
        }
        assert_eq!(guard.context_id(), expected_context);

        // Decached is terminal: nothing moves it.
        if before == State::Decached {
            assert_eq!(after, State::Decached);
        }
    }
});

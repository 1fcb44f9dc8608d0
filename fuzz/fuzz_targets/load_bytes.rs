#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(ir) = binir::load(data) {
        // Anything that loads must save, and the saved form must be stable.
        let bytes = binir::save(&ir).expect("loaded IR saves");
        let again = binir::load(&bytes).expect("saved IR loads");
        assert_eq!(binir::save(&again).expect("reloaded IR saves"), bytes);
    }
});

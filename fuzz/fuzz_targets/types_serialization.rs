#![no_main]

use gitpages_types::Manifest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(json_str) = std::str::from_utf8(data) {
        if let Ok(manifest) = serde_json::from_str::<Manifest>(json_str) {
            if let Ok(roundtripped) = serde_json::to_string(&manifest) {
                if let Ok(parsed) = serde_json::from_str::<Manifest>(&roundtripped) {
                    assert_eq!(manifest.contents.len(), parsed.contents.len());
                    assert_eq!(manifest.repo_url, parsed.repo_url);
                    assert_eq!(manifest.branch, parsed.branch);
                }
            }
        }
    }
});

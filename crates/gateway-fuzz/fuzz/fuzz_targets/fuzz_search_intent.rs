#![no_main]

use libfuzzer_sys::fuzz_target;
use sql_mcp_gateway::tools::SearchIntent;

fuzz_target!(|data: &[u8]| {
    if let Ok(query) = std::str::from_utf8(data) {
        if let Ok(intent) = SearchIntent::parse(query) {
            let _ = intent.title();
        }
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use sql_mcp_gateway::executor::StatementKind;
use sql_mcp_gateway::executor::guard::{classify, ensure_read_only};

fuzz_target!(|data: &[u8]| {
    let Ok(sql) = std::str::from_utf8(data) else {
        return;
    };
    // The read-only check must agree with classification
    match classify(sql) {
        Ok(classified) => {
            let allowed = ensure_read_only(sql).is_ok();
            assert_eq!(allowed, classified.kind == StatementKind::Read);
        }
        Err(_) => assert!(ensure_read_only(sql).is_err()),
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use sql_mcp_gateway::server::rpc::{self, Incoming};

fuzz_target!(|data: &[u8]| {
    // Every body yields either an error response or a list of messages
    match rpc::parse_envelope(data) {
        Ok(envelope) => {
            for message in envelope.messages {
                if let Incoming::Invalid(response) = message {
                    assert!(response.is_error());
                }
            }
        }
        Err(response) => assert!(response.is_error()),
    }
});

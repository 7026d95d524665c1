#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use wellsense_errors::{
    DiagnosticRecord, ErrorResponsePolicy, RaisedError, RequestContext, RuntimeMode, SinkError,
};

fn render(record: &DiagnosticRecord<'_>) -> Result<(), SinkError> {
    let mut line = String::new();
    let _ = record.write_to(&mut line);
    Ok(())
}

// Input layout: mode byte, status (2 bytes), then message / code / name split on 0x00.
fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }
    let production = data[0] & 1 == 1;
    let status = u16::from_le_bytes([data[1], data[2]]);
    let text = String::from_utf8_lossy(&data[3..]);
    let mut parts = text.split('\0');

    let mut err = RaisedError::new(parts.next().unwrap_or_default()).with_status(status);
    if let Some(code) = parts.next() {
        err = err.with_code(code);
    }
    if let Some(name) = parts.next() {
        err = err.with_name(name);
    }
    if let Some(stack) = parts.next() {
        err = err.with_stack(stack);
    }

    let ctx = RequestContext::new("POST", "/fuzz");
    let policy = ErrorResponsePolicy::new(RuntimeMode::from(production), Arc::new(render));
    let (_, envelope) = policy.handle(&err, &ctx);

    if production {
        assert!(!envelope.has_diagnostics());
    }
    let _ = serde_json::to_vec(&envelope);
});

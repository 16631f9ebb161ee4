use std::time::Duration;

use crate::types::completion_code;

/// Record the outcome of one request/response exchange.
///
/// `attempt` is `"first"` for the caller's own send and `"retry"` for resends
/// issued by the re-logon procedure.
pub(crate) fn record_exchange(
    attempt: &'static str,
    netfn: u8,
    cmd: u8,
    elapsed: Duration,
    completion_code: u8,
) {
    #[cfg(feature = "metrics")]
    {
        let outcome = if completion_code == completion_code::SUCCESS {
            "ok"
        } else {
            "err"
        };
        metrics::counter!("ipmi_serial_requests_total", "attempt" => attempt, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("ipmi_serial_request_seconds", "attempt" => attempt)
            .record(elapsed.as_secs_f64());
        if completion_code != completion_code::SUCCESS {
            metrics::counter!(
                "ipmi_serial_completion_code_nonzero_total",
                "kind" => code_kind(completion_code)
            )
            .increment(1);
        }
    }

    if completion_code == completion_code::SUCCESS {
        tracing::debug!(
            attempt,
            netfn,
            cmd,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "ipmi exchange ok"
        );
    } else {
        tracing::debug!(
            attempt,
            netfn,
            cmd,
            completion_code,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "ipmi exchange completed with failure code"
        );
    }
}

/// Record a change of the consecutive communication error count.
pub(crate) fn record_error_count(device_id: u8, count: i32) {
    let _ = (device_id, count);

    #[cfg(feature = "metrics")]
    {
        metrics::gauge!("ipmi_serial_consecutive_errors", "device" => device_id.to_string())
            .set(f64::from(count));
    }
}

#[cfg(feature = "metrics")]
fn code_kind(code: u8) -> &'static str {
    match code {
        completion_code::HANDSHAKE_TIMEOUT => "handshake_timeout",
        completion_code::MALFORMED_RESPONSE => "malformed_response",
        completion_code::ILLEGAL_PARAMETER => "checksum",
        completion_code::INVALID_DATA_IN_RESPONSE => "invalid_data",
        completion_code::INSUFFICIENT_PRIVILEGE => "insufficient_privilege",
        _ => "other",
    }
}

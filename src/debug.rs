pub(crate) fn enabled() -> bool {
    std::env::var("IPMI_SERIAL_DEBUG")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

pub(crate) fn dump_hex(label: &str, bytes: &[u8]) {
    if !enabled() {
        return;
    }
    tracing::trace!(len = bytes.len(), bytes = %hex::encode(bytes), "{label}");
}

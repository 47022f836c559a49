//! Reserved key patterns that may not be declared in user variables. Checked
//! by the Variable Composer at write time (not only by the template renderer)
//! per the spec's design notes.

const RESERVED_EXACT: &[&str] = &[
    "JOB",
    "COMMAND",
    "EVENT",
    "TARGET",
    "ALLOCATION_IP",
    "ALLOCATION_ID",
    "AGENT_IP",
    "AGENT_DIR",
    "SSH_USER",
    "SSH_KEY",
    "USE_SUDO",
    "BUCKET",
    "UPDATE_SEQ",
    "DISABLED",
];

const LABEL_DERIVED_SUFFIXES: &[&str] = &["NODES", "PEERS", "LENGTH", "LABEL_ID", "ALLOCATION_INDEX"];

/// True if `key` collides with a reserved name or a `<LABEL>_{...}` derived
/// pattern (including the per-index `<LABEL>_<digit>+` keys).
pub fn is_reserved(key: &str) -> bool {
    if RESERVED_EXACT.contains(&key) {
        return true;
    }
    for (idx, ch) in key.char_indices().rev() {
        if ch != '_' {
            continue;
        }
        let suffix = &key[idx + 1..];
        if LABEL_DERIVED_SUFFIXES.contains(&suffix) {
            return true;
        }
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
    }
    false
}

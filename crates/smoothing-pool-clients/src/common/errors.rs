use alloy::{contract::Error, sol_types::decode_revert_reason};

/// Best effort human readable form of a contract error: the revert reason
/// when the node returned one, the raw revert data otherwise.
pub(crate) fn decode_any_error(error: &Error) -> String {
    match error.as_revert_data() {
        Some(data) => decode_revert_reason(&data)
            .unwrap_or_else(|| format!("execution reverted with data {data}")),
        None => error.to_string(),
    }
}

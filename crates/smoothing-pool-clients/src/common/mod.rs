pub(crate) mod errors;
pub(crate) mod tx_submitter;

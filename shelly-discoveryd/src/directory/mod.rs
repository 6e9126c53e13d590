pub mod fingerprint;
pub mod table;

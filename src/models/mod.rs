pub mod record;

pub use record::{lease_now, truncate_lease, Completion, Identity, Record, Status, LEASE_PRECISION_DIGITS};

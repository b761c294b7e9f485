pub mod bill_ledger;
pub mod billing;
pub mod invoice_share;
pub mod occupancy;

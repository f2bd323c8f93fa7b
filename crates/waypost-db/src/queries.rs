//! Database query functions organized by ledger.

pub mod invoices;
pub mod pins;
pub mod quota;
pub mod sponsors;

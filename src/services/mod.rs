pub mod errors;
pub mod invoices;
pub mod reports;

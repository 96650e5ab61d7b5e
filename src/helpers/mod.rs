pub mod batch;
pub mod client;
pub mod csv_export;
pub mod paymo;
pub mod reconcile;

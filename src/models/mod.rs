pub mod batch;
pub mod paymo;
pub mod timesheet;

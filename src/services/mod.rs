pub mod csv_intake;
pub mod job_runner;
pub mod job_store;
pub mod litmos;
pub mod user_admin;
pub mod worker;

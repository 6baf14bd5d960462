pub mod db;
pub mod errors;
pub mod form;
pub mod helpers;
pub mod query_params;

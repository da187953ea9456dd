//! XForm field trees: canonical export column names, submission value
//! mapping, and structural compatibility checks between form versions.

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;

//! Account management module

pub mod service;

pub use service::AccountService;

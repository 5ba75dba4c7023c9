//! The session manager service handed to the rest of the application.

mod service;
mod supervisor;

#[cfg(test)]
mod tests;

pub use service::SessionFacade;

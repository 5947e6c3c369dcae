pub mod error;
pub mod inpaint_service;
pub mod orchestrator;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

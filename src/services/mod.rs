pub mod cancellation;
pub mod fleet;
pub mod poller;
pub mod registry;
pub mod status_client;

#[cfg(test)]
pub(crate) mod mock;

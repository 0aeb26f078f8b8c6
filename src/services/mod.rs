pub mod allocator;
pub mod payments;
pub mod reconciler;
pub mod scheduling;
pub mod state_machine;
pub mod sweeper;

#[cfg(test)]
pub mod testing;

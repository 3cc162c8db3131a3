
#[cfg(test)]
pub mod failover_tests;

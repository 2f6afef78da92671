pub mod api;
pub mod client;
pub mod definition;
pub mod docker;
pub mod manager;
pub mod manager_api;
pub mod node;
pub mod round_robin;
pub mod runtime;
pub mod scheduler;
pub mod shutdown;
pub mod stats;
pub mod task;
pub mod work_queue;
pub mod worker;
pub mod worker_api;

#[cfg(test)]
mod definition_test;
#[cfg(test)]
mod docker_test;
#[cfg(test)]
mod manager_test;
#[cfg(test)]
mod round_robin_test;

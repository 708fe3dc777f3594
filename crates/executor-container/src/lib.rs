mod container_executor;

pub use container_executor::ContainerExecutor;

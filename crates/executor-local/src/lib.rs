mod local_executor;

pub use local_executor::LocalExecutor;

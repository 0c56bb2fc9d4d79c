mod pool;
mod worker;

pub use pool::WorkerPool;
pub use worker::WorkerConfig;

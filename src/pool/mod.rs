pub mod block_deque;
pub mod sql_pool;
pub mod thread_pool;

pub use block_deque::BlockDeque;
pub use sql_pool::{SqlConnGuard, SqlConnPool};
pub use thread_pool::ThreadPool;

//! 运行时状态模块
//!
//! 启动时构造一次的依赖根

pub mod app_state;

pub use app_state::AppState;

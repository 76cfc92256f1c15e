pub mod thread_safety;
pub mod timing;

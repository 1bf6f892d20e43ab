pub mod failpoint;
pub mod hash;
pub mod mock;

pub mod elu;
pub mod time_distributed;

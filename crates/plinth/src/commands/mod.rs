pub mod leader;
pub mod plugin;
pub mod serve;

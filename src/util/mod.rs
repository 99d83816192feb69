pub mod clock;
pub mod stop_signal;

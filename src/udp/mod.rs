pub mod ack_receiver;
pub mod config;
pub mod measurement_receiver;
pub mod multicast;
pub mod send_loop;

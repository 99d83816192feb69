pub mod sixbit;

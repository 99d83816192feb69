//! The NMEA-style sentence shapes used on the link - fragment (`!--TDB`) sentences carrying
//!  application data, and `$VETMK` acknowledgements. This is not a general NMEA library.

pub mod ack;
pub mod checksum;
pub mod tdb;

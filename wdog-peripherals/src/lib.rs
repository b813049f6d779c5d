//! Host-side stand-ins for the decoder's hardware surroundings: the track
//! signal, the feedback-bus master, the feedback wire itself and the
//! configuration EEPROM.

#[cfg(feature = "host-peripherals")]
pub mod bus_master;
#[cfg(feature = "host-peripherals")]
pub mod cv_file;
#[cfg(feature = "host-peripherals")]
pub mod feedback_link;
#[cfg(feature = "host-peripherals")]
pub mod track;

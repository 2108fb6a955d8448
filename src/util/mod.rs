//! Utility modules for vnxstat.

mod cim_time;

pub use cim_time::{
    CimTimeError, CimTimestamp, convert_to_local, format_cim_interval, parse_cim_interval,
};

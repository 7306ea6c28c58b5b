//! Output port control.
//!
//! An LVDS port is mostly run by its external panel driver, which owns the
//! panel power sequencing. An SDVO port is driven directly through its
//! control register, optionally followed by bring-up of a discrete bridge
//! chip.

use crate::interface::Interface;
use crate::low_level::LowLevel;
use crate::models::Model;
use crate::platform::PortDriver;
use crate::registers::Register;
use crate::timing::TimingDescriptor;
use crate::{Pipe, PortType, PowerState};

/// `LVDS` bit enabling the port.
pub const LVDS_PORT_ENABLE: u32 = 1 << 31;
/// `LVDS` bit selecting pipe B as the source.
pub const LVDS_PIPE_B_SELECT: u32 = 1 << 30;
/// `LVDS` bits powering up both channels' pads.
pub const LVDS_PAD_POWER: u32 = 3 << 8;

/// `SDVO_CTRL` bit enabling the port.
pub const SDVO_ENABLE: u32 = 1 << 31;
/// `SDVO_CTRL` bit selecting pipe B as the source.
pub const SDVO_PIPE_B_SELECT: u32 = 1 << 30;
/// `SDVO_CTRL` bit letting the encoder stall the data stream.
pub const SDVO_STALL: u32 = 1 << 29;
/// `SDVO_CTRL` bit sending the border along with the active data.
pub const SDVO_BORDER: u32 = 1 << 7;

fn control_value(port: PortType, pipe: Pipe) -> (Register, u32) {
    match port {
        PortType::Lvds => {
            let mut v = LVDS_PORT_ENABLE | LVDS_PAD_POWER;
            if pipe == Pipe::B {
                v |= LVDS_PIPE_B_SELECT;
            }
            (Register::LVDS, v)
        }
        PortType::Sdvo => {
            let mut v = SDVO_ENABLE | SDVO_STALL | SDVO_BORDER;
            if pipe == Pipe::B {
                v |= SDVO_PIPE_B_SELECT;
            }
            (Register::SDVO_CTRL, v)
        }
    }
}

pub(crate) fn enable<M, I, P>(
    ll: &mut LowLevel<M, I>,
    pipe: Pipe,
    port: PortType,
    timing: &TimingDescriptor,
    driver: &mut P,
) -> Result<(), I::Error>
where
    M: Model,
    I: Interface,
    P: PortDriver<Error = I::Error>,
{
    let aperture = M::port_aperture(port);
    let (reg, v) = control_value(port, pipe);
    match port {
        PortType::Lvds => {
            ll.wr(aperture, pipe, reg, v)?;
            driver.set_mode(timing, pipe.mask())?;
            driver.set_power(PowerState::On)?;
        }
        PortType::Sdvo => {
            ll.wr(aperture, pipe, reg, v)?;
            if driver.has_bridge() {
                log::debug!("pipe {:?}: bringing up SDVO bridge", pipe);
                driver.bring_up_bridge(timing)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn disable<M, I, P>(
    ll: &mut LowLevel<M, I>,
    pipe: Pipe,
    port: PortType,
    driver: &mut P,
) -> Result<(), I::Error>
where
    M: Model,
    I: Interface,
    P: PortDriver<Error = I::Error>,
{
    let aperture = M::port_aperture(port);
    let (reg, v) = control_value(port, pipe);
    let enable = match port {
        PortType::Lvds => LVDS_PORT_ENABLE | LVDS_PAD_POWER,
        PortType::Sdvo => SDVO_ENABLE,
    };
    if port == PortType::Lvds {
        // The panel sequences its own power down before the pads go.
        driver.set_power(PowerState::Off)?;
    }
    ll.wr(aperture, pipe, reg, v & !enable)
}

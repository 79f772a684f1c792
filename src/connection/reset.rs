//! DTR/RTS reset sequences.
//!
//! On standard dev boards the two control lines drive the EN and IO0 pins
//! through an inverting transistor pair, so a reset with IO0 held low drops
//! the chip into its serial bootloader, and the same dance with IO0
//! released boots the user application.

use std::{thread::sleep, time::Duration};

use log::debug;

use crate::{error::Error, transport::Transport};

/// Time each line state is held for the chip to register it.
const RESET_HOLD_DELAY: Duration = Duration::from_millis(100);

/// Reset the chip into its serial bootloader.
pub fn reset_to_bootloader(transport: &mut dyn Transport) -> Result<(), Error> {
    debug!("Resetting target into the bootloader");

    transport.set_control_lines(true, false)?;
    sleep(RESET_HOLD_DELAY);
    transport.set_control_lines(false, true)?; // chip in reset, boot pin low
    sleep(RESET_HOLD_DELAY);
    transport.set_control_lines(true, false)?; // chip out of reset

    Ok(())
}

/// Reset the chip and let it boot the user application.
pub fn reset_to_user_code(transport: &mut dyn Transport) -> Result<(), Error> {
    debug!("Resetting target to run user code");

    transport.set_control_lines(false, false)?;
    sleep(RESET_HOLD_DELAY);
    transport.set_control_lines(false, true)?; // chip in reset, boot pin released
    sleep(RESET_HOLD_DELAY);
    transport.set_control_lines(false, false)?;

    Ok(())
}

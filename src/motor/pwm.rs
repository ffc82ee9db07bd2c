// Linux sysfs PWM backend for the differential-drive base
//
// Four PWM channels on one chip: a forward and a reverse channel per side.
// Direction is selected by which channels are energized, speed by the duty
// cycle written to them. A turn energizes a single reverse channel so the
// car pivots around the idle side.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::PWM_FREQ_HZ;
use crate::state::{Motion, SpeedLevel};

use super::Actuator;

/// Channel numbers on the PWM chip, by role.
const LEFT_FWD: usize = 0;
const RIGHT_FWD: usize = 1;
const LEFT_REV: usize = 2;
const RIGHT_REV: usize = 3;

const CHANNELS: [usize; 4] = [LEFT_FWD, RIGHT_FWD, LEFT_REV, RIGHT_REV];

/// Carrier period in nanoseconds, as sysfs expects.
const PERIOD_NS: u32 = 1_000_000_000 / PWM_FREQ_HZ;

/// Channels energized for each motion. Stop maps to none.
fn channels_for(motion: Motion) -> &'static [usize] {
    match motion {
        Motion::Stop => &[],
        Motion::Forward => &[LEFT_FWD, RIGHT_FWD],
        Motion::Backward => &[LEFT_REV, RIGHT_REV],
        // Pivot turns: drive one side in reverse, leave the other idle
        Motion::Left => &[LEFT_REV],
        Motion::Right => &[RIGHT_REV],
    }
}

/// Duty cycle per speed level, in nanoseconds of the carrier period.
fn duty_ns(speed: SpeedLevel) -> u32 {
    let percent: u64 = match speed {
        SpeedLevel::Low => 30,
        SpeedLevel::Medium => 66,
        SpeedLevel::High => 100,
    };
    (PERIOD_NS as u64 * percent / 100) as u32
}

#[derive(Debug, thiserror::Error)]
pub enum PwmError {
    #[error("PWM write to {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Sysfs PWM actuator.
///
/// Construction exports the four channels and parks them disabled; failures
/// after that point are logged, not surfaced, per the actuation contract.
pub struct PwmActuator {
    chip: PathBuf,
}

impl PwmActuator {
    pub fn open(chip: &Path) -> Result<Self, PwmError> {
        info!("Opening PWM chip at {}", chip.display());
        let actuator = Self {
            chip: chip.to_path_buf(),
        };
        for ch in CHANNELS {
            actuator.export(ch)?;
            actuator.write_attr(ch, "period", PERIOD_NS)?;
            actuator.write_attr(ch, "duty_cycle", 0)?;
            actuator.write_attr(ch, "enable", 0)?;
        }
        Ok(actuator)
    }

    fn channel_dir(&self, ch: usize) -> PathBuf {
        self.chip.join(format!("pwm{ch}"))
    }

    fn export(&self, ch: usize) -> Result<(), PwmError> {
        if self.channel_dir(ch).exists() {
            return Ok(()); // already exported, e.g. from a previous run
        }
        let path = self.chip.join("export");
        fs::write(&path, ch.to_string()).map_err(|source| PwmError::Io { path, source })
    }

    fn write_attr(&self, ch: usize, attr: &str, value: u32) -> Result<(), PwmError> {
        let path = self.channel_dir(ch).join(attr);
        fs::write(&path, value.to_string()).map_err(|source| PwmError::Io { path, source })
    }

    fn energize(&self, ch: usize, duty: u32) {
        let result = self
            .write_attr(ch, "duty_cycle", duty)
            .and_then(|()| self.write_attr(ch, "enable", 1));
        if let Err(e) = result {
            warn!("failed to energize channel {}: {}", ch, e);
        }
    }

    fn de_energize(&self, ch: usize) {
        let result = self
            .write_attr(ch, "enable", 0)
            .and_then(|()| self.write_attr(ch, "duty_cycle", 0));
        if let Err(e) = result {
            warn!("failed to de-energize channel {}: {}", ch, e);
        }
    }
}

impl Actuator for PwmActuator {
    fn set_direction(&mut self, motion: Motion, speed: SpeedLevel) {
        debug!("pwm: drive {:?} at {:?}", motion, speed);
        // De-energize everything first so a direction change never briefly
        // drives both channels of one side.
        for ch in CHANNELS {
            self.de_energize(ch);
        }
        let duty = duty_ns(speed);
        for &ch in channels_for(motion) {
            self.energize(ch, duty);
        }
    }

    fn stop_all(&mut self) {
        debug!("pwm: all channels off");
        for ch in CHANNELS {
            self.de_energize(ch);
        }
    }
}

impl Drop for PwmActuator {
    // Park the motors when the driver goes away (safety measure)
    fn drop(&mut self) {
        self.stop_all();
    }
}

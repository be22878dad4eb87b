// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Power sequencing for the ISP and its sensors.
//!
//! The platform supplies GPIO lines, a clock and regulators through the traits
//! below. GPIO lines use logical levels: `set_active(true)` asserts the line,
//! whatever its electrical polarity. Any `embedded-hal` [`OutputPin`] can be
//! used directly, with `set_high()` taken as the active level.
//!
//! Every power-on step that fails unwinds the steps already taken before the
//! error is returned, so a failed sequence never leaves a rail enabled.

use crate::{sensor::SensorInfo, Error};
use embedded_hal::{
    delay::DelayNs,
    digital::{self, OutputPin},
};
use log::{debug, error, warn};
use std::{thread, time::Duration};

/// ISP supplies in power-on order.
pub const ISP_SUPPLIES: [&str; 3] = ["DVDD", "VDDIO_HMISC", "VDDIO_SMISC"];

const ISP_SUPPLY_DELAY_US: u32 = 2000;
const STANDBY_DELAY_US: u32 = 200;
const RESET_SETTLE_US: u32 = 10_000;

/// Consumer name the ISP requests its own supplies under.
pub const ISP_CONSUMER: &str = "ap130x";

pub trait GpioLine {
    fn set_active(&mut self, active: bool) -> Result<(), Error>;
}

impl<P: OutputPin> GpioLine for P {
    fn set_active(&mut self, active: bool) -> Result<(), Error> {
        let result = if active {
            self.set_high()
        } else {
            self.set_low()
        };
        result.map_err(|e| {
            Error::Device(format!("GPIO update failed: {:?}", digital::Error::kind(&e)))
        })
    }
}

pub trait Clock {
    fn enable(&mut self) -> Result<(), Error>;
    fn disable(&mut self);
}

pub trait Regulator {
    fn enable(&mut self) -> Result<(), Error>;
    fn disable(&mut self) -> Result<(), Error>;
}

/// Source of regulators, looked up by consumer and supply name.
pub trait RegulatorProvider {
    fn get(&mut self, consumer: &str, supply: &str) -> Result<Box<dyn Regulator + Send>, Error>;
}

/// Blocking delay backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// Platform resources handed to the driver at attach time.
pub struct Platform {
    pub reset: Box<dyn GpioLine + Send>,
    pub standby: Option<Box<dyn GpioLine + Send>>,
    pub isp_en: Option<Box<dyn GpioLine + Send>>,
    pub clock: Box<dyn Clock + Send>,
    pub regulators: Box<dyn RegulatorProvider + Send>,
}

struct NamedRegulator {
    name: &'static str,
    post_delay_us: u32,
    regulator: Box<dyn Regulator + Send>,
}

fn disable_all(regulators: &mut [NamedRegulator], who: &str) {
    for supply in regulators.iter_mut().rev() {
        if let Err(e) = supply.regulator.disable() {
            warn!("Failed to disable {} supply {}: {}", who, supply.name, e);
        }
    }
}

/// ISP power control: reset and standby lines, clock and core supplies.
pub struct IspPower {
    reset: Box<dyn GpioLine + Send>,
    standby: Option<Box<dyn GpioLine + Send>>,
    clock: Box<dyn Clock + Send>,
    supplies: Vec<NamedRegulator>,
    on: bool,
}

impl IspPower {
    /// Claim the ISP resources and hold the chip in reset.
    pub fn new(
        mut reset: Box<dyn GpioLine + Send>,
        standby: Option<Box<dyn GpioLine + Send>>,
        clock: Box<dyn Clock + Send>,
        regulators: &mut dyn RegulatorProvider,
    ) -> Result<Self, Error> {
        reset.set_active(true)?;

        let mut supplies = Vec::with_capacity(ISP_SUPPLIES.len());
        for name in ISP_SUPPLIES {
            let regulator = regulators.get(ISP_CONSUMER, name).map_err(|e| {
                error!("Failed to get ISP supply {}: {}", name, e);
                e
            })?;
            supplies.push(NamedRegulator {
                name,
                post_delay_us: ISP_SUPPLY_DELAY_US,
                regulator,
            });
        }

        Ok(IspPower {
            reset,
            standby,
            clock,
            supplies,
            on: false,
        })
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn power_on(&mut self, delay: &mut impl DelayNs) -> Result<(), Error> {
        debug!("Powering on ISP");

        if let Some(standby) = self.standby.as_mut() {
            standby.set_active(true)?;
            delay.delay_us(STANDBY_DELAY_US);
        }

        for i in 0..self.supplies.len() {
            let supply = &mut self.supplies[i];
            if let Err(e) = supply.regulator.enable() {
                error!("Failed to enable ISP supply {}: {}", supply.name, e);
                disable_all(&mut self.supplies[..i], "ISP");
                return Err(e);
            }
            delay.delay_us(supply.post_delay_us);
        }

        let result = self.finish_power_on(delay);
        if result.is_err() {
            disable_all(&mut self.supplies, "ISP");
            return result;
        }

        self.on = true;
        Ok(())
    }

    fn finish_power_on(&mut self, delay: &mut impl DelayNs) -> Result<(), Error> {
        if let Some(standby) = self.standby.as_mut() {
            standby.set_active(false)?;
            delay.delay_us(STANDBY_DELAY_US);
        }

        self.clock.enable().map_err(|e| {
            error!("Failed to enable clock: {}", e);
            e
        })?;

        if let Err(e) = self.reset.set_active(false) {
            self.clock.disable();
            return Err(e);
        }

        delay.delay_us(RESET_SETTLE_US);
        Ok(())
    }

    pub fn power_off(&mut self, delay: &mut impl DelayNs) {
        debug!("Powering off ISP");

        if let Err(e) = self.reset.set_active(true) {
            warn!("Failed to assert reset: {}", e);
        }

        self.clock.disable();

        if let Some(standby) = self.standby.as_mut() {
            if let Err(e) = standby.set_active(true) {
                warn!("Failed to assert standby: {}", e);
            }
            delay.delay_us(STANDBY_DELAY_US);
        }

        disable_all(&mut self.supplies, "ISP");

        if let Some(standby) = self.standby.as_mut() {
            delay.delay_us(STANDBY_DELAY_US);
            if let Err(e) = standby.set_active(false) {
                warn!("Failed to release standby: {}", e);
            }
        }

        self.on = false;
    }
}

/// Supplies of one sensor.
pub struct SensorPower {
    label: String,
    supplies: Vec<NamedRegulator>,
}

impl SensorPower {
    /// Claim the supplies listed in `info` under consumer `label`.
    pub fn new(
        label: &str,
        info: &SensorInfo,
        regulators: &mut dyn RegulatorProvider,
    ) -> Result<Self, Error> {
        let mut supplies = Vec::with_capacity(info.supplies.len());
        for supply in info.supplies {
            let regulator = regulators.get(label, supply.name).map_err(|e| {
                error!("Failed to get supply {} for sensor {}: {}", supply.name, label, e);
                e
            })?;
            supplies.push(NamedRegulator {
                name: supply.name,
                post_delay_us: supply.post_delay_us,
                regulator,
            });
        }

        Ok(SensorPower {
            label: label.to_string(),
            supplies,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Enable supplies one at a time in order. On failure the supplies already
    /// enabled are disabled in reverse order.
    fn power_on(&mut self, delay: &mut impl DelayNs) -> Result<(), Error> {
        for i in 0..self.supplies.len() {
            let supply = &mut self.supplies[i];
            if let Err(e) = supply.regulator.enable() {
                error!(
                    "Failed to enable supply {} for sensor {}: {}",
                    supply.name, self.label, e
                );
                disable_all(&mut self.supplies[..i], &self.label);
                return Err(e);
            }
            delay.delay_us(supply.post_delay_us);
        }
        Ok(())
    }

    fn power_off(&mut self) {
        disable_all(&mut self.supplies, &self.label);
    }
}

/// Power on every sensor in turn. A failure powers down the sensors already
/// brought up before the error is returned.
pub fn sensors_power_on<'a, I>(sensors: I, delay: &mut impl DelayNs) -> Result<(), Error>
where
    I: IntoIterator<Item = &'a mut SensorPower>,
{
    let mut done: Vec<&'a mut SensorPower> = Vec::new();
    for sensor in sensors {
        if let Err(e) = sensor.power_on(delay) {
            for previous in done.into_iter().rev() {
                previous.power_off();
            }
            return Err(e);
        }
        done.push(sensor);
    }
    Ok(())
}

pub fn sensors_power_off<'a, I>(sensors: I)
where
    I: IntoIterator<Item = &'a mut SensorPower>,
{
    for sensor in sensors {
        sensor.power_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor;
    use crate::sim::{Event, SimChip};

    fn supply(consumer: &str, name: &str, enabled: bool) -> Event {
        Event::Supply {
            consumer: consumer.into(),
            name: name.into(),
            enabled,
        }
    }

    fn gpio(line: &'static str, active: bool) -> Event {
        Event::Gpio { line, active }
    }

    fn isp_power(chip: &SimChip) -> IspPower {
        let mut platform = chip.platform();
        let power = IspPower::new(
            platform.reset,
            platform.standby,
            platform.clock,
            platform.regulators.as_mut(),
        )
        .unwrap();
        chip.clear_events();
        power
    }

    #[test]
    fn test_claim_asserts_reset() {
        let chip = SimChip::new();
        let mut platform = chip.platform();
        IspPower::new(
            platform.reset,
            platform.standby,
            platform.clock,
            platform.regulators.as_mut(),
        )
        .unwrap();
        assert_eq!(chip.events(), vec![gpio("reset", true)]);
        assert!(chip.in_reset());
    }

    #[test]
    fn test_isp_power_on_sequence() {
        let chip = SimChip::new();
        let mut power = isp_power(&chip);
        power.power_on(&mut chip.delay()).unwrap();

        assert_eq!(
            chip.events(),
            vec![
                gpio("standby", true),
                Event::Delay(200),
                supply("ap130x", "DVDD", true),
                Event::Delay(2000),
                supply("ap130x", "VDDIO_HMISC", true),
                Event::Delay(2000),
                supply("ap130x", "VDDIO_SMISC", true),
                Event::Delay(2000),
                gpio("standby", false),
                Event::Delay(200),
                Event::Clock(true),
                gpio("reset", false),
                Event::Delay(10_000),
            ]
        );
        assert!(power.is_on());
        assert!(!chip.in_reset());
    }

    #[test]
    fn test_isp_power_off_sequence() {
        let chip = SimChip::new();
        let mut power = isp_power(&chip);
        power.power_on(&mut chip.delay()).unwrap();
        chip.clear_events();

        power.power_off(&mut chip.delay());
        assert_eq!(
            chip.events(),
            vec![
                gpio("reset", true),
                Event::Clock(false),
                gpio("standby", true),
                Event::Delay(200),
                supply("ap130x", "VDDIO_SMISC", false),
                supply("ap130x", "VDDIO_HMISC", false),
                supply("ap130x", "DVDD", false),
                Event::Delay(200),
                gpio("standby", false),
            ]
        );
        assert!(!power.is_on());
    }

    #[test]
    fn test_isp_supply_failure_unwinds() {
        let chip = SimChip::new();
        chip.fail_supply("ap130x", "VDDIO_SMISC");
        let mut power = isp_power(&chip);

        assert!(power.power_on(&mut chip.delay()).is_err());
        let events = chip.events();
        let tail = &events[events.len() - 2..];
        assert_eq!(
            tail,
            &[
                supply("ap130x", "VDDIO_HMISC", false),
                supply("ap130x", "DVDD", false)
            ]
        );
        assert!(!events.contains(&Event::Clock(true)));
        assert!(!power.is_on());
    }

    #[test]
    fn test_isp_clock_failure_unwinds_supplies() {
        let chip = SimChip::new();
        chip.fail_clock(true);
        let mut power = isp_power(&chip);

        assert!(power.power_on(&mut chip.delay()).is_err());
        let events = chip.events();
        assert_eq!(
            &events[events.len() - 3..],
            &[
                supply("ap130x", "VDDIO_SMISC", false),
                supply("ap130x", "VDDIO_HMISC", false),
                supply("ap130x", "DVDD", false),
            ]
        );
        assert!(chip.in_reset());
    }

    #[test]
    fn test_sensor_power_on_order_and_delays() {
        let chip = SimChip::new();
        let info = sensor::lookup("onnn,ar0144").unwrap();
        let mut platform = chip.platform();
        let mut sensor = SensorPower::new("ar0144 0", info, platform.regulators.as_mut()).unwrap();

        sensors_power_on([&mut sensor], &mut chip.delay()).unwrap();
        assert_eq!(
            chip.events(),
            vec![
                supply("ar0144 0", "vaa", true),
                Event::Delay(100),
                supply("ar0144 0", "vddio", true),
                Event::Delay(100),
                supply("ar0144 0", "vdd", true),
                Event::Delay(0),
            ]
        );
    }

    #[test]
    fn test_sensor_failure_powers_down_previous_sensors() {
        let chip = SimChip::new();
        chip.fail_supply("ar0144 1", "vddio");
        let info = sensor::lookup("onnn,ar0144").unwrap();
        let mut platform = chip.platform();
        let mut first = SensorPower::new("ar0144 0", info, platform.regulators.as_mut()).unwrap();
        let mut second = SensorPower::new("ar0144 1", info, platform.regulators.as_mut()).unwrap();

        let result = sensors_power_on([&mut first, &mut second], &mut chip.delay());
        assert!(result.is_err());

        let disabled: Vec<Event> = chip
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Supply { enabled: false, .. }))
            .collect();
        assert_eq!(
            disabled,
            vec![
                supply("ar0144 1", "vaa", false),
                supply("ar0144 0", "vdd", false),
                supply("ar0144 0", "vddio", false),
                supply("ar0144 0", "vaa", false),
            ]
        );
    }
}

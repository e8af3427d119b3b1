#![cfg_attr(not(test), no_std)]
//! AHT20 driver.
//!
//! Example:
//!
//!     # use embedded_hal_mock::eh1::delay::NoopDelay as MockDelay;
//!     # use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};
//!     # use aht20_sensor::{Aht20, SENSOR_ADDRESS};
//!     # let expectations = vec![
//!     #     // connect - the liveness probe is acked on the first attempt.
//!     #     Transaction::write(SENSOR_ADDRESS, vec![]),
//!     #     // measure - the sensor reports calibrated and idle, so no
//!     #     // Initialize command needs to be sent.
//!     #     Transaction::read(SENSOR_ADDRESS, vec![0b0000_1000]),
//!     #     // send_trigger_measurement
//!     #     Transaction::write(
//!     #         SENSOR_ADDRESS,
//!     #         vec![
//!     #             0b1010_1100, // 0xAC
//!     #             0b0011_0011, // 0x33
//!     #             0b0000_0000, // 0x00
//!     #         ],
//!     #     ),
//!     #     // status poll - the busy bit is clear, the conversion is done.
//!     #     Transaction::read(SENSOR_ADDRESS, vec![0b0000_1000]),
//!     #     // Read 6 bytes back: a repeat of the status byte, then 5 data
//!     #     // bytes holding 20 bits of humidity and 20 bits of temperature.
//!     #     Transaction::read(
//!     #         SENSOR_ADDRESS,
//!     #         vec![0x18, 0x19, 0x99, 0xA3, 0x33, 0x33],
//!     #     ),
//!     # ];
//!     # let mock_i2c = I2cMock::new(&expectations);
//!     # let mut delay = MockDelay::new();
//!     let mut sensor = Aht20::connect(mock_i2c, SENSOR_ADDRESS, &mut delay).unwrap();
//!     let reading = sensor.measure(&mut delay).unwrap();
//!
//!     println!("temperature (aht20): {:.2}C", reading.temperature);
//!     println!("humidity (aht20): {:.2}%", reading.humidity);
//!     # sensor.destroy().done();
//!
//! [AHT20 Datasheet](https://cdn-learn.adafruit.com/assets/assets/000/091/676/original/AHT20-datasheet-2020-4-16.pdf?1591047915)
//!
//! The sensor speaks a four-command protocol: a bare status read, Initialize
//! (0xBE), TriggerMeasurement (0xAC), and SoftReset (0xBA). The driver
//! sequences those commands and turns the 20-bit raw counts that come back
//! into degrees Celsius and percent relative humidity.
//!
//! The flowchart below is the whole measurement sequence as driven by
//! `connect` and `measure`. Every wait goes through the injected
//! [`DelayNs`](embedded_hal::delay::DelayNs) implementation - the driver
//! never spins on the bus, and never blocks without a bound.
//!
//! ```text
//!             Start (connect)
//!                   │
//!                   ▼
//!        Probe (zero-length write) ──► no ack ──► Wait 20 ms, probe again
//!                   │                                      │
//!                   ▼                                      ▼
//!               Wait 40 ms                  no ack ──► DeviceUnreachable
//!                   │
//!                   ▼
//!                 Idle    ◄────────────────────────────────────┐
//!                   │  measure()                               │
//!                   ▼                                          │
//!           Status::Calibrated ──► No ──► Initialize (0xBE),   │
//!                   │                     trigger, wait,       │
//!                   ▼                     re-check status      │
//!                  Yes                    (CalibrationFailed   │
//!                   │                     if still not set)    │
//!                   ▼                                          │
//!     TriggerMeasurement (0xAC)                                │
//!                   │                                          │
//!                   ▼                                          │
//!              Wait 80 ms                                      │
//!                   │                                          │
//!                   ▼                                          │
//!            Status::Busy ──► Yes ──► Wait 1 ms                │
//!                   │                 (up to 1000 ms, then     │
//!                   ▼                 MeasurementTimeout)      │
//!                  No                                          │
//!                   │                                          │
//!                   ▼                                          │
//!              Read 6 bytes                                    │
//!                   │                                          │
//!                   ▼                                          │
//!        Calc humidity and temp ───────────────────────────────┘
//! ```

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

/// AHT20 sensor's I2C address.
pub const SENSOR_ADDRESS: u8 = 0b0011_1000; // This is I2C address 0x38;

/// Datasheet-mandated settle time after power-on, before the sensor responds
/// reliably. Section 5.4.
const POWER_ON_DELAY_MS: u32 = 40;

/// Grace period between the two connect probes, for a device that is still
/// powering up when the first probe goes out.
const PROBE_RETRY_DELAY_MS: u32 = 20;

/// Dwell after Initialize + TriggerMeasurement while calibrating. 75 ms is
/// the datasheet floor for a conversion.
const CALIBRATION_DELAY_MS: u32 = 75;

/// Dwell after TriggerMeasurement before the first status poll. Must be at
/// least 75 ms; the sensor does not finish a conversion faster than that.
const MEASUREMENT_DELAY_MS: u32 = 80;

/// Interval between busy-bit polls.
const POLL_INTERVAL_MS: u32 = 1;

/// Upper bound on busy-bit polling. The sensor clears busy well within
/// hundreds of milliseconds; a device still busy after this long is stuck
/// or disconnected.
const BUSY_TIMEOUT_MS: u32 = 1000;

/// Full-scale count of the sensor's 20-bit ADC, 2^20.
const FULL_SCALE: f32 = 1_048_576.0;

/// Commands that can be sent to the AHT20 sensor.
///
/// Status is not listed here: the AHT20 answers a bare 1-byte read with its
/// status word, no command byte required. These can be found in the
/// datasheet, Section 5.3, page 8, Table 9.
pub enum Command {
    Initialize = 0b1011_1110, // 0xBE, Initialize and calibrate the sensor.
    // This command takes two bytes of parameter: 0b0000_1000 (0x08), then 0b0000_0000 (0x00).
    TriggerMeasurement = 0b1010_1100, // 0xAC
    // This command takes two bytes of parameter: 0b0011_0011 (0x33), then 0b0000_0000 (0x00).
    // Wait at least 75ms, then poll the status byte until Status::Busy clears.
    // Once it has, read 6 bytes back: a repeat of the status byte plus 5 data bytes.
    SoftReset = 0b1011_1010, // 0xBA
    // Takes no parameters. The sensor must be re-initialized afterwards.
}

/// Status byte meanings.
///
/// Table 10, page 8 of the datasheet.
pub enum Status {
    Busy = 0b1000_0000, // Status bit for busy - 8th bit enabled. 1<<7, 0x80
    // 1 is Busy measuring. 0 is "Free in dormant state" or "ready".
    Calibrated = 0b0000_1000, // Status bit for calibrated - 4th bit enabled. 1<<3, 0x08.
    // 1 is Calibrated, 0 is uncalibrated. If 0, send Command::Initialize.
}

/// SensorStatus is the response from the sensor indicating if it is ready to
/// read from, and if it is calibrated.
///
/// This is returned from the `read_status` method. Both flags are plain
/// bitwise tests against the raw byte. The byte is read fresh on every
/// status query and never cached.
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorStatus(pub u8);

impl SensorStatus {
    /// Create a new SensorStatus from an AHT20 status byte.
    pub fn new(status: u8) -> Self {
        SensorStatus(status)
    }

    /// Check if the sensor is busy generating a measurement. After a
    /// TriggerMeasurement, the result must not be read until this clears.
    pub fn is_busy(self) -> bool {
        (self.0 & Status::Busy as u8) != 0
    }

    /// Check if the sensor is ready to have data read from it. This is the
    /// busy flag, negated.
    pub fn is_ready(self) -> bool {
        !self.is_busy()
    }

    /// Check if the sensor's calibration coefficients are valid. If they are
    /// not, send Command::Initialize - see `ensure_calibrated`.
    pub fn is_calibrated(self) -> bool {
        (self.0 & Status::Calibrated as u8) != 0
    }
}

/// RawSample holds the undecoded 20-bit humidity and temperature counts,
/// parsed out of the sensor's 6-byte data response.
///
/// The 6 bytes are: a repeat of the status byte (discarded), two full bytes
/// of humidity, a split byte carrying 4 bits of each value, and two full
/// bytes of temperature. Both counts always fit in 20 bits.
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub humidity: u32,
    pub temperature: u32,
}

impl RawSample {
    /// Parse a RawSample from the sensor's 6-byte data response.
    pub fn from_bytes(data: &[u8; 6]) -> Self {
        // Byte 0 duplicates the status byte and carries no sample data.
        // Humidity is bytes 1-2 plus the high nibble of byte 3, temperature
        // is the low nibble of byte 3 plus bytes 4-5.
        let humidity: u32 =
            ((data[1] as u32) << 12) | ((data[2] as u32) << 4) | ((data[3] as u32) >> 4);
        let temperature: u32 =
            (((data[3] & 0b0000_1111) as u32) << 16) | ((data[4] as u32) << 8) | (data[5] as u32);

        // Both fields are 20-bit quantities, anything above bit 20 is masked off.
        RawSample {
            humidity: humidity & 0xF_FFFF,
            temperature: temperature & 0xF_FFFF,
        }
    }

    /// Relative humidity in percent.
    ///
    /// Section 6.1 "Relative humidity transformation": the raw count is a
    /// fraction of full scale (2^20), scaled to 0-100%.
    pub fn humidity_percent(self) -> f32 {
        (self.humidity as f32) / FULL_SCALE * 100.0
    }

    /// Temperature in degrees Celsius.
    ///
    /// Section 6.2 "Temperature transformation": the raw count maps linearly
    /// onto -50..150 degrees.
    pub fn temperature_celsius(self) -> f32 {
        (self.temperature as f32) / FULL_SCALE * 200.0 - 50.0
    }

    /// Temperature in degrees Fahrenheit.
    pub fn temperature_fahrenheit(self) -> f32 {
        self.temperature_celsius() * 9.0 / 5.0 + 32.0
    }
}

/// SensorReading is a single reading from the AHT20 sensor.
///
/// This is returned from the `measure` method. You get:
/// * humidity in % Relative Humidity
/// * temperature in degrees Celsius.
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub humidity: f32,
    pub temperature: f32,
}

impl From<RawSample> for SensorReading {
    fn from(raw: RawSample) -> Self {
        SensorReading {
            humidity: raw.humidity_percent(),
            temperature: raw.temperature_celsius(),
        }
    }
}

/// Driver errors.
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq)]
pub enum Error<E> {
    /// The device did not ack its address during the connect probe, even
    /// after the 20 ms power-on grace retry.
    DeviceUnreachable,
    /// I2C bus error while writing to the device.
    BusWrite(E),
    /// I2C bus error while reading from the device.
    BusRead(E),
    /// The sensor still reports uncalibrated after a full
    /// initialize/trigger/wait cycle. This is fatal - it signals defective
    /// hardware or wiring, and retrying will not help.
    CalibrationFailed,
    /// The busy bit never cleared within the bounded window while waiting
    /// for calibration.
    CalibrationTimeout,
    /// The busy bit never cleared within the bounded window while waiting
    /// for a measurement.
    MeasurementTimeout,
}

/// Tracks the trigger issued by `poll_ready` between calls.
#[derive(Debug)]
enum PollState {
    Idle,
    InFlight,
}

/// An AHT20 sensor on the I2C bus `I2C`.
///
/// The address of the sensor will be `SENSOR_ADDRESS` from this package,
/// unless there is some kind of special address translating hardware in use.
///
/// The driver owns the bus handle exclusively and assumes nothing else
/// transacts with this device address. If multiple logical callers share one
/// sensor, serialization around the whole measurement sequence must be
/// imposed by the caller - interleaving a second caller's transaction inside
/// the trigger/wait/read sequence corrupts both.
#[derive(Debug)]
pub struct Aht20<I2C>
where
    I2C: I2c,
{
    i2c: I2C,
    address: u8,
    poll: PollState,
    reading: Option<SensorReading>,
}

impl<I2C, E> Aht20<I2C>
where
    I2C: I2c<Error = E>,
{
    /// Create a driver for a sensor at `address`, without touching the bus.
    ///
    /// This consumes the I2C bus `I2C`. The address will almost always be
    /// `SENSOR_ADDRESS` from this crate. No transaction is issued - use
    /// `connect` to also verify that the device is present.
    pub fn new(i2c: I2C, address: u8) -> Self {
        Aht20 {
            i2c,
            address,
            poll: PollState::Idle,
            reading: None,
        }
    }

    /// Create a driver and probe the device for liveness.
    ///
    /// The probe is a zero-length write transaction - the device acks its
    /// address and nothing else. If it does not ack, one retry is made after
    /// 20 ms, for a sensor still settling after power-on. A device that
    /// fails both probes is reported as `Error::DeviceUnreachable`.
    ///
    /// On success this waits out the 40 ms post-power-on settle time the
    /// datasheet requires, so the returned driver can be used immediately.
    /// Calibration is not verified here - that happens on the first
    /// `measure`, or explicitly via `ensure_calibrated`.
    pub fn connect(i2c: I2C, address: u8, delay: &mut impl DelayNs) -> Result<Self, Error<E>> {
        let mut sensor = Aht20::new(i2c, address);

        if sensor.i2c.write(sensor.address, &[]).is_err() {
            delay.delay_ms(PROBE_RETRY_DELAY_MS);
            sensor
                .i2c
                .write(sensor.address, &[])
                .map_err(|_| Error::DeviceUnreachable)?;
        }
        delay.delay_ms(POWER_ON_DELAY_MS);

        Ok(sensor)
    }

    /// Ask the AHT20 sensor to report its status.
    ///
    /// The sensor answers a bare 1-byte read with its status word; there is
    /// no command byte to send first. The sensor can be calibrated or not,
    /// also busy generating a sensor measurement or ready.
    pub fn read_status(&mut self) -> Result<SensorStatus, Error<E>> {
        let mut read_buffer = [0u8; 1];

        self.i2c
            .read(self.address, &mut read_buffer)
            .map_err(Error::BusRead)?;

        Ok(SensorStatus::new(read_buffer[0]))
    }

    /// Send the Initialize command to the sensor, which makes it calibrate.
    ///
    /// The command is idempotent and safe to issue whenever the device
    /// reports uncalibrated. After sending it, the sensor needs a
    /// measurement cycle before the calibrated flag shows up - see
    /// `ensure_calibrated`, which drives the whole exchange.
    pub fn send_initialize(&mut self) -> Result<(), Error<E>> {
        let command: [u8; 3] = [
            // Initialize = 0b1011_1110. Equivalent to 0xBE, Section 5.3, page 8, Table 9
            Command::Initialize as u8,
            // Two parameters as described in the datasheet. There is no
            // indication what these parameters mean, just that they should
            // be provided. There is also no returned value.
            0b0000_1000, // 0x08
            0b0000_0000, // 0x00
        ];

        self.i2c
            .write(self.address, &command)
            .map_err(Error::BusWrite)?;

        Ok(())
    }

    /// Verify that the sensor is calibrated, calibrating it if needed.
    ///
    /// If the status byte already shows calibrated this returns at once.
    /// Otherwise Initialize is sent, a measurement is triggered to make the
    /// sensor run its calibration, and the busy bit is polled until it
    /// clears. The poll is bounded: a sensor still busy after 1000 ms earns
    /// `Error::CalibrationTimeout` instead of hanging the caller forever.
    ///
    /// A sensor that is still uncalibrated after the full cycle is reported
    /// as `Error::CalibrationFailed`. That condition does not recover -
    /// check the wiring and the part.
    pub fn ensure_calibrated(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        if self.read_status()?.is_calibrated() {
            return Ok(());
        }

        self.send_initialize()?;
        self.send_trigger_measurement()?;
        delay.delay_ms(CALIBRATION_DELAY_MS);
        self.wait_not_busy(delay, Error::CalibrationTimeout)?;

        if !self.read_status()?.is_calibrated() {
            return Err(Error::CalibrationFailed);
        }

        Ok(())
    }

    /// Send the "Trigger Measurement" command to the sensor.
    ///
    /// This does not return anything, it only instructs the sensor to get
    /// the data ready. After sending this command, wait at least 75ms and
    /// then poll the status byte until the busy flag clears before reading
    /// data back. The `measure` method drives that sequence.
    pub fn send_trigger_measurement(&mut self) -> Result<(), Error<E>> {
        // TriggerMeasurement is 0b1010_1100. Equivalent to 0xAC: Section 5.3, page 8, Table 9
        let command: [u8; 3] = [
            Command::TriggerMeasurement as u8,
            // Two parameters as described in the datasheet. There is no
            // indication what these parameters mean, just that they should
            // be provided. There is no returned value.
            0b0011_0011, // 0x33
            0b0000_0000, // 0x00
        ];

        self.i2c
            .write(self.address, &command)
            .map_err(Error::BusWrite)?;

        Ok(())
    }

    /// Read the sensor's 6-byte data response and parse the raw counts.
    ///
    /// The response is a repeat of the status byte followed by 5 data bytes
    /// holding 20 bits of humidity and 20 bits of temperature. Only call
    /// this once the busy flag has cleared - the `measure` method takes
    /// care of the wait and check.
    pub fn read_raw_sample(&mut self) -> Result<RawSample, Error<E>> {
        let mut read_buffer = [0u8; 6];

        self.i2c
            .read(self.address, &mut read_buffer)
            .map_err(Error::BusRead)?;

        Ok(RawSample::from_bytes(&read_buffer))
    }

    /// Measure temperature and humidity.
    ///
    /// This runs the full blocking sequence from the flowchart at the top of
    /// this file: verify calibration (initializing if the sensor asks for
    /// it), trigger a conversion, wait out the 80 ms conversion time, poll
    /// the busy flag at 1 ms intervals, then read and convert the result.
    ///
    /// A conversion takes at least 75 ms, so this call blocks for at least
    /// that long. The busy poll is bounded at 1000 ms; a sensor that never
    /// reports ready earns `Error::MeasurementTimeout` and no sample is
    /// returned. Once triggered, the sensor is committed to finishing its
    /// conversion - there is no way to abort one in flight.
    pub fn measure(&mut self, delay: &mut impl DelayNs) -> Result<SensorReading, Error<E>> {
        self.ensure_calibrated(delay)?;

        self.send_trigger_measurement()?;
        delay.delay_ms(MEASUREMENT_DELAY_MS);
        self.wait_not_busy(delay, Error::MeasurementTimeout)?;

        let sample = self.read_raw_sample()?;
        Ok(sample.into())
    }

    /// Measure, returning only the temperature in degrees Celsius.
    pub fn get_temperature(&mut self, delay: &mut impl DelayNs) -> Result<f32, Error<E>> {
        Ok(self.measure(delay)?.temperature)
    }

    /// Measure, returning only the relative humidity in percent.
    ///
    /// Temperature and humidity come out of the same conversion, so if you
    /// want both, `measure` gets them in one pass.
    pub fn get_humidity(&mut self, delay: &mut impl DelayNs) -> Result<f32, Error<E>> {
        Ok(self.measure(delay)?.humidity)
    }

    /// Non-blocking measurement, for callers that cannot sleep.
    ///
    /// The first call issues TriggerMeasurement and returns `false`. Each
    /// following call checks the busy flag, without any delay, and returns
    /// `false` while the conversion is still running. Once the sensor
    /// reports ready, the sample is read, the converted reading is cached
    /// for `take_reading`, and this returns `true`.
    ///
    /// Calibration is not verified on this path, since that requires
    /// sleeping. Run `ensure_calibrated` once before polling.
    pub fn poll_ready(&mut self) -> Result<bool, Error<E>> {
        match self.poll {
            PollState::Idle => {
                self.send_trigger_measurement()?;
                self.poll = PollState::InFlight;
                Ok(false)
            }
            PollState::InFlight => {
                if self.read_status()?.is_busy() {
                    return Ok(false);
                }
                // The sensor is committed to the conversion it has started,
                // so a failed status read above leaves us InFlight - the
                // next poll just checks again.
                let sample = self.read_raw_sample()?;
                self.reading = Some(sample.into());
                self.poll = PollState::Idle;
                Ok(true)
            }
        }
    }

    /// Take the reading cached by a completed `poll_ready` cycle.
    ///
    /// Returns `None` until `poll_ready` has returned `true`, and again
    /// after the reading has been taken.
    pub fn take_reading(&mut self) -> Option<SensorReading> {
        self.reading.take()
    }

    /// Send the Soft Reset command to the sensor.
    ///
    /// The sensor reboots into its power-on state. This does not block for
    /// the reset to complete (the datasheet bounds it at 20 ms); the sensor
    /// must be re-initialized before the next measurement, which `measure`
    /// does by way of its calibration check.
    pub fn soft_reset(&mut self) -> Result<(), Error<E>> {
        // SoftReset is 0b1011_1010. Equivalent to 0xBA, Section 5.3, page 8, Table 9.
        let command: [u8; 1] = [Command::SoftReset as u8];

        self.i2c
            .write(self.address, &command)
            .map_err(Error::BusWrite)?;

        Ok(())
    }

    /// Destroys this driver and releases the I2C bus `I2C`.
    pub fn destroy(self) -> I2C {
        self.i2c
    }

    /// Poll the busy flag at 1 ms intervals until it clears, or until the
    /// 1000 ms bound runs out, in which case `timeout_error` is returned.
    fn wait_not_busy(
        &mut self,
        delay: &mut impl DelayNs,
        timeout_error: Error<E>,
    ) -> Result<(), Error<E>> {
        let mut waited_ms: u32 = 0;
        loop {
            if !self.read_status()?.is_busy() {
                return Ok(());
            }
            if waited_ms >= BUSY_TIMEOUT_MS {
                return Err(timeout_error);
            }
            delay.delay_ms(POLL_INTERVAL_MS);
            waited_ms += POLL_INTERVAL_MS;
        }
    }
}
